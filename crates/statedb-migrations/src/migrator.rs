use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};

use statedb_core::buckets::MIGRATIONS;
use statedb_core::{write_schema_version, Backend, ReadTx, RwTx, Store};
use tracing::{info, warn};

use crate::handshake::{Handshake, HandshakeState};
use crate::units::default_migrations;
use crate::{progress_key, MigrationError, PROGRESS_KEY_PREFIX};

/// Body of a migration: `(tx, scratch_dir, progress, handshake)`.
///
/// `progress` is the token of the last checkpoint, empty on a first attempt.
pub type MigrationFn =
    dyn Fn(&mut dyn RwTx, &Path, &[u8], &mut Handshake<'_>) -> Result<(), MigrationError>;

pub struct Migration {
    name: String,
    up: Box<MigrationFn>,
}

impl Migration {
    pub fn new<F>(name: impl Into<String>, up: F) -> Self
    where
        F: Fn(&mut dyn RwTx, &Path, &[u8], &mut Handshake<'_>) -> Result<(), MigrationError>
            + 'static,
    {
        Self { name: name.into(), up: Box::new(up) }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Debug for Migration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Names of applied migrations. Values hold the stored stage snapshot when `with_payload`
/// is set and are empty otherwise. Checkpoint entries and keys that are not UTF-8 are
/// skipped.
///
/// # Errors
/// Returns an error when the migrations bucket cannot be read.
pub fn applied_migrations<T: ReadTx + ?Sized>(
    tx: &T,
    with_payload: bool,
) -> Result<BTreeMap<String, Vec<u8>>, MigrationError> {
    let mut applied = BTreeMap::new();
    tx.walk(MIGRATIONS, &[], 0, &mut |key, value| {
        if key.starts_with(PROGRESS_KEY_PREFIX.as_bytes()) {
            return Ok(true);
        }
        let Ok(name) = std::str::from_utf8(key) else {
            warn!(key = %hex::encode(key), "skipping non-UTF-8 key in migrations bucket");
            return Ok(true);
        };
        let value = if with_payload { value.to_vec() } else { Vec::new() };
        applied.insert(name.to_string(), value);
        Ok(true)
    })?;
    Ok(applied)
}

/// Scratch directory handed to a migration body: `<root>/migrations/<name>`.
#[must_use]
pub fn scratch_dir(root: &Path, name: &str) -> PathBuf {
    root.join("migrations").join(name)
}

/// Applies an ordered list of migrations, each exactly once.
#[derive(Debug)]
pub struct Migrator {
    migrations: Vec<Migration>,
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new(default_migrations())
    }
}

impl Migrator {
    #[must_use]
    pub fn new(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }

    #[must_use]
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// # Errors
    /// Returns an error when the migrations bucket cannot be read.
    pub fn applied<S: Store>(
        store: &S,
        with_payload: bool,
    ) -> Result<BTreeMap<String, Vec<u8>>, MigrationError> {
        let tx = store.begin_ro()?;
        applied_migrations(&tx, with_payload)
    }

    /// Registered migrations not applied yet, in registration order.
    ///
    /// # Errors
    /// Returns an error when the migrations bucket cannot be read.
    pub fn pending_migrations<S: Store>(&self, store: &S) -> Result<Vec<&Migration>, MigrationError> {
        let applied = Self::applied(store, false)?;
        Ok(self.migrations.iter().filter(|m| !applied.contains_key(&m.name)).collect())
    }

    /// # Errors
    /// Returns an error when the migrations bucket cannot be read.
    pub fn has_pending_migrations<S: Store>(&self, store: &S) -> Result<bool, MigrationError> {
        Ok(!self.pending_migrations(store)?.is_empty())
    }

    /// Run every pending migration in order, then stamp the schema version for `backend`.
    ///
    /// All work happens in one write transaction that migrations commit and reopen through
    /// their [`Handshake`]. Returning early rolls back whatever was written since the last
    /// such commit.
    ///
    /// # Errors
    /// Returns [`MigrationError::NonUniqueName`] before running anything when two migrations
    /// share a name, [`MigrationError::CommitNotCalled`] when a migration returns without
    /// completing, [`MigrationError::Unit`] wrapping any error a migration returns, and store
    /// errors from the engine's own reads, writes and the final commit.
    pub fn apply<S: Store>(
        &self,
        store: &S,
        scratch_root: &Path,
        backend: Backend,
    ) -> Result<(), MigrationError> {
        if self.migrations.is_empty() {
            return Ok(());
        }

        let applied = Self::applied(store, false)?;
        self.ensure_unique_names()?;

        let mut tx = store.begin_rw()?;

        for migration in &self.migrations {
            if applied.contains_key(&migration.name) {
                continue;
            }

            let progress = tx.get(MIGRATIONS, &progress_key(&migration.name))?.unwrap_or_default();
            if progress.is_empty() {
                info!(name = %migration.name, "apply migration");
            } else {
                warn!(
                    name = %migration.name,
                    progress_len = progress.len(),
                    "resuming interrupted migration from checkpoint"
                );
            }

            let mut handshake = Handshake::new(&migration.name);
            (migration.up)(
                &mut tx,
                &scratch_dir(scratch_root, &migration.name),
                &progress,
                &mut handshake,
            )
            .map_err(|source| MigrationError::Unit {
                name: migration.name.clone(),
                source: Box::new(source),
            })?;

            match handshake.state() {
                HandshakeState::Completed => {}
                HandshakeState::Checkpointed => {
                    warn!(
                        name = %migration.name,
                        "migration checkpointed but not completed; checkpoint kept for next run"
                    );
                    return Err(MigrationError::CommitNotCalled(migration.name.clone()));
                }
                HandshakeState::Pending => {
                    return Err(MigrationError::CommitNotCalled(migration.name.clone()));
                }
            }
            info!(name = %migration.name, "applied migration");
        }

        let version = backend.schema_version();
        write_schema_version(&mut tx, version)
            .map_err(|source| MigrationError::StampVersion { source })?;
        tx.commit().map_err(|source| MigrationError::Commit { source })?;

        info!(%version, backend = backend.as_str(), "updated database schema version");
        Ok(())
    }

    fn ensure_unique_names(&self) -> Result<(), MigrationError> {
        let mut seen = BTreeSet::new();
        for migration in &self.migrations {
            if !seen.insert(migration.name.as_str()) {
                return Err(MigrationError::NonUniqueName(migration.name.clone()));
            }
        }
        Ok(())
    }
}
