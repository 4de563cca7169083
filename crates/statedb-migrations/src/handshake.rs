use statedb_core::buckets::MIGRATIONS;
use statedb_core::RwTx;
use tracing::debug;

use crate::payload::marshal_migration_payload;
use crate::{progress_key, MigrationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing committed through the handshake yet.
    Pending,
    /// Last call was a checkpoint; the migration is not finished.
    Checkpointed,
    /// Completion recorded; the handshake accepts no further calls.
    Completed,
}

/// Commit handshake handed to a migration body.
///
/// `checkpoint` makes intermediate work durable; `complete` records the migration as applied.
/// Both commit the cursor transaction and immediately reopen it. A body that returns `Ok`
/// without having called `complete` fails the run with [`MigrationError::CommitNotCalled`].
#[derive(Debug)]
pub struct Handshake<'m> {
    name: &'m str,
    state: HandshakeState,
}

impl<'m> Handshake<'m> {
    pub(crate) fn new(name: &'m str) -> Self {
        Self { name, state: HandshakeState::Pending }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Commit the work done so far, storing `token` as the resume point when given.
    ///
    /// With `None` the previous token, if any, is left untouched.
    ///
    /// # Errors
    /// Returns [`MigrationError::HandshakeClosed`] after completion, or a store error when
    /// the token cannot be written or the commit fails.
    pub fn checkpoint(
        &mut self,
        tx: &mut dyn RwTx,
        token: Option<&[u8]>,
    ) -> Result<(), MigrationError> {
        self.ensure_open()?;

        if let Some(token) = token {
            tx.put(MIGRATIONS, &progress_key(self.name), token)?;
        }
        tx.commit_and_begin()?;

        self.state = HandshakeState::Checkpointed;
        debug!(
            name = self.name,
            token_len = token.map_or(0, <[u8]>::len),
            "migration checkpoint committed"
        );
        Ok(())
    }

    /// Record the migration as applied: store the stage snapshot under its name, remove its
    /// checkpoint and commit.
    ///
    /// # Errors
    /// Returns [`MigrationError::HandshakeClosed`] when called twice, or a store/payload error
    /// when the record cannot be written or the commit fails.
    pub fn complete(&mut self, tx: &mut dyn RwTx) -> Result<(), MigrationError> {
        self.ensure_open()?;

        let payload = marshal_migration_payload(&*tx)?;
        tx.put(MIGRATIONS, self.name.as_bytes(), &payload)?;
        tx.delete(MIGRATIONS, &progress_key(self.name))?;
        tx.commit_and_begin()?;

        self.state = HandshakeState::Completed;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), MigrationError> {
        if self.state == HandshakeState::Completed {
            return Err(MigrationError::HandshakeClosed(self.name.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use statedb_core::{ReadTx, Store};
    use statedb_store_sqlite::SqliteStore;

    use super::*;

    #[test]
    fn state_tracks_checkpoints_and_completion() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let mut tx = store.begin_rw()?;
        let mut handshake = Handshake::new("split");
        assert_eq!(handshake.state(), HandshakeState::Pending);

        handshake.checkpoint(&mut tx, Some(b"cursor".as_slice()))?;
        assert_eq!(handshake.state(), HandshakeState::Checkpointed);
        assert_eq!(tx.get(MIGRATIONS, &progress_key("split"))?, Some(b"cursor".to_vec()));

        handshake.checkpoint(&mut tx, None)?;
        assert_eq!(handshake.state(), HandshakeState::Checkpointed);

        handshake.complete(&mut tx)?;
        assert_eq!(handshake.state(), HandshakeState::Completed);
        assert_eq!(tx.get(MIGRATIONS, &progress_key("split"))?, None);
        assert!(tx.get(MIGRATIONS, b"split")?.is_some());
        Ok(())
    }
}
