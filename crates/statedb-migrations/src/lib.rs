//! Schema migrations for the state database.
//!
//! A [`Migrator`] holds an ordered list of named [`Migration`]s and applies each one exactly
//! once. Applied migrations are recorded in the `Migration` bucket together with a snapshot
//! of sync stage progress; interrupted ones leave a `_progress_<name>` checkpoint that the
//! next run hands back to the migration body.

mod error;
mod handshake;
mod migrator;
pub mod payload;
pub mod transform;
mod units;

pub use error::MigrationError;
pub use handshake::{Handshake, HandshakeState};
pub use migrator::{applied_migrations, scratch_dir, Migration, MigrationFn, Migrator};
pub use payload::{
    marshal_migration_payload, snapshot_block_numbers, unmarshal_migration_payload, PayloadError,
};
pub use units::{
    default_migrations, DB_SCHEMA_VERSION, HEADER_PREFIX_TO_SEPARATE_BUCKETS, REMOVE_CLIQUE_BUCKET,
};

/// Key prefix of checkpoint entries in the migrations bucket.
pub const PROGRESS_KEY_PREFIX: &str = "_progress_";

/// Key under which the checkpoint of migration `name` is stored.
#[must_use]
pub fn progress_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(PROGRESS_KEY_PREFIX.len() + name.len());
    key.extend_from_slice(PROGRESS_KEY_PREFIX.as_bytes());
    key.extend_from_slice(name.as_bytes());
    key
}
