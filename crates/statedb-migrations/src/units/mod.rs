mod header_prefix;
mod remove_clique;

use crate::Migration;

pub const HEADER_PREFIX_TO_SEPARATE_BUCKETS: &str = "header_prefix_to_separate_buckets";
pub const REMOVE_CLIQUE_BUCKET: &str = "remove_clique_bucket";
pub const DB_SCHEMA_VERSION: &str = "db_schema_version";

/// Migrations shipped with the node, in the order they must run.
///
/// Names are persisted in every database they touched: never rename or reorder them,
/// only append.
#[must_use]
pub fn default_migrations() -> Vec<Migration> {
    vec![
        Migration::new(HEADER_PREFIX_TO_SEPARATE_BUCKETS, header_prefix::up),
        Migration::new(REMOVE_CLIQUE_BUCKET, remove_clique::up),
        // Marks the release that started stamping the schema version; the stamp itself is
        // written by the migrator after every run.
        Migration::new(DB_SCHEMA_VERSION, |tx, _, _, handshake| handshake.complete(tx)),
    ]
}
