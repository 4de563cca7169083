//! Bucket names of the node's state database.
//!
//! Every bucket in [`BUCKETS`] is registered when a store is opened. Buckets in
//! [`DEPRECATED_BUCKETS`] are only found in databases written by older releases and are
//! removed by migrations.

/// Applied migrations (`<name>` -> stage snapshot) and their checkpoints
/// (`_progress_<name>` -> resume token).
pub const MIGRATIONS: &str = "Migration";

/// Database metadata such as the schema version.
pub const DATABASE_INFO: &str = "DbInfo";

/// Forward progress per sync stage: stage name -> 8-byte big-endian block number.
pub const SYNC_STAGE_PROGRESS: &str = "SSP2";

/// Unwind target per sync stage: stage name -> 8-byte big-endian block number.
pub const SYNC_STAGE_UNWIND: &str = "SSU2";

/// Headers: block_num (8 BE) + block_hash (32) -> rlp header.
pub const HEADERS: &str = "Header";

/// Total difficulty: block_num (8 BE) + block_hash (32) -> total difficulty.
pub const HEADER_TD: &str = "HeadersTotalDifficulty";

/// Canonical chain: block_num (8 BE) -> block_hash.
pub const HEADER_CANONICAL: &str = "CanonicalHeader";

/// Header number lookup: block_hash -> block_num (8 BE).
pub const HEADER_NUMBER: &str = "HeaderNumber";

pub const BLOCK_BODIES: &str = "BlockBody";
pub const SENDERS: &str = "TxSender";
pub const PLAIN_STATE: &str = "PLAIN-CST2";

/// Pre-split header bucket that mixed headers, total difficulty and canonical hashes under
/// one key space.
pub const HEADER_PREFIX_OLD: &str = "h";

/// Consensus snapshots of the retired clique engine.
pub const CLIQUE: &str = "clique-";

/// Key of the schema version record inside [`DATABASE_INFO`].
pub const DB_SCHEMA_VERSION_KEY: &[u8] = b"DBSchemaVersion";

pub const BUCKETS: &[&str] = &[
    MIGRATIONS,
    DATABASE_INFO,
    SYNC_STAGE_PROGRESS,
    SYNC_STAGE_UNWIND,
    HEADERS,
    HEADER_TD,
    HEADER_CANONICAL,
    HEADER_NUMBER,
    BLOCK_BODIES,
    SENDERS,
    PLAIN_STATE,
];

pub const DEPRECATED_BUCKETS: &[&str] = &[HEADER_PREFIX_OLD, CLIQUE];

#[must_use]
pub fn is_deprecated(bucket: &str) -> bool {
    DEPRECATED_BUCKETS.contains(&bucket)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn bucket_names_are_unique_and_disjoint_from_deprecated() {
        let current = BUCKETS.iter().copied().collect::<BTreeSet<_>>();
        assert_eq!(current.len(), BUCKETS.len());
        assert!(DEPRECATED_BUCKETS.iter().all(|bucket| !current.contains(bucket)));
        assert!(is_deprecated(CLIQUE));
        assert!(!is_deprecated(MIGRATIONS));
    }
}
