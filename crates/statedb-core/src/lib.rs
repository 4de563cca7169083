pub mod buckets;
mod stages;
mod version;

use std::error::Error as StdError;

pub use stages::{
    get_stage_progress, get_stage_unwind, save_stage_progress, save_stage_unwind, Stage,
};
pub use version::{read_schema_version, write_schema_version, Backend, SchemaVersion};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown bucket: {0}")]
    UnknownBucket(String),
    #[error("transaction is closed")]
    TransactionClosed,
    #[error("corrupted value in bucket {bucket}: {reason}")]
    Corrupted { bucket: String, reason: String },
    #[error("{operation} failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },
}

impl StoreError {
    pub fn backend(
        operation: &'static str,
        source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self::Backend { operation, source: source.into() }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Visitor passed to [`ReadTx::walk`]; returning `false` stops the walk.
pub type WalkVisitor<'v> = dyn FnMut(&[u8], &[u8]) -> StoreResult<bool> + 'v;

pub trait ReadTx {
    /// Read one value from a bucket.
    ///
    /// # Errors
    /// Returns an error when the bucket does not exist or the backend read fails.
    fn get(&self, bucket: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Visit entries in key order starting at `start_key`, for as long as the first
    /// `fixed_bits` bits of the key equal those of `start_key`.
    ///
    /// # Errors
    /// Returns an error when the bucket does not exist, the backend read fails, or the
    /// visitor returns an error.
    fn walk(
        &self,
        bucket: &str,
        start_key: &[u8],
        fixed_bits: usize,
        visitor: &mut WalkVisitor<'_>,
    ) -> StoreResult<()>;

    /// # Errors
    /// Returns an error when the bucket catalogue cannot be read.
    fn bucket_exists(&self, bucket: &str) -> StoreResult<bool>;
}

pub trait RwTx: ReadTx {
    /// # Errors
    /// Returns an error when the bucket does not exist or the write fails.
    fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Remove a key; removing an absent key is not an error.
    ///
    /// # Errors
    /// Returns an error when the bucket does not exist or the write fails.
    fn delete(&mut self, bucket: &str, key: &[u8]) -> StoreResult<()>;

    /// Register a bucket. Creating an existing bucket is a no-op.
    ///
    /// # Errors
    /// Returns an error when the bucket catalogue cannot be written.
    fn create_bucket(&mut self, bucket: &str) -> StoreResult<()>;

    /// Remove buckets and all of their entries. Missing buckets are skipped.
    ///
    /// # Errors
    /// Returns an error when the backend write fails.
    fn drop_buckets(&mut self, buckets: &[&str]) -> StoreResult<()>;

    /// Remove every entry of the given buckets, keeping the buckets themselves.
    ///
    /// # Errors
    /// Returns an error when a bucket does not exist or the backend write fails.
    fn clear_buckets(&mut self, buckets: &[&str]) -> StoreResult<()>;

    /// Atomically commit everything written so far and open a fresh write transaction.
    ///
    /// # Errors
    /// Returns an error when the commit or the new begin fails. After a failed commit the
    /// transaction is closed and every further call returns [`StoreError::TransactionClosed`].
    fn commit_and_begin(&mut self) -> StoreResult<()>;

    /// # Errors
    /// Returns an error when the commit fails.
    fn commit(self) -> StoreResult<()>
    where
        Self: Sized;

    /// Discard uncommitted writes. Dropping a transaction has the same effect.
    fn rollback(self)
    where
        Self: Sized,
    {
        drop(self);
    }
}

pub trait Store {
    type Ro<'a>: ReadTx
    where
        Self: 'a;
    type Rw<'a>: RwTx
    where
        Self: 'a;

    /// # Errors
    /// Returns an error when a read transaction cannot be started.
    fn begin_ro(&self) -> StoreResult<Self::Ro<'_>>;

    /// Start the single write transaction. Uncommitted work is rolled back on drop.
    ///
    /// # Errors
    /// Returns an error when a write transaction cannot be started.
    fn begin_rw(&self) -> StoreResult<Self::Rw<'_>>;
}

/// Whether `key` shares its first `fixed_bits` bits with `start_key`.
///
/// Keys shorter than the fixed prefix never match.
#[must_use]
pub fn matches_fixed_bits(key: &[u8], start_key: &[u8], fixed_bits: usize) -> bool {
    if fixed_bits == 0 {
        return true;
    }

    let full_bytes = fixed_bits / 8;
    let rem_bits = fixed_bits % 8;
    let needed = full_bytes + usize::from(rem_bits > 0);
    if key.len() < needed || start_key.len() < needed {
        return false;
    }
    if key[..full_bytes] != start_key[..full_bytes] {
        return false;
    }
    if rem_bits == 0 {
        return true;
    }

    let mask = 0xFF_u8 << (8 - rem_bits);
    key[full_bytes] & mask == start_key[full_bytes] & mask
}
