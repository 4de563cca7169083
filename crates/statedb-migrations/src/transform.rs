//! Batched, resumable bucket rewrites.
//!
//! [`transform`] walks a source bucket in key order, lets the caller turn each entry into
//! writes and checkpoints after every batch with the last key read. A run that is cut short
//! picks up right after that key.
//!
//! Checkpoint tokens are `CURSOR_TOKEN_MARKER ++ last_key`, so a cursor sitting on the empty
//! key is distinct from a run that has not started.

use statedb_core::{ReadTx, RwTx, StoreResult};
use tracing::debug;

use crate::{Handshake, MigrationError};

pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// First byte of every checkpoint token written by [`transform`].
pub const CURSOR_TOKEN_MARKER: u8 = 0x01;

/// A single write produced while extracting a source entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Load {
    pub bucket: &'static str,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Load {
    pub fn new(bucket: &'static str, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self { bucket, key: key.into(), value: value.into() }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransformArgs<'a> {
    pub from_bucket: &'a str,
    /// Checkpoint token left by a previous run; empty to start from the beginning.
    pub progress: &'a [u8],
    pub batch_size: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransformStats {
    pub read: usize,
    pub loaded: usize,
    pub batches: usize,
}

/// Checkpoint token recording `last_key` as the last handled source key.
#[must_use]
pub fn cursor_token(last_key: &[u8]) -> Vec<u8> {
    let mut token = Vec::with_capacity(last_key.len() + 1);
    token.push(CURSOR_TOKEN_MARKER);
    token.extend_from_slice(last_key);
    token
}

/// Stream `args.from_bucket` through `extract`, writing what it emits.
///
/// # Errors
/// Returns [`MigrationError::InvalidCheckpoint`] when `args.progress` was not written by
/// this function, and otherwise the first error from `extract`, the store or the
/// checkpoint. Work committed by earlier checkpoints stays durable.
pub fn transform<E>(
    tx: &mut dyn RwTx,
    handshake: &mut Handshake<'_>,
    args: &TransformArgs<'_>,
    mut extract: E,
) -> Result<TransformStats, MigrationError>
where
    E: FnMut(&[u8], &[u8], &mut Vec<Load>) -> Result<(), MigrationError>,
{
    let batch_size = args.batch_size.max(1);
    let mut cursor = parse_cursor(handshake.name(), args.progress)?.map(<[u8]>::to_vec);
    let mut stats = TransformStats::default();
    let mut loads = Vec::new();

    loop {
        let start = cursor.as_deref().map_or_else(Vec::new, resume_key);
        let batch = read_batch(&*tx, args.from_bucket, &start, batch_size)?;
        let Some((last_key, _)) = batch.last() else {
            break;
        };
        let exhausted = batch.len() < batch_size;

        loads.clear();
        for (key, value) in &batch {
            extract(key, value, &mut loads)?;
        }
        for load in &loads {
            tx.put(load.bucket, &load.key, &load.value)?;
        }

        stats.read += batch.len();
        stats.loaded += loads.len();
        stats.batches += 1;

        handshake.checkpoint(tx, Some(&cursor_token(last_key)))?;
        cursor = Some(last_key.clone());
        debug!(
            bucket = args.from_bucket,
            read = stats.read,
            loaded = stats.loaded,
            "transform batch committed"
        );

        if exhausted {
            break;
        }
    }

    Ok(stats)
}

/// Last handled key stored in `token`, `None` when nothing was handled yet.
fn parse_cursor<'t>(name: &str, token: &'t [u8]) -> Result<Option<&'t [u8]>, MigrationError> {
    match token {
        [] => Ok(None),
        [CURSOR_TOKEN_MARKER, last_key @ ..] => Ok(Some(last_key)),
        _ => Err(MigrationError::InvalidCheckpoint {
            name: name.to_string(),
            token: hex::encode(token),
        }),
    }
}

/// Smallest key strictly greater than `cursor`.
fn resume_key(cursor: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(cursor.len() + 1);
    key.extend_from_slice(cursor);
    key.push(0);
    key
}

fn read_batch<T: ReadTx + ?Sized>(
    tx: &T,
    bucket: &str,
    start: &[u8],
    limit: usize,
) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut batch = Vec::with_capacity(limit.min(1024));
    tx.walk(bucket, start, 0, &mut |key, value| {
        batch.push((key.to_vec(), value.to_vec()));
        Ok(batch.len() < limit)
    })?;
    Ok(batch)
}
