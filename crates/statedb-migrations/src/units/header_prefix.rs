//! Splits the legacy `h` bucket into one bucket per record kind.
//!
//! Old key layouts under `h`:
//! - `num(8) ++ hash(32)` -> header, moved to `Header` unchanged
//! - `num(8) ++ hash(32) ++ 't'` -> total difficulty, moved to `HeadersTotalDifficulty`
//!   without the suffix
//! - `num(8) ++ 'n'` -> canonical hash, moved to `CanonicalHeader` keyed by `num` alone

use std::path::Path;

use statedb_core::buckets::{HEADERS, HEADER_CANONICAL, HEADER_PREFIX_OLD, HEADER_TD};
use statedb_core::{ReadTx, RwTx};
use tracing::info;

use crate::transform::{transform, Load, TransformArgs, DEFAULT_BATCH_SIZE};
use crate::{Handshake, MigrationError};

const NUMBER_LEN: usize = 8;
const HASH_LEN: usize = 32;
const HEADER_KEY_LEN: usize = NUMBER_LEN + HASH_LEN;
const TD_SUFFIX: u8 = b't';
const CANONICAL_SUFFIX: u8 = b'n';

pub(super) fn up(
    tx: &mut dyn RwTx,
    _scratch_dir: &Path,
    progress: &[u8],
    handshake: &mut Handshake<'_>,
) -> Result<(), MigrationError> {
    if !tx.bucket_exists(HEADER_PREFIX_OLD)? {
        return handshake.complete(tx);
    }

    // Leftovers from an unrelated earlier attempt would otherwise survive the copy.
    if progress.is_empty() {
        tx.clear_buckets(&[HEADERS, HEADER_TD, HEADER_CANONICAL])?;
    }

    let args = TransformArgs { from_bucket: HEADER_PREFIX_OLD, progress, batch_size: DEFAULT_BATCH_SIZE };
    let stats = transform(tx, handshake, &args, split_entry)?;

    tx.drop_buckets(&[HEADER_PREFIX_OLD])?;
    info!(read = stats.read, batches = stats.batches, "split legacy header bucket");
    handshake.complete(tx)
}

fn split_entry(key: &[u8], value: &[u8], loads: &mut Vec<Load>) -> Result<(), MigrationError> {
    let load = match (key.len(), key.last()) {
        (HEADER_KEY_LEN, _) => Load::new(HEADERS, key, value),
        (len, Some(&TD_SUFFIX)) if len == HEADER_KEY_LEN + 1 => {
            Load::new(HEADER_TD, &key[..HEADER_KEY_LEN], value)
        }
        (len, Some(&CANONICAL_SUFFIX)) if len == NUMBER_LEN + 1 => {
            Load::new(HEADER_CANONICAL, &key[..NUMBER_LEN], value)
        }
        _ => {
            return Err(MigrationError::UnexpectedKey {
                bucket: HEADER_PREFIX_OLD.to_string(),
                key: hex::encode(key),
            })
        }
    };
    loads.push(load);
    Ok(())
}
