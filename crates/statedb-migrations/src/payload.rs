//! Stage progress snapshot stored as the value of an applied migration.
//!
//! The payload is a CBOR map of text keys to byte strings: `<stage>` holds the stage's
//! forward progress and `unwind_<stage>` its unwind target, exactly as found in the stage
//! buckets. It is never read back by the engine; operators decode it to see where every
//! stage stood when a migration completed.

use std::collections::BTreeMap;

use serde_cbor::Value;
use statedb_core::buckets::{SYNC_STAGE_PROGRESS, SYNC_STAGE_UNWIND};
use statedb_core::{ReadTx, Stage, StoreResult};

use crate::MigrationError;

pub type StageSnapshot = BTreeMap<String, Vec<u8>>;

const UNWIND_KEY_PREFIX: &str = "unwind_";

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("failed to encode migration payload: {0}")]
    Encode(#[source] serde_cbor::Error),
    #[error("failed to decode migration payload: {0}")]
    Decode(#[source] serde_cbor::Error),
    #[error("migration payload is not a map")]
    NotAMap,
    #[error("migration payload entry {key} is not a text key with a byte string value")]
    UnexpectedEntry { key: String },
}

/// Raw progress values of every known stage, omitting stages that never recorded any.
///
/// # Errors
/// Returns an error when a stage bucket cannot be read.
pub fn stage_snapshot<T: ReadTx + ?Sized>(tx: &T) -> StoreResult<StageSnapshot> {
    let mut snapshot = StageSnapshot::new();

    for stage in Stage::ALL {
        let key = stage.as_str().as_bytes();
        if let Some(progress) = tx.get(SYNC_STAGE_PROGRESS, key)?.filter(|v| !v.is_empty()) {
            snapshot.insert(stage.as_str().to_string(), progress);
        }
        if let Some(unwind) = tx.get(SYNC_STAGE_UNWIND, key)?.filter(|v| !v.is_empty()) {
            snapshot.insert(format!("{UNWIND_KEY_PREFIX}{}", stage.as_str()), unwind);
        }
    }

    Ok(snapshot)
}

/// # Errors
/// Returns an error when the stage buckets cannot be read or the snapshot cannot be encoded.
pub fn marshal_migration_payload<T: ReadTx + ?Sized>(tx: &T) -> Result<Vec<u8>, MigrationError> {
    let snapshot = stage_snapshot(tx)?;
    Ok(encode_payload(&snapshot)?)
}

/// Block numbers recorded in a snapshot, keyed like the snapshot. Entries that name no known
/// stage or do not hold an 8-byte value are left out.
#[must_use]
pub fn snapshot_block_numbers(snapshot: &StageSnapshot) -> BTreeMap<String, u64> {
    snapshot
        .iter()
        .filter(|(key, _)| {
            let stage = key.strip_prefix(UNWIND_KEY_PREFIX).unwrap_or(key.as_str());
            Stage::parse(stage).is_some()
        })
        .filter_map(|(key, value)| {
            let bytes: [u8; 8] = value.as_slice().try_into().ok()?;
            Some((key.clone(), u64::from_be_bytes(bytes)))
        })
        .collect()
}

/// # Errors
/// Returns [`PayloadError::Encode`] when CBOR serialization fails.
pub fn encode_payload(snapshot: &StageSnapshot) -> Result<Vec<u8>, PayloadError> {
    let entries = snapshot
        .iter()
        .map(|(key, value)| (Value::Text(key.clone()), Value::Bytes(value.clone())))
        .collect::<BTreeMap<_, _>>();
    serde_cbor::to_vec(&Value::Map(entries)).map_err(PayloadError::Encode)
}

/// # Errors
/// Returns an error when `data` is not CBOR, not a map, or holds entries other than
/// text keys with byte-string values.
pub fn unmarshal_migration_payload(data: &[u8]) -> Result<StageSnapshot, PayloadError> {
    let value: Value = serde_cbor::from_slice(data).map_err(PayloadError::Decode)?;
    let Value::Map(entries) = value else {
        return Err(PayloadError::NotAMap);
    };

    let mut snapshot = StageSnapshot::new();
    for (key, value) in entries {
        match (key, value) {
            (Value::Text(key), Value::Bytes(value)) => {
                snapshot.insert(key, value);
            }
            (Value::Text(key), _) => return Err(PayloadError::UnexpectedEntry { key }),
            (other, _) => {
                return Err(PayloadError::UnexpectedEntry { key: format!("{other:?}") });
            }
        }
    }
    Ok(snapshot)
}
