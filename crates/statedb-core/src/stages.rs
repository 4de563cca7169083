use serde::Serialize;

use crate::buckets::{SYNC_STAGE_PROGRESS, SYNC_STAGE_UNWIND};
use crate::{ReadTx, RwTx, StoreError, StoreResult};

/// Sync pipeline stages, in execution order. Serializes as its bucket key.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Stage {
    Headers,
    BlockHashes,
    Bodies,
    Senders,
    Execution,
    IntermediateHashes,
    HashState,
    AccountHistoryIndex,
    StorageHistoryIndex,
    LogIndex,
    CallTraces,
    TxLookup,
    TxPool,
    Finish,
}

impl Stage {
    pub const ALL: [Stage; 14] = [
        Self::Headers,
        Self::BlockHashes,
        Self::Bodies,
        Self::Senders,
        Self::Execution,
        Self::IntermediateHashes,
        Self::HashState,
        Self::AccountHistoryIndex,
        Self::StorageHistoryIndex,
        Self::LogIndex,
        Self::CallTraces,
        Self::TxLookup,
        Self::TxPool,
        Self::Finish,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Headers => "Headers",
            Self::BlockHashes => "BlockHashes",
            Self::Bodies => "Bodies",
            Self::Senders => "Senders",
            Self::Execution => "Execution",
            Self::IntermediateHashes => "IntermediateHashes",
            Self::HashState => "HashState",
            Self::AccountHistoryIndex => "AccountHistoryIndex",
            Self::StorageHistoryIndex => "StorageHistoryIndex",
            Self::LogIndex => "LogIndex",
            Self::CallTraces => "CallTraces",
            Self::TxLookup => "TxLookup",
            Self::TxPool => "TxPool",
            Self::Finish => "Finish",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == value)
    }
}

/// Forward progress of a stage; `0` when the stage never ran.
///
/// # Errors
/// Returns an error when the read fails or the stored value is not 8 bytes.
pub fn get_stage_progress<T: ReadTx + ?Sized>(tx: &T, stage: Stage) -> StoreResult<u64> {
    read_block_number(tx, SYNC_STAGE_PROGRESS, stage)
}

/// # Errors
/// Returns an error when the write fails.
pub fn save_stage_progress<T: RwTx + ?Sized>(tx: &mut T, stage: Stage, block: u64) -> StoreResult<()> {
    tx.put(SYNC_STAGE_PROGRESS, stage.as_str().as_bytes(), &block.to_be_bytes())
}

/// Block a stage was asked to unwind to; `0` when no unwind is pending.
///
/// # Errors
/// Returns an error when the read fails or the stored value is not 8 bytes.
pub fn get_stage_unwind<T: ReadTx + ?Sized>(tx: &T, stage: Stage) -> StoreResult<u64> {
    read_block_number(tx, SYNC_STAGE_UNWIND, stage)
}

/// # Errors
/// Returns an error when the write fails.
pub fn save_stage_unwind<T: RwTx + ?Sized>(tx: &mut T, stage: Stage, block: u64) -> StoreResult<()> {
    tx.put(SYNC_STAGE_UNWIND, stage.as_str().as_bytes(), &block.to_be_bytes())
}

fn read_block_number<T: ReadTx + ?Sized>(tx: &T, bucket: &str, stage: Stage) -> StoreResult<u64> {
    let Some(value) = tx.get(bucket, stage.as_str().as_bytes())? else {
        return Ok(0);
    };
    if value.is_empty() {
        return Ok(0);
    }

    let bytes: [u8; 8] = value.as_slice().try_into().map_err(|_| StoreError::Corrupted {
        bucket: bucket.to_string(),
        reason: format!("stage {} holds {} bytes, expected 8", stage.as_str(), value.len()),
    })?;
    Ok(u64::from_be_bytes(bytes))
}
