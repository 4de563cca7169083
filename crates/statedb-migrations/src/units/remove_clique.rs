use std::path::Path;

use statedb_core::buckets::CLIQUE;
use statedb_core::{ReadTx, RwTx};
use tracing::info;

use crate::{Handshake, MigrationError};

pub(super) fn up(
    tx: &mut dyn RwTx,
    _scratch_dir: &Path,
    _progress: &[u8],
    handshake: &mut Handshake<'_>,
) -> Result<(), MigrationError> {
    if tx.bucket_exists(CLIQUE)? {
        tx.drop_buckets(&[CLIQUE])?;
        info!(bucket = CLIQUE, "dropped deprecated bucket");
    }
    handshake.complete(tx)
}
