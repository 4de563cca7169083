use std::fmt::{Display, Formatter};

use crate::buckets::{DATABASE_INFO, DB_SCHEMA_VERSION_KEY};
use crate::{ReadTx, RwTx, StoreError, StoreResult};

/// Backend-specific schema generation stamped after migrations run.
///
/// Stored as three consecutive big-endian `u32` fields: major, minor, patch.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SchemaVersion {
    pub const ENCODED_LEN: usize = 12;

    pub const LMDB: Self = Self { major: 1, minor: 0, patch: 0 };
    pub const MDBX: Self = Self { major: 2, minor: 0, patch: 0 };

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0_u8; Self::ENCODED_LEN];
        out[..4].copy_from_slice(&self.major.to_be_bytes());
        out[4..8].copy_from_slice(&self.minor.to_be_bytes());
        out[8..].copy_from_slice(&self.patch.to_be_bytes());
        out
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; Self::ENCODED_LEN] = bytes.try_into().ok()?;
        let field = |offset: usize| {
            u32::from_be_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])
        };
        Some(Self { major: field(0), minor: field(4), patch: field(8) })
    }
}

impl Display for SchemaVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Storage backend variant the node runs on; selects the stamped [`SchemaVersion`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Backend {
    Lmdb,
    Mdbx,
}

impl Backend {
    #[must_use]
    pub fn schema_version(self) -> SchemaVersion {
        match self {
            Self::Lmdb => SchemaVersion::LMDB,
            Self::Mdbx => SchemaVersion::MDBX,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lmdb => "lmdb",
            Self::Mdbx => "mdbx",
        }
    }
}

/// # Errors
/// Returns an error when the read fails or the stored record is not 12 bytes.
pub fn read_schema_version<T: ReadTx + ?Sized>(tx: &T) -> StoreResult<Option<SchemaVersion>> {
    let Some(raw) = tx.get(DATABASE_INFO, DB_SCHEMA_VERSION_KEY)? else {
        return Ok(None);
    };
    SchemaVersion::from_bytes(&raw).map(Some).ok_or_else(|| StoreError::Corrupted {
        bucket: DATABASE_INFO.to_string(),
        reason: format!(
            "schema version holds {} bytes, expected {}",
            raw.len(),
            SchemaVersion::ENCODED_LEN
        ),
    })
}

/// # Errors
/// Returns an error when the write fails.
pub fn write_schema_version<T: RwTx + ?Sized>(tx: &mut T, version: SchemaVersion) -> StoreResult<()> {
    tx.put(DATABASE_INFO, DB_SCHEMA_VERSION_KEY, &version.to_bytes())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn encodes_as_three_big_endian_words() {
        let version = SchemaVersion { major: 2, minor: 1, patch: 258 };
        assert_eq!(version.to_bytes(), [0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 1, 2]);
        assert_eq!(version.to_string(), "2.1.258");
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(SchemaVersion::from_bytes(&[0; 11]), None);
        assert_eq!(SchemaVersion::from_bytes(&[0; 13]), None);
    }

    #[test]
    fn backend_selects_its_version() {
        assert_eq!(Backend::Lmdb.schema_version(), SchemaVersion::LMDB);
        assert_eq!(Backend::Mdbx.schema_version(), SchemaVersion::MDBX);
        assert_ne!(SchemaVersion::LMDB, SchemaVersion::MDBX);
    }

    proptest! {
        #[test]
        fn property_decoding_inverts_encoding(major in any::<u32>(), minor in any::<u32>(), patch in any::<u32>()) {
            let version = SchemaVersion { major, minor, patch };
            prop_assert_eq!(SchemaVersion::from_bytes(&version.to_bytes()), Some(version));
        }
    }
}
