use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use statedb_core::buckets::BUCKETS;
use statedb_core::{
    matches_fixed_bits, ReadTx, RwTx, Store, StoreError, StoreResult, WalkVisitor,
};

const CREATE_KV_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS buckets (
  name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS kv (
  bucket TEXT NOT NULL,
  key BLOB NOT NULL,
  value BLOB NOT NULL,
  PRIMARY KEY (bucket, key)
) WITHOUT ROWID;
";

/// Key-value store kept in a single SQLite database.
///
/// Buckets are rows of the `buckets` catalogue; entries live in `kv`, ordered by
/// `(bucket, key)` with byte-wise key comparison.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a SQLite-backed store, configure pragmas and register every current bucket.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or initialized.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        conn.execute_batch(CREATE_KV_SCHEMA_SQL).context("failed to create key-value schema")?;

        for bucket in BUCKETS {
            conn.execute("INSERT OR IGNORE INTO buckets(name) VALUES (?1)", params![bucket])
                .with_context(|| format!("failed to register bucket {bucket}"))?;
        }

        Ok(Self { conn })
    }

    /// # Errors
    /// Returns an error when the in-memory database cannot be initialized.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Names of every registered bucket, sorted.
    ///
    /// # Errors
    /// Returns an error when the bucket catalogue cannot be read.
    pub fn bucket_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM buckets ORDER BY name ASC")
            .context("failed to prepare bucket listing")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row.context("failed to read bucket name")?);
        }
        Ok(names)
    }
}

impl Store for SqliteStore {
    type Ro<'a> = SqliteReadTx<'a>;
    type Rw<'a> = SqliteTx<'a>;

    fn begin_ro(&self) -> StoreResult<SqliteReadTx<'_>> {
        SqliteTx::begin(&self.conn, TransactionBehavior::Deferred).map(SqliteReadTx)
    }

    fn begin_rw(&self) -> StoreResult<SqliteTx<'_>> {
        SqliteTx::begin(&self.conn, TransactionBehavior::Immediate)
    }
}

/// Write transaction. Rolled back when dropped without [`RwTx::commit`].
pub struct SqliteTx<'conn> {
    conn: &'conn Connection,
    behavior: TransactionBehavior,
    tx: Option<Transaction<'conn>>,
}

/// Read-only view over a deferred transaction.
pub struct SqliteReadTx<'conn>(SqliteTx<'conn>);

impl<'conn> SqliteTx<'conn> {
    fn begin(conn: &'conn Connection, behavior: TransactionBehavior) -> StoreResult<Self> {
        let tx = Transaction::new_unchecked(conn, behavior).map_err(backend("begin"))?;
        Ok(Self { conn, behavior, tx: Some(tx) })
    }

    fn active(&self) -> StoreResult<&Transaction<'conn>> {
        self.tx.as_ref().ok_or(StoreError::TransactionClosed)
    }

    fn ensure_bucket(&self, bucket: &str) -> StoreResult<()> {
        if self.bucket_exists(bucket)? {
            Ok(())
        } else {
            Err(StoreError::UnknownBucket(bucket.to_string()))
        }
    }
}

impl ReadTx for SqliteTx<'_> {
    fn get(&self, bucket: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.ensure_bucket(bucket)?;
        self.active()?
            .prepare_cached("SELECT value FROM kv WHERE bucket = ?1 AND key = ?2")
            .and_then(|mut stmt| {
                stmt.query_row(params![bucket, key], |row| row.get::<_, Vec<u8>>(0)).optional()
            })
            .map_err(backend("get"))
    }

    fn walk(
        &self,
        bucket: &str,
        start_key: &[u8],
        fixed_bits: usize,
        visitor: &mut WalkVisitor<'_>,
    ) -> StoreResult<()> {
        self.ensure_bucket(bucket)?;
        let mut stmt = self
            .active()?
            .prepare_cached(
                "SELECT key, value FROM kv WHERE bucket = ?1 AND key >= ?2 ORDER BY key ASC",
            )
            .map_err(backend("walk"))?;
        let mut rows = stmt.query(params![bucket, start_key]).map_err(backend("walk"))?;

        while let Some(row) = rows.next().map_err(backend("walk"))? {
            let key = blob_column(row, 0)?;
            if !matches_fixed_bits(key, start_key, fixed_bits) {
                break;
            }
            let value = blob_column(row, 1)?;
            if !visitor(key, value)? {
                break;
            }
        }

        Ok(())
    }

    fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        let exists = self
            .active()?
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM buckets WHERE name = ?1)",
                params![bucket],
                |row| row.get::<_, i64>(0),
            )
            .map_err(backend("bucket_exists"))?;
        Ok(exists == 1)
    }
}

impl RwTx for SqliteTx<'_> {
    fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.ensure_bucket(bucket)?;
        self.active()?
            .execute(
                "INSERT INTO kv(bucket, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(bucket, key) DO UPDATE SET value = excluded.value",
                params![bucket, key, value],
            )
            .map_err(backend("put"))?;
        Ok(())
    }

    fn delete(&mut self, bucket: &str, key: &[u8]) -> StoreResult<()> {
        self.ensure_bucket(bucket)?;
        self.active()?
            .execute("DELETE FROM kv WHERE bucket = ?1 AND key = ?2", params![bucket, key])
            .map_err(backend("delete"))?;
        Ok(())
    }

    fn create_bucket(&mut self, bucket: &str) -> StoreResult<()> {
        self.active()?
            .execute("INSERT OR IGNORE INTO buckets(name) VALUES (?1)", params![bucket])
            .map_err(backend("create_bucket"))?;
        Ok(())
    }

    fn drop_buckets(&mut self, buckets: &[&str]) -> StoreResult<()> {
        let tx = self.active()?;
        for bucket in buckets {
            tx.execute("DELETE FROM kv WHERE bucket = ?1", params![bucket])
                .map_err(backend("drop_buckets"))?;
            tx.execute("DELETE FROM buckets WHERE name = ?1", params![bucket])
                .map_err(backend("drop_buckets"))?;
        }
        Ok(())
    }

    fn clear_buckets(&mut self, buckets: &[&str]) -> StoreResult<()> {
        for bucket in buckets {
            self.ensure_bucket(bucket)?;
            self.active()?
                .execute("DELETE FROM kv WHERE bucket = ?1", params![bucket])
                .map_err(backend("clear_buckets"))?;
        }
        Ok(())
    }

    fn commit_and_begin(&mut self) -> StoreResult<()> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.commit().map_err(backend("commit"))?;
        let next = Transaction::new_unchecked(self.conn, self.behavior).map_err(backend("begin"))?;
        self.tx = Some(next);
        Ok(())
    }

    fn commit(mut self) -> StoreResult<()> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.commit().map_err(backend("commit"))
    }
}

impl ReadTx for SqliteReadTx<'_> {
    fn get(&self, bucket: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.0.get(bucket, key)
    }

    fn walk(
        &self,
        bucket: &str,
        start_key: &[u8],
        fixed_bits: usize,
        visitor: &mut WalkVisitor<'_>,
    ) -> StoreResult<()> {
        self.0.walk(bucket, start_key, fixed_bits, visitor)
    }

    fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        self.0.bucket_exists(bucket)
    }
}

fn blob_column<'row>(row: &'row rusqlite::Row<'_>, index: usize) -> StoreResult<&'row [u8]> {
    row.get_ref(index)
        .map_err(backend("walk"))?
        .as_blob()
        .map_err(|err| StoreError::backend("walk", err))
}

fn backend(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |err| StoreError::backend(operation, err)
}
