use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub mod contacts;
mod schema;

pub use schema::SCHEMA_VERSION;

/// How long a connection waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised by the contact store.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Could not find config directory")]
    NoConfigDir,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Contact {id} links to missing contact {linked_id}")]
    OrphanedLink { id: i64, linked_id: i64 },

    #[error("Link chain starting at contact {id} exceeds {max} hops")]
    LinkDepthExceeded { id: i64, max: usize },

    #[error("Corrupt contact data at {id}: {reason}")]
    CorruptRow { id: i64, reason: String },
}

impl DbError {
    /// Lock contention that a fresh attempt of the same transaction may clear.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at the default location, creating it if needed.
    pub fn open() -> Result<Self> {
        let path = Self::default_path()?;
        Self::open_at(path)
    }

    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys = ON;")?;

        let mut db = Self { conn };
        db.migrate()?;
        tracing::debug!(path = %path.display(), "contact store opened");
        Ok(db)
    }

    /// Open in-memory database for testing
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(DbError::NoConfigDir)?;
        Ok(config_dir.join("contactlink").join("contacts.db"))
    }

    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    /// Start a unit of work. The write lock is taken immediately so that two
    /// concurrent reconciliations cannot both read before either writes.
    /// Dropping the transaction without committing rolls it back.
    pub fn begin(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// A deferred transaction for reads through a shared handle. It is
    /// rolled back on drop, so it must not be used for writes.
    pub(crate) fn read(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    pub fn count_contacts(&self) -> Result<u32> {
        contacts::count_contacts(&self.read()?)
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    fn migrate(&mut self) -> Result<()> {
        let version = self.get_schema_version()?;

        if version == 0 {
            let tx = self.begin()?;
            tx.execute_batch(schema::SCHEMA_V1)?;
            tx.execute(
                "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
                [SCHEMA_VERSION],
            )?;
            tx.commit()?;
            tracing::info!(version = SCHEMA_VERSION, "installed contact schema");
        }

        Ok(())
    }

    fn get_schema_version(&self) -> Result<i32> {
        let result: rusqlite::Result<i32> =
            self.conn
                .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                    row.get(0)
                });

        match result {
            Ok(v) => Ok(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(rusqlite::Error::SqliteFailure(err, msg)) => {
                // "no such table" is reported as a generic SQLITE_ERROR
                if err.code == ErrorCode::Unknown
                    && msg.as_ref().is_some_and(|m| m.contains("no such table"))
                {
                    Ok(0)
                } else {
                    Err(rusqlite::Error::SqliteFailure(err, msg).into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let db = Database::open_memory().unwrap();
        assert_eq!(db.get_schema_version().unwrap(), SCHEMA_VERSION);
        assert_eq!(db.count_contacts().unwrap(), 0);
    }

    #[test]
    fn test_tables_exist() {
        let db = Database::open_memory().unwrap();

        let tables: Vec<String> = db
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"contacts".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("contacts.db");

        {
            let mut db = Database::open_at(&path).unwrap();
            let tx = db.begin().unwrap();
            contacts::create_contact(
                &tx,
                Some("a@x.com"),
                None,
                crate::models::LinkPrecedence::Primary,
            )
            .unwrap();
            tx.commit().unwrap();
        }

        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.get_schema_version().unwrap(), SCHEMA_VERSION);
        assert_eq!(db.count_contacts().unwrap(), 1);
    }

    #[test]
    fn test_uncommitted_transaction_rolls_back() {
        let mut db = Database::open_memory().unwrap();
        {
            let tx = db.begin().unwrap();
            contacts::create_contact(
                &tx,
                Some("a@x.com"),
                None,
                crate::models::LinkPrecedence::Primary,
            )
            .unwrap();
        }
        assert_eq!(db.count_contacts().unwrap(), 0);
    }

    #[test]
    fn test_busy_is_transient() {
        let busy = DbError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_transient());

        let constraint = DbError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        ));
        assert!(!constraint.is_transient());
        assert!(!DbError::OrphanedLink { id: 2, linked_id: 1 }.is_transient());
    }
}
