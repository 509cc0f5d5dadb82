use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use crate::db::init_db;
use crate::error::Result;

/// Thread-safe handle to the durable store.
///
/// Wraps a single SQLite connection in a `Mutex`; every query takes the lock
/// briefly and never holds it across an await point. Lock poisoning is not
/// recoverable here, so the `lock().unwrap()` idiom is used throughout the
/// impl modules.
pub struct Store {
    pub(crate) db: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and initialise the schema.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            // Ignore failures here: open() reports them with more context.
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_db(&conn)?;
        info!(path, "durable store opened");
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Wrap an already-open connection (used by tests with `:memory:`).
    pub fn from_connection(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub(crate) fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }
}
