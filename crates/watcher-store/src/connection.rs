use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::Result;
use crate::migrations;

/// Durable store handle. Wraps a single `rusqlite::Connection` in a mutex —
/// the persistence layer assumes a single writer, and a plain
/// `Mutex<Connection>` is the simplest way to uphold that.
pub struct Store {
    pub(crate) conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if necessary) the database at `path`, apply any
    /// pending migrations and return a ready handle.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut conn = Connection::open(path)?;
        configure(&mut conn)?;
        migrations::apply_pending(&mut conn, None)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory store for tests — same schema, no file on disk.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        configure(&mut conn)?;
        migrations::apply_pending(&mut conn, None)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// `(current_version, pending_versions)`, for the `db status` CLI command.
    pub fn migration_status(&self) -> Result<(i64, Vec<i64>)> {
        let conn = self.conn.lock().unwrap();
        migrations::status(&conn)
    }

    /// Apply pending migrations up to (and including) `target`, or every
    /// pending migration if `target` is `None`. `open`/`open_in_memory`
    /// already do this on every startup; this exists for the explicit
    /// `db migrate` CLI command.
    pub fn migrate(&self, target: Option<i64>) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        migrations::apply_pending(&mut conn, target)
    }
}

fn configure(conn: &mut Connection) -> Result<()> {
    // WAL mode so HTTP readers never block the single writer (§5).
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}
