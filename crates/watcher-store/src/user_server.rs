use chrono::Utc;
use rusqlite::params;

use crate::connection::Store;
use crate::error::Result;

impl Store {
    /// Records that `user_id` has been seen active in `server_id`. No-op if
    /// already recorded. Returns the number of distinct servers the user
    /// has now been seen in, which the global-warming trigger compares
    /// against its two-server threshold.
    pub fn record_user_server_activity(&self, user_id: &str, server_id: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO user_server_activity (user_id, server_id, first_seen_at) \
             VALUES (?1, ?2, ?3)",
            params![user_id, server_id, Utc::now().to_rfc3339()],
        )?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT server_id) FROM user_server_activity WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    pub fn distinct_server_count(&self, user_id: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT server_id) FROM user_server_activity WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }
}
