use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::connection::Store;
use crate::error::Result;
use crate::model::Topic;

fn row_to_topic(row: &rusqlite::Row<'_>) -> rusqlite::Result<Topic> {
    Ok(Topic {
        key: row.get(0)?,
        category: row.get(1)?,
        scope: row.get(2)?,
        provisional: row.get::<_, i64>(3)? != 0,
        created_at: row.get(4)?,
        last_activity_at: row.get(5)?,
    })
}

const TOPIC_COLUMNS: &str = "key, category, scope, provisional, created_at, last_activity_at";

impl Store {
    pub fn get_topic(&self, key: &str) -> Result<Option<Topic>> {
        let conn = self.conn.lock().unwrap();
        let topic = conn
            .query_row(
                &format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE key = ?1"),
                params![key],
                row_to_topic,
            )
            .optional()?;
        Ok(topic)
    }

    /// Insert the topic if absent; otherwise leave it untouched. Does not
    /// bump `last_activity_at` — callers do that explicitly via
    /// [`Store::touch_topic`] so reads of the topic don't look like activity.
    pub fn upsert_topic(&self, key: &str, category: &str, scope: &str, provisional: bool) -> Result<Topic> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO topics (key, category, scope, provisional, created_at, last_activity_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(key) DO NOTHING",
            params![key, category, scope, provisional as i64, now],
        )?;
        conn.query_row(
            &format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE key = ?1"),
            params![key],
            row_to_topic,
        )
        .map_err(Into::into)
    }

    pub fn touch_topic(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE topics SET last_activity_at = ?1 WHERE key = ?2",
            params![Utc::now().to_rfc3339(), key],
        )?;
        Ok(())
    }

    /// Force `last_activity_at` to an explicit timestamp. Used by decay
    /// tests to simulate inactivity windows without sleeping.
    pub fn set_last_activity_at(&self, key: &str, when: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE topics SET last_activity_at = ?1 WHERE key = ?2",
            params![when, key],
        )?;
        Ok(())
    }

    /// Topics whose `last_activity_at` is older than `before` (or null).
    pub fn list_inactive_topics(&self, before: &str) -> Result<Vec<Topic>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOPIC_COLUMNS} FROM topics WHERE last_activity_at < ?1 OR last_activity_at IS NULL"
        ))?;
        let rows = stmt.query_map(params![before], row_to_topic)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All topics whose key matches `category`, used by related-topic
    /// derivation (e.g. every dyad containing a given user).
    pub fn list_topics_by_category(&self, category: &str) -> Result<Vec<Topic>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOPIC_COLUMNS} FROM topics WHERE category = ?1"
        ))?;
        let rows = stmt.query_map(params![category], row_to_topic)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All topics in `scope` matching `category`, e.g. every dyad in server S.
    pub fn list_topics_by_category_and_scope(&self, category: &str, scope: &str) -> Result<Vec<Topic>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOPIC_COLUMNS} FROM topics WHERE category = ?1 AND scope = ?2"
        ))?;
        let rows = stmt.query_map(params![category, scope], row_to_topic)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}
