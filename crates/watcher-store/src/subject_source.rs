use rusqlite::params;

use crate::connection::Store;
use crate::error::Result;

/// A join row recording that `subject_topic_key`'s insight drew on
/// `source_message_id` (itself filed under `source_topic_key`) during
/// `run_id`. Backs the `synthesize_to_global` node's provenance trail.
pub struct SubjectSourceLink<'a> {
    pub subject_topic_key: &'a str,
    pub source_message_id: &'a str,
    pub source_topic_key: &'a str,
    pub run_id: &'a str,
}

impl Store {
    pub fn insert_subject_source(&self, link: SubjectSourceLink<'_>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO subject_source \
             (subject_topic_key, source_message_id, source_topic_key, run_id) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                link.subject_topic_key,
                link.source_message_id,
                link.source_topic_key,
                link.run_id
            ],
        )?;
        Ok(())
    }

    pub fn list_sources_for_subject(&self, subject_topic_key: &str) -> Result<Vec<(String, String, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT source_message_id, source_topic_key, run_id FROM subject_source \
             WHERE subject_topic_key = ?1",
        )?;
        let rows = stmt.query_map(params![subject_topic_key], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}
