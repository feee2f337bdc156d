use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::connection::Store;
use crate::error::Result;
use crate::model::{Message, VisibilityScope};

const MESSAGE_COLUMNS: &str = "id, channel_id, server_id, author_id, content, created_at, \
    visibility_scope, reply_target_id, thread_id, has_media, has_link, ingested_at, deleted_at";

const MESSAGE_COLUMNS_M: &str = "m.id, m.channel_id, m.server_id, m.author_id, m.content, m.created_at, \
    m.visibility_scope, m.reply_target_id, m.thread_id, m.has_media, m.has_link, m.ingested_at, m.deleted_at";

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let scope_raw: String = row.get(6)?;
    Ok(Message {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        server_id: row.get(2)?,
        author_id: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
        visibility_scope: scope_raw.parse().unwrap_or(VisibilityScope::Public),
        reply_target_id: row.get(7)?,
        thread_id: row.get(8)?,
        has_media: row.get::<_, i64>(9)? != 0,
        has_link: row.get::<_, i64>(10)? != 0,
        ingested_at: row.get(11)?,
        deleted_at: row.get(12)?,
    })
}

pub struct NewMessage<'a> {
    /// The adapter's own message id, preserved verbatim (§3: "external ids
    /// ... are preserved verbatim"). Re-inserting the same id is a no-op.
    pub id: &'a str,
    pub channel_id: &'a str,
    pub server_id: Option<&'a str>,
    pub author_id: Option<&'a str>,
    pub content: &'a str,
    pub created_at: &'a str,
    pub visibility_scope: VisibilityScope,
    pub reply_target_id: Option<&'a str>,
    pub thread_id: Option<&'a str>,
    pub has_media: bool,
    pub has_link: bool,
}

impl Store {
    /// Inserts a message keyed by its external id. Upsert semantics: a
    /// second call with the same id leaves the stored row untouched and
    /// reports `is_new = false`, so a caller processing the same observed
    /// message twice can skip running the earning rules a second time.
    pub fn insert_message(&self, msg: NewMessage<'_>) -> Result<(Message, bool)> {
        let conn = self.conn.lock().unwrap();
        let ingested_at = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO messages (id, channel_id, server_id, author_id, content, created_at, \
             visibility_scope, reply_target_id, thread_id, has_media, has_link, ingested_at, deleted_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL) \
             ON CONFLICT(id) DO NOTHING",
            params![
                msg.id,
                msg.channel_id,
                msg.server_id,
                msg.author_id,
                msg.content,
                msg.created_at,
                msg.visibility_scope.to_string(),
                msg.reply_target_id,
                msg.thread_id,
                msg.has_media as i64,
                msg.has_link as i64,
                ingested_at,
            ],
        )?;
        let is_new = conn.changes() > 0;
        let stored = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![msg.id],
                row_to_message,
            )
            .map_err(crate::error::StoreError::from)?;
        Ok((stored, is_new))
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let conn = self.conn.lock().unwrap();
        let message = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    pub fn mark_message_deleted(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE messages SET deleted_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Non-deleted messages in a channel, newest first, capped at `limit`.
    pub fn list_channel_messages(&self, channel_id: &str, limit: u32) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE channel_id = ?1 AND deleted_at IS NULL \
             ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![channel_id, limit], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn list_thread_messages(&self, thread_id: &str, limit: u32) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE thread_id = ?1 AND deleted_at IS NULL \
             ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![thread_id, limit], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn list_author_messages(&self, author_id: &str, limit: u32) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE author_id = ?1 AND deleted_at IS NULL \
             ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![author_id, limit], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Messages showing actual interaction between two authors, not scoped
    /// to any one channel: one replying to the other, or both posting in
    /// the same thread. Feeds `dyad:<a>:<b>` fetch_messages nodes, where the
    /// window spans every channel the pair shares. Use
    /// [`Store::list_dyad_messages`] for the channel-scoped `dyad_in_channel`
    /// topic.
    pub fn list_dyad_interaction_messages(&self, a: &str, b: &str, limit: u32) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();

        let mut reply_stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS_M} FROM messages AS m \
             JOIN messages AS parent ON parent.id = m.reply_target_id \
             WHERE m.deleted_at IS NULL \
             AND ((m.author_id = ?1 AND parent.author_id = ?2) OR (m.author_id = ?2 AND parent.author_id = ?1)) \
             ORDER BY m.created_at DESC LIMIT ?3"
        ))?;
        let mut out: Vec<Message> = reply_stmt
            .query_map(params![a, b, limit], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();

        let mut thread_stmt = conn.prepare(
            "SELECT DISTINCT thread_id FROM messages \
             WHERE thread_id IS NOT NULL AND deleted_at IS NULL AND author_id = ?1 \
             INTERSECT \
             SELECT DISTINCT thread_id FROM messages \
             WHERE thread_id IS NOT NULL AND deleted_at IS NULL AND author_id = ?2",
        )?;
        let thread_ids: Vec<String> = thread_stmt
            .query_map(params![a, b], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();

        for thread_id in thread_ids {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages \
                 WHERE thread_id = ?1 AND deleted_at IS NULL AND (author_id = ?2 OR author_id = ?3) \
                 ORDER BY created_at DESC LIMIT ?4"
            ))?;
            let rows = stmt.query_map(params![thread_id, a, b, limit], row_to_message)?;
            out.extend(rows.filter_map(|r| r.ok()));
        }

        Ok(out)
    }

    /// Messages between two authors in either direction within a channel,
    /// feeding dyad-topic fetch_messages nodes.
    pub fn list_dyad_messages(&self, channel_id: &str, a: &str, b: &str, limit: u32) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE channel_id = ?1 AND deleted_at IS NULL \
             AND (author_id = ?2 OR author_id = ?3) \
             ORDER BY created_at DESC LIMIT ?4"
        ))?;
        let rows = stmt.query_map(params![channel_id, a, b, limit], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Distinct thread ids observed attached to `channel_id`, used by
    /// related-topic derivation to find a thread's parent channel.
    pub fn list_thread_ids_for_channel(&self, channel_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT thread_id FROM messages WHERE channel_id = ?1 AND thread_id IS NOT NULL",
        )?;
        let rows = stmt.query_map(params![channel_id], |row| row.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Distinct participant author ids seen in `thread_id`, used by
    /// dyad-in-thread style message fetches.
    pub fn list_thread_participants(&self, thread_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT author_id FROM messages \
             WHERE thread_id = ?1 AND author_id IS NOT NULL AND deleted_at IS NULL",
        )?;
        let rows = stmt.query_map(params![thread_id], |row| row.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Messages from every thread the given author has posted in at least
    /// once, newest first — backs `fetch_messages` for `user:<id>` topics,
    /// selecting "messages in threads where U participated".
    pub fn list_user_thread_messages(&self, author_id: &str, limit: u32) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE deleted_at IS NULL AND thread_id IN ( \
                 SELECT DISTINCT thread_id FROM messages \
                 WHERE author_id = ?1 AND thread_id IS NOT NULL AND deleted_at IS NULL \
             ) \
             ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![author_id, limit], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn count_replies_to(&self, message_id: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE reply_target_id = ?1 AND deleted_at IS NULL",
            params![message_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }
}
