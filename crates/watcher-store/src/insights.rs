use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::connection::Store;
use crate::error::Result;
use crate::model::{CrossLinks, Insight, VisibilityScope};

const INSIGHT_COLUMNS: &str = "id, topic_key, category, content, sources_scope_max, created_at, \
    run_id, salience_spent, strength_adjustment, strength, confidence, importance, novelty, \
    joy, concern, curiosity, warmth, tension, supersedes, quarantined, \
    context_channel, context_thread, context_subject, context_participants, \
    conflicts_with, conflict_resolved, synthesis_sources";

fn row_to_insight(row: &rusqlite::Row<'_>) -> rusqlite::Result<Insight> {
    let scope_raw: String = row.get(4)?;
    let participants_raw: String = row.get(23)?;
    let conflicts_raw: String = row.get(24)?;
    let synthesis_raw: String = row.get(26)?;
    Ok(Insight {
        id: row.get(0)?,
        topic_key: row.get(1)?,
        category: row.get(2)?,
        content: row.get(3)?,
        sources_scope_max: scope_raw.parse().unwrap_or(VisibilityScope::Public),
        created_at: row.get(5)?,
        run_id: row.get(6)?,
        salience_spent: row.get(7)?,
        strength_adjustment: row.get(8)?,
        strength: row.get(9)?,
        confidence: row.get(10)?,
        importance: row.get(11)?,
        novelty: row.get(12)?,
        valence: crate::model::Valence {
            joy: row.get(13)?,
            concern: row.get(14)?,
            curiosity: row.get(15)?,
            warmth: row.get(16)?,
            tension: row.get(17)?,
        },
        supersedes: row.get(18)?,
        quarantined: row.get::<_, i64>(19)? != 0,
        cross_links: CrossLinks {
            context_channel: row.get(20)?,
            context_thread: row.get(21)?,
            context_subject: row.get(22)?,
            participants: serde_json::from_str(&participants_raw).unwrap_or_default(),
        },
        conflicts_with: serde_json::from_str(&conflicts_raw).unwrap_or_default(),
        conflict_resolved: row.get::<_, i64>(25)? != 0,
        synthesis_sources: serde_json::from_str(&synthesis_raw).unwrap_or_default(),
    })
}

/// Fields needed to persist a newly-synthesized insight; `id`/`created_at`
/// are assigned by the store.
pub struct NewInsight {
    pub topic_key: String,
    pub category: String,
    pub content: String,
    pub sources_scope_max: VisibilityScope,
    pub run_id: String,
    pub salience_spent: f64,
    pub strength_adjustment: f64,
    pub strength: f64,
    pub confidence: f64,
    pub importance: f64,
    pub novelty: f64,
    pub valence: crate::model::Valence,
    pub supersedes: Option<String>,
    pub cross_links: CrossLinks,
    pub conflicts_with: Vec<String>,
    pub synthesis_sources: Vec<String>,
}

/// Inserts `new` using an already-open connection or transaction. Shared by
/// [`Store::insert_insight`] and `Store::spend_and_insert_insight` so the
/// latter can run the insert inside its own transaction without re-locking
/// the store's connection.
pub(crate) fn insert_insight_tx(conn: &rusqlite::Connection, new: NewInsight) -> Result<Insight> {
    let id = Uuid::now_v7().to_string();
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO insights (
            id, topic_key, category, content, sources_scope_max, created_at,
            run_id, salience_spent, strength_adjustment, strength, confidence, importance, novelty,
            joy, concern, curiosity, warmth, tension, supersedes, quarantined,
            context_channel, context_thread, context_subject, context_participants,
            conflicts_with, conflict_resolved, synthesis_sources
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
            ?14, ?15, ?16, ?17, ?18, ?19, 0,
            ?20, ?21, ?22, ?23, ?24, 0, ?25
        )",
        params![
            id,
            new.topic_key,
            new.category,
            new.content,
            new.sources_scope_max.to_string(),
            created_at,
            new.run_id,
            new.salience_spent,
            new.strength_adjustment,
            new.strength,
            new.confidence,
            new.importance,
            new.novelty,
            new.valence.joy,
            new.valence.concern,
            new.valence.curiosity,
            new.valence.warmth,
            new.valence.tension,
            new.supersedes,
            new.cross_links.context_channel,
            new.cross_links.context_thread,
            new.cross_links.context_subject,
            serde_json::to_string(&new.cross_links.participants).unwrap_or_else(|_| "[]".into()),
            serde_json::to_string(&new.conflicts_with).unwrap_or_else(|_| "[]".into()),
            serde_json::to_string(&new.synthesis_sources).unwrap_or_else(|_| "[]".into()),
        ],
    )?;
    conn.query_row(
        &format!("SELECT {INSIGHT_COLUMNS} FROM insights WHERE id = ?1"),
        params![id],
        row_to_insight,
    )
    .map_err(Into::into)
}

impl Store {
    pub fn insert_insight(&self, new: NewInsight) -> Result<Insight> {
        let conn = self.conn.lock().unwrap();
        insert_insight_tx(&conn, new)
    }

    pub fn get_insight(&self, id: &str) -> Result<Option<Insight>> {
        let conn = self.conn.lock().unwrap();
        let insight = conn
            .query_row(
                &format!("SELECT {INSIGHT_COLUMNS} FROM insights WHERE id = ?1"),
                params![id],
                row_to_insight,
            )
            .optional()?;
        Ok(insight)
    }

    /// Non-quarantined insights for a topic+category, oldest first — the
    /// order retrieval profiles expect before applying recency weighting.
    pub fn list_insights_by_topic_category(&self, topic_key: &str, category: &str, limit: u32) -> Result<Vec<Insight>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {INSIGHT_COLUMNS} FROM insights \
             WHERE topic_key = ?1 AND category = ?2 AND quarantined = 0 \
             ORDER BY created_at ASC LIMIT ?3"
        ))?;
        let rows = stmt.query_map(params![topic_key, category, limit], row_to_insight)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Non-quarantined insights for a topic ordered by strength descending.
    pub fn list_insights_by_topic_strength(&self, topic_key: &str, limit: u32) -> Result<Vec<Insight>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {INSIGHT_COLUMNS} FROM insights \
             WHERE topic_key = ?1 AND quarantined = 0 \
             ORDER BY strength DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![topic_key, limit], row_to_insight)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Insights for a topic ordered by creation time descending, optionally
    /// including quarantined ones. Backs retrieval-profile recency fetches.
    pub fn list_insights_by_topic_recency(&self, topic_key: &str, limit: u32, include_quarantined: bool) -> Result<Vec<Insight>> {
        let conn = self.conn.lock().unwrap();
        let sql = if include_quarantined {
            format!("SELECT {INSIGHT_COLUMNS} FROM insights WHERE topic_key = ?1 ORDER BY created_at DESC LIMIT ?2")
        } else {
            format!(
                "SELECT {INSIGHT_COLUMNS} FROM insights WHERE topic_key = ?1 AND quarantined = 0 \
                 ORDER BY created_at DESC LIMIT ?2"
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![topic_key, limit], row_to_insight)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Insights for a topic ordered by strength descending, optionally
    /// including quarantined ones, excluding a set of already-returned ids.
    pub fn list_insights_by_topic_strength_excluding(
        &self,
        topic_key: &str,
        limit: u32,
        include_quarantined: bool,
        exclude_ids: &[String],
    ) -> Result<Vec<Insight>> {
        let conn = self.conn.lock().unwrap();
        let sql = if include_quarantined {
            format!("SELECT {INSIGHT_COLUMNS} FROM insights WHERE topic_key = ?1 ORDER BY strength DESC")
        } else {
            format!(
                "SELECT {INSIGHT_COLUMNS} FROM insights WHERE topic_key = ?1 AND quarantined = 0 \
                 ORDER BY strength DESC"
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![topic_key], row_to_insight)?;
        let mut out = Vec::new();
        for row in rows {
            let insight = row?;
            if exclude_ids.contains(&insight.id) {
                continue;
            }
            out.push(insight);
            if out.len() as u32 >= limit {
                break;
            }
        }
        Ok(out)
    }

    pub fn list_insights_by_run(&self, run_id: &str) -> Result<Vec<Insight>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {INSIGHT_COLUMNS} FROM insights WHERE run_id = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(params![run_id], row_to_insight)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Backdates a row's `created_at` (RFC3339). Used by tests to seed
    /// insights at a known age for retrieval-profile assertions.
    pub fn set_insight_created_at(&self, id: &str, created_at: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE insights SET created_at = ?1 WHERE id = ?2",
            params![created_at, id],
        )?;
        Ok(())
    }

    pub fn set_insight_quarantined(&self, id: &str, quarantined: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE insights SET quarantined = ?1 WHERE id = ?2",
            params![quarantined as i64, id],
        )?;
        Ok(())
    }

    pub fn set_insight_conflicts(&self, id: &str, conflicts_with: &[String], resolved: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE insights SET conflicts_with = ?1, conflict_resolved = ?2 WHERE id = ?3",
            params![
                serde_json::to_string(conflicts_with).unwrap_or_else(|_| "[]".into()),
                resolved as i64,
                id
            ],
        )?;
        Ok(())
    }

    /// Count of insights in `category` created after `since` (RFC3339),
    /// used by threshold-driven activation (§4.F) to evaluate whether a
    /// layer's trigger count has crossed its configured threshold.
    pub fn count_insights_since(&self, category: &str, since: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM insights WHERE category = ?1 AND created_at > ?2",
            params![category, since],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Browse non-quarantined insights newest-first, optionally filtered to
    /// one category and/or created after `since` (RFC3339). Backs
    /// `GET /insights`.
    pub fn browse_insights(
        &self,
        category: Option<&str>,
        since: Option<&str>,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Insight>> {
        let conn = self.conn.lock().unwrap();
        let mut clauses = vec!["quarantined = 0".to_string()];
        if category.is_some() {
            clauses.push("category = ?1".to_string());
        }
        if since.is_some() {
            let idx = if category.is_some() { 2 } else { 1 };
            clauses.push(format!("created_at > ?{idx}"));
        }
        let where_clause = clauses.join(" AND ");
        let sql = format!(
            "SELECT {INSIGHT_COLUMNS} FROM insights WHERE {where_clause} \
             ORDER BY created_at DESC LIMIT ?{a} OFFSET ?{b}",
            a = clauses.len() + 1,
            b = clauses.len() + 2,
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = match (category, since) {
            (Some(c), Some(s)) => stmt.query_map(params![c, s, limit, offset], row_to_insight)?,
            (Some(c), None) => stmt.query_map(params![c, limit, offset], row_to_insight)?,
            (None, Some(s)) => stmt.query_map(params![s, limit, offset], row_to_insight)?,
            (None, None) => stmt.query_map(params![limit, offset], row_to_insight)?,
        };
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Plain substring search over insight content, newest first. A
    /// deliberately simple `LIKE` scan — full-text search is out of scope.
    pub fn search_insights(&self, q: &str, limit: u32) -> Result<Vec<Insight>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("%{q}%");
        let mut stmt = conn.prepare(&format!(
            "SELECT {INSIGHT_COLUMNS} FROM insights \
             WHERE quarantined = 0 AND content LIKE ?1 \
             ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![pattern, limit], row_to_insight)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}
