use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::connection::Store;
use crate::error::Result;
use crate::insights::{self, NewInsight};
use crate::model::{Insight, LedgerEntry, TxnKind};

const LEDGER_COLUMNS: &str = "id, topic_key, kind, amount, reason, source_topic_key, created_at";

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let kind_raw: String = row.get(2)?;
    Ok(LedgerEntry {
        id: row.get(0)?,
        topic_key: row.get(1)?,
        kind: kind_raw.parse().unwrap_or(TxnKind::Earn),
        amount: row.get(3)?,
        reason: row.get(4)?,
        source_topic_key: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn append_ledger_entry_tx(
    conn: &Connection,
    topic_key: &str,
    kind: TxnKind,
    amount: f64,
    reason: &str,
    source_topic_key: Option<&str>,
) -> Result<LedgerEntry> {
    let id = Uuid::now_v7().to_string();
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO ledger_entries (id, topic_key, kind, amount, reason, source_topic_key, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![id, topic_key, kind.to_string(), amount, reason, source_topic_key, created_at],
    )?;
    conn.query_row(
        &format!("SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE id = ?1"),
        params![id],
        row_to_entry,
    )
    .map_err(Into::into)
}

fn topic_balance_tx(conn: &Connection, topic_key: &str) -> Result<f64> {
    let sum: Option<f64> = conn.query_row(
        "SELECT SUM(amount) FROM ledger_entries WHERE topic_key = ?1",
        params![topic_key],
        |row| row.get(0),
    )?;
    Ok(sum.unwrap_or(0.0))
}

/// Outcome of [`Store::spend_and_insert_insight`]: either the spend was
/// funded and the insight committed alongside it, or the topic had no
/// balance to spend and nothing was written.
pub enum SpendOutcome {
    Funded { spent: f64, insight: Insight },
    InsufficientSalience,
}

impl Store {
    /// Append a ledger entry. Amounts can be negative (spend, decay).
    pub fn append_ledger_entry(
        &self,
        topic_key: &str,
        kind: TxnKind,
        amount: f64,
        reason: &str,
        source_topic_key: Option<&str>,
    ) -> Result<LedgerEntry> {
        let conn = self.conn.lock().unwrap();
        append_ledger_entry_tx(&conn, topic_key, kind, amount, reason, source_topic_key)
    }

    /// Current balance for a topic: sum of all entry amounts.
    pub fn topic_balance(&self, topic_key: &str) -> Result<f64> {
        let conn = self.conn.lock().unwrap();
        topic_balance_tx(&conn, topic_key)
    }

    /// Spends `requested_amount` from `topic_key` (clamped to its balance)
    /// and inserts the insight it funds, as one transaction (§5, §8): the
    /// spend entry, its retain entry, and the insight row all commit
    /// together or not at all, so a failed insert can never leave an
    /// orphan spend. `build_insight` is called with the actual (clamped)
    /// amount spent, after the balance is known, so strength and
    /// `salience_spent` reflect what was really taken.
    pub fn spend_and_insert_insight(
        &self,
        topic_key: &str,
        requested_amount: f64,
        retention_rate: f64,
        reason: &str,
        build_insight: impl FnOnce(f64) -> NewInsight,
    ) -> Result<SpendOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let balance = topic_balance_tx(&tx, topic_key)?;
        let actual = requested_amount.min(balance).max(0.0);
        if actual <= 0.0 {
            return Ok(SpendOutcome::InsufficientSalience);
        }

        append_ledger_entry_tx(&tx, topic_key, TxnKind::Spend, -actual, reason, None)?;
        append_ledger_entry_tx(&tx, topic_key, TxnKind::Retain, actual * retention_rate, reason, None)?;
        let inserted = insights::insert_insight_tx(&tx, build_insight(actual))?;

        tx.commit()?;
        Ok(SpendOutcome::Funded { spent: actual, insight: inserted })
    }

    /// Sum of amounts of a given kind for a topic since a timestamp, used
    /// by decay catch-up to find true elapsed time since the last decay.
    pub fn sum_amount_since(&self, topic_key: &str, kind: TxnKind, since: &str) -> Result<f64> {
        let conn = self.conn.lock().unwrap();
        let sum: Option<f64> = conn.query_row(
            "SELECT SUM(amount) FROM ledger_entries \
             WHERE topic_key = ?1 AND kind = ?2 AND created_at >= ?3",
            params![topic_key, kind.to_string(), since],
            |row| row.get(0),
        )?;
        Ok(sum.unwrap_or(0.0))
    }

    pub fn last_entry_of_kind(&self, topic_key: &str, kind: TxnKind) -> Result<Option<LedgerEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries \
             WHERE topic_key = ?1 AND kind = ?2 ORDER BY created_at DESC LIMIT 1"
        ))?;
        let mut rows = stmt.query_map(params![topic_key, kind.to_string()], row_to_entry)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_entries_for_topic(&self, topic_key: &str, limit: u32) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries \
             WHERE topic_key = ?1 ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![topic_key, limit], row_to_entry)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All topic keys that have at least one ledger entry, used by the
    /// decay job to iterate every topic with activity.
    pub fn list_topic_keys_with_entries(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT topic_key FROM ledger_entries")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CrossLinks, Valence};

    fn sample_insight(topic_key: &str, spent: f64) -> NewInsight {
        NewInsight {
            topic_key: topic_key.to_string(),
            category: "social".to_string(),
            content: "content".to_string(),
            sources_scope_max: crate::model::VisibilityScope::Public,
            run_id: "run-1".to_string(),
            salience_spent: spent,
            strength_adjustment: 1.0,
            strength: spent,
            confidence: 0.5,
            importance: 0.5,
            novelty: 0.5,
            valence: Valence { curiosity: Some(0.5), ..Default::default() },
            supersedes: None,
            cross_links: CrossLinks::default(),
            conflicts_with: Vec::new(),
            synthesis_sources: Vec::new(),
        }
    }

    #[test]
    fn spend_and_insert_insight_commits_both_together() {
        let store = Store::open_in_memory().expect("open");
        store.upsert_topic("user:abc", "user", "global", false).expect("upsert");
        store.append_ledger_entry("user:abc", TxnKind::Earn, 5.0, "message", None).expect("earn");

        let outcome = store
            .spend_and_insert_insight("user:abc", 2.0, 0.3, "insight", |spent| sample_insight("user:abc", spent))
            .expect("spend");

        match outcome {
            SpendOutcome::Funded { spent, insight } => {
                assert_eq!(spent, 2.0);
                assert_eq!(insight.salience_spent, 2.0);
            }
            SpendOutcome::InsufficientSalience => panic!("expected a funded spend"),
        }

        // balance reflects spend + retain, and exactly one insight row landed
        let balance = store.topic_balance("user:abc").expect("balance");
        assert_eq!(balance, 5.0 - 2.0 + 2.0 * 0.3);
        let insights = store.list_insights_by_topic_recency("user:abc", 10, true).expect("list");
        assert_eq!(insights.len(), 1);
    }

    #[test]
    fn spend_and_insert_insight_writes_nothing_when_balance_is_exhausted() {
        let store = Store::open_in_memory().expect("open");
        store.upsert_topic("user:abc", "user", "global", false).expect("upsert");

        let outcome = store
            .spend_and_insert_insight("user:abc", 2.0, 0.3, "insight", |spent| sample_insight("user:abc", spent))
            .expect("spend");

        assert!(matches!(outcome, SpendOutcome::InsufficientSalience));
        assert_eq!(store.topic_balance("user:abc").expect("balance"), 0.0);
        let insights = store.list_insights_by_topic_recency("user:abc", 10, true).expect("list");
        assert!(insights.is_empty());
    }
}
