use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::connection::Store;
use crate::error::Result;
use crate::model::{RunError, RunRecord, RunStatus};

const RUN_COLUMNS: &str = "id, layer_name, layer_content_hash, started_at, ended_at, status, \
    targets_matched, targets_processed, targets_skipped, insights_created, \
    model_profile, model_provider, model_name, tokens_in, tokens_out, tokens_total, \
    estimated_cost, errors";

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    let status_raw: String = row.get(5)?;
    let errors_raw: String = row.get(17)?;
    Ok(RunRecord {
        id: row.get(0)?,
        layer_name: row.get(1)?,
        layer_content_hash: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        status: status_raw.parse().unwrap_or(RunStatus::Dry),
        targets_matched: row.get(6)?,
        targets_processed: row.get(7)?,
        targets_skipped: row.get(8)?,
        insights_created: row.get(9)?,
        model_profile: row.get(10)?,
        model_provider: row.get(11)?,
        model_name: row.get(12)?,
        tokens_in: row.get(13)?,
        tokens_out: row.get(14)?,
        tokens_total: row.get(15)?,
        estimated_cost: row.get(16)?,
        errors: serde_json::from_str(&errors_raw).unwrap_or_default(),
    })
}

/// Per-layer run aggregates over a trailing window, for `GET /runs/stats/summary`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunStatsSummary {
    pub layer_name: String,
    pub total_runs: u32,
    pub successes: u32,
    pub partials: u32,
    pub failures: u32,
    pub dry_runs: u32,
    pub insights_created: u32,
    pub tokens_total: u64,
    pub estimated_cost: f64,
}

impl Store {
    /// Start a run record. Status begins `Dry` and is finalized by
    /// [`Store::finish_run`] once the executor has a verdict.
    pub fn start_run(&self, layer_name: &str, layer_content_hash: &str, targets_matched: u32) -> Result<RunRecord> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::now_v7().to_string();
        let started_at = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO run_records (
                id, layer_name, layer_content_hash, started_at, ended_at, status,
                targets_matched, targets_processed, targets_skipped, insights_created,
                model_profile, model_provider, model_name,
                tokens_in, tokens_out, tokens_total, estimated_cost, errors
            ) VALUES (?1, ?2, ?3, ?4, NULL, 'dry', ?5, 0, 0, 0, NULL, NULL, NULL, 0, 0, 0, 0, '[]')",
            params![id, layer_name, layer_content_hash, started_at, targets_matched],
        )?;
        conn.query_row(
            &format!("SELECT {RUN_COLUMNS} FROM run_records WHERE id = ?1"),
            params![id],
            row_to_run,
        )
        .map_err(Into::into)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn finish_run(
        &self,
        id: &str,
        status: RunStatus,
        targets_processed: u32,
        targets_skipped: u32,
        insights_created: u32,
        model_profile: Option<&str>,
        model_provider: Option<&str>,
        model_name: Option<&str>,
        tokens_in: u64,
        tokens_out: u64,
        estimated_cost: f64,
        errors: &[RunError],
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE run_records SET
                ended_at = ?1, status = ?2, targets_processed = ?3, targets_skipped = ?4,
                insights_created = ?5, model_profile = ?6, model_provider = ?7, model_name = ?8,
                tokens_in = ?9, tokens_out = ?10, tokens_total = ?11, estimated_cost = ?12, errors = ?13
             WHERE id = ?14",
            params![
                Utc::now().to_rfc3339(),
                status.to_string(),
                targets_processed,
                targets_skipped,
                insights_created,
                model_profile,
                model_provider,
                model_name,
                tokens_in,
                tokens_out,
                tokens_in + tokens_out,
                estimated_cost,
                serde_json::to_string(errors).unwrap_or_else(|_| "[]".into()),
                id,
            ],
        )?;
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> Result<Option<RunRecord>> {
        let conn = self.conn.lock().unwrap();
        let run = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM run_records WHERE id = ?1"),
                params![id],
                row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    pub fn list_runs(&self, layer_name: Option<&str>, limit: u32) -> Result<Vec<RunRecord>> {
        self.browse_runs(layer_name, None, None, 0, limit)
    }

    /// Browse run records newest-first, optionally filtered by layer name,
    /// status, and/or started after `since` (RFC3339). Backs `GET /runs`.
    pub fn browse_runs(
        &self,
        layer_name: Option<&str>,
        status: Option<&str>,
        since: Option<&str>,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<RunRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut clauses = Vec::new();
        let mut binds: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(name) = &layer_name {
            clauses.push(format!("layer_name = ?{}", binds.len() + 1));
            binds.push(name);
        }
        if let Some(status) = &status {
            clauses.push(format!("status = ?{}", binds.len() + 1));
            binds.push(status);
        }
        if let Some(since) = &since {
            clauses.push(format!("started_at > ?{}", binds.len() + 1));
            binds.push(since);
        }
        let where_clause =
            if clauses.is_empty() { String::new() } else { format!("WHERE {}", clauses.join(" AND ")) };
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM run_records {where_clause} \
             ORDER BY started_at DESC LIMIT ?{a} OFFSET ?{b}",
            a = binds.len() + 1,
            b = binds.len() + 2,
        );
        binds.push(&limit);
        binds.push(&offset);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(binds.as_slice(), row_to_run)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Aggregate run counts and token/cost totals over the trailing `days`
    /// days, grouped by layer. Backs `GET /runs/stats/summary`.
    pub fn run_stats_summary(&self, days: u32) -> Result<Vec<RunStatsSummary>> {
        let conn = self.conn.lock().unwrap();
        let since = (Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
        let mut stmt = conn.prepare(
            "SELECT layer_name, COUNT(*), \
                    SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), \
                    SUM(CASE WHEN status = 'partial' THEN 1 ELSE 0 END), \
                    SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), \
                    SUM(CASE WHEN status = 'dry' THEN 1 ELSE 0 END), \
                    SUM(insights_created), SUM(tokens_total), SUM(estimated_cost) \
             FROM run_records WHERE started_at > ?1 GROUP BY layer_name ORDER BY layer_name",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok(RunStatsSummary {
                layer_name: row.get(0)?,
                total_runs: row.get(1)?,
                successes: row.get(2)?,
                partials: row.get(3)?,
                failures: row.get(4)?,
                dry_runs: row.get(5)?,
                insights_created: row.get(6)?,
                tokens_total: row.get(7)?,
                estimated_cost: row.get(8)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Most recent run for a layer, used by `fetch_layer_runs` nodes that
    /// want "what did I conclude last time".
    pub fn last_run_for_layer(&self, layer_name: &str) -> Result<Option<RunRecord>> {
        let conn = self.conn.lock().unwrap();
        let run = conn
            .query_row(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM run_records \
                     WHERE layer_name = ?1 ORDER BY started_at DESC LIMIT 1"
                ),
                params![layer_name],
                row_to_run,
            )
            .optional()?;
        Ok(run)
    }
}
