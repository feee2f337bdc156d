use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::connection::Store;
use crate::error::Result;
use crate::model::CallRecord;

const CALL_COLUMNS: &str = "id, run_id, call_kind, profile, provider, model, prompt, response, \
    tokens_in, tokens_out, estimated_cost, latency_ms, success, error_message, created_at";

fn row_to_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallRecord> {
    Ok(CallRecord {
        id: row.get(0)?,
        run_id: row.get(1)?,
        call_kind: row.get(2)?,
        profile: row.get(3)?,
        provider: row.get(4)?,
        model: row.get(5)?,
        prompt: row.get(6)?,
        response: row.get(7)?,
        tokens_in: row.get(8)?,
        tokens_out: row.get(9)?,
        estimated_cost: row.get(10)?,
        latency_ms: row.get(11)?,
        success: row.get::<_, i64>(12)? != 0,
        error_message: row.get(13)?,
        created_at: row.get(14)?,
    })
}

pub struct NewCall<'a> {
    pub run_id: Option<&'a str>,
    pub call_kind: &'a str,
    pub profile: Option<&'a str>,
    pub provider: Option<&'a str>,
    pub model: Option<&'a str>,
    pub prompt: &'a str,
    pub response: Option<&'a str>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub estimated_cost: f64,
    pub latency_ms: u64,
    pub success: bool,
    pub error_message: Option<&'a str>,
}

impl Store {
    pub fn insert_call(&self, call: NewCall<'_>) -> Result<CallRecord> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::now_v7().to_string();
        let created_at = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO call_records (
                id, run_id, call_kind, profile, provider, model, prompt, response,
                tokens_in, tokens_out, estimated_cost, latency_ms, success, error_message, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                id,
                call.run_id,
                call.call_kind,
                call.profile,
                call.provider,
                call.model,
                call.prompt,
                call.response,
                call.tokens_in,
                call.tokens_out,
                call.estimated_cost,
                call.latency_ms,
                call.success as i64,
                call.error_message,
                created_at,
            ],
        )?;
        conn.query_row(
            &format!("SELECT {CALL_COLUMNS} FROM call_records WHERE id = ?1"),
            params![id],
            row_to_call,
        )
        .map_err(Into::into)
    }

    pub fn list_calls_for_run(&self, run_id: &str) -> Result<Vec<CallRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CALL_COLUMNS} FROM call_records WHERE run_id = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(params![run_id], row_to_call)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}
