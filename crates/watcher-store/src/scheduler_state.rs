use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::connection::Store;
use crate::error::Result;
use crate::model::SchedulerState;

fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<SchedulerState> {
    Ok(SchedulerState {
        layer_name: row.get(0)?,
        last_fired_at: row.get(1)?,
        next_fire_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

const STATE_COLUMNS: &str = "layer_name, last_fired_at, next_fire_at, updated_at";

impl Store {
    pub fn get_scheduler_state(&self, layer_name: &str) -> Result<Option<SchedulerState>> {
        let conn = self.conn.lock().unwrap();
        let state = conn
            .query_row(
                &format!("SELECT {STATE_COLUMNS} FROM scheduler_state WHERE layer_name = ?1"),
                params![layer_name],
                row_to_state,
            )
            .optional()?;
        Ok(state)
    }

    /// Record that `layer_name` just fired (or was first registered) and
    /// persist its next scheduled fire time, if any. Survives restart —
    /// a missed window is never replayed, only coalesced into the next one.
    pub fn record_layer_fire(&self, layer_name: &str, next_fire_at: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO scheduler_state (layer_name, last_fired_at, next_fire_at, updated_at)
             VALUES (?1, ?2, ?3, ?2)
             ON CONFLICT(layer_name) DO UPDATE SET
                last_fired_at = excluded.last_fired_at,
                next_fire_at = excluded.next_fire_at,
                updated_at = excluded.updated_at",
            params![layer_name, now, next_fire_at],
        )?;
        Ok(())
    }

    /// Persist just the next scheduled fire time without marking a fire,
    /// used to register a layer's first computed `next_fire_at` on load.
    pub fn set_next_fire(&self, layer_name: &str, next_fire_at: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO scheduler_state (layer_name, last_fired_at, next_fire_at, updated_at)
             VALUES (?1, NULL, ?2, ?3)
             ON CONFLICT(layer_name) DO UPDATE SET
                next_fire_at = excluded.next_fire_at,
                updated_at = excluded.updated_at",
            params![layer_name, next_fire_at, now],
        )?;
        Ok(())
    }
}
