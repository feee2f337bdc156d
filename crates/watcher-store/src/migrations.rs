use chrono::Utc;
use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};

pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

/// Forward-only migration set. Never edit an already-released entry —
/// append a new one instead, the way every corpus crate's `init_db` is
/// written to be idempotent but additive.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "core entity tables: topics, ledger, messages, insights, runs, calls",
        sql: "
            CREATE TABLE IF NOT EXISTS topics (
                key               TEXT PRIMARY KEY NOT NULL,
                category          TEXT NOT NULL,
                scope             TEXT NOT NULL,
                provisional       INTEGER NOT NULL DEFAULT 0,
                created_at        TEXT NOT NULL,
                last_activity_at  TEXT NOT NULL
            ) STRICT;
            CREATE INDEX IF NOT EXISTS idx_topics_last_activity ON topics (last_activity_at);

            CREATE TABLE IF NOT EXISTS ledger_entries (
                id                TEXT PRIMARY KEY NOT NULL,
                topic_key         TEXT NOT NULL REFERENCES topics(key),
                kind              TEXT NOT NULL,
                amount            REAL NOT NULL,
                reason            TEXT NOT NULL,
                source_topic_key  TEXT,
                created_at        TEXT NOT NULL
            ) STRICT;
            CREATE INDEX IF NOT EXISTS idx_ledger_topic ON ledger_entries (topic_key);
            CREATE INDEX IF NOT EXISTS idx_ledger_created_at ON ledger_entries (created_at);

            CREATE TABLE IF NOT EXISTS messages (
                id                TEXT PRIMARY KEY NOT NULL,
                channel_id        TEXT NOT NULL,
                server_id         TEXT,
                author_id         TEXT,
                content           TEXT NOT NULL,
                created_at        TEXT NOT NULL,
                visibility_scope  TEXT NOT NULL,
                reply_target_id   TEXT,
                thread_id         TEXT,
                has_media         INTEGER NOT NULL DEFAULT 0,
                has_link          INTEGER NOT NULL DEFAULT 0,
                ingested_at       TEXT NOT NULL,
                deleted_at        TEXT
            ) STRICT;
            CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages (channel_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages (thread_id);
            CREATE INDEX IF NOT EXISTS idx_messages_author ON messages (author_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_reply_target ON messages (reply_target_id);

            CREATE TABLE IF NOT EXISTS insights (
                id                     TEXT PRIMARY KEY NOT NULL,
                topic_key              TEXT NOT NULL,
                category               TEXT NOT NULL,
                content                TEXT NOT NULL,
                sources_scope_max      TEXT NOT NULL,
                created_at             TEXT NOT NULL,
                run_id                 TEXT NOT NULL,
                salience_spent         REAL NOT NULL,
                strength_adjustment    REAL NOT NULL,
                strength               REAL NOT NULL,
                confidence             REAL NOT NULL,
                importance             REAL NOT NULL,
                novelty                REAL NOT NULL,
                joy                    REAL,
                concern                REAL,
                curiosity              REAL,
                warmth                 REAL,
                tension                REAL,
                supersedes             TEXT,
                quarantined            INTEGER NOT NULL DEFAULT 0,
                context_channel        TEXT,
                context_thread         TEXT,
                context_subject        TEXT,
                context_participants   TEXT NOT NULL DEFAULT '[]',
                conflicts_with         TEXT NOT NULL DEFAULT '[]',
                conflict_resolved      INTEGER NOT NULL DEFAULT 0,
                synthesis_sources      TEXT NOT NULL DEFAULT '[]'
            ) STRICT;
            CREATE INDEX IF NOT EXISTS idx_insights_topic_category
                ON insights (topic_key, category, created_at);
            CREATE INDEX IF NOT EXISTS idx_insights_topic_strength
                ON insights (topic_key, strength);
            CREATE INDEX IF NOT EXISTS idx_insights_run ON insights (run_id);

            CREATE TABLE IF NOT EXISTS run_records (
                id                   TEXT PRIMARY KEY NOT NULL,
                layer_name           TEXT NOT NULL,
                layer_content_hash   TEXT NOT NULL,
                started_at           TEXT NOT NULL,
                ended_at             TEXT,
                status               TEXT NOT NULL,
                targets_matched      INTEGER NOT NULL DEFAULT 0,
                targets_processed    INTEGER NOT NULL DEFAULT 0,
                targets_skipped      INTEGER NOT NULL DEFAULT 0,
                insights_created     INTEGER NOT NULL DEFAULT 0,
                model_profile        TEXT,
                model_provider       TEXT,
                model_name           TEXT,
                tokens_in            INTEGER NOT NULL DEFAULT 0,
                tokens_out           INTEGER NOT NULL DEFAULT 0,
                tokens_total         INTEGER NOT NULL DEFAULT 0,
                estimated_cost       REAL NOT NULL DEFAULT 0,
                errors               TEXT NOT NULL DEFAULT '[]'
            ) STRICT;
            CREATE INDEX IF NOT EXISTS idx_runs_layer ON run_records (layer_name, started_at);
            CREATE INDEX IF NOT EXISTS idx_runs_status ON run_records (status);

            CREATE TABLE IF NOT EXISTS call_records (
                id               TEXT PRIMARY KEY NOT NULL,
                run_id           TEXT,
                call_kind        TEXT NOT NULL,
                profile          TEXT,
                provider         TEXT,
                model            TEXT,
                prompt           TEXT NOT NULL,
                response         TEXT,
                tokens_in        INTEGER NOT NULL DEFAULT 0,
                tokens_out       INTEGER NOT NULL DEFAULT 0,
                estimated_cost   REAL NOT NULL DEFAULT 0,
                latency_ms       INTEGER NOT NULL DEFAULT 0,
                success          INTEGER NOT NULL,
                error_message    TEXT,
                created_at       TEXT NOT NULL
            ) STRICT;
            CREATE INDEX IF NOT EXISTS idx_calls_run ON call_records (run_id);

            CREATE TABLE IF NOT EXISTS subject_source (
                subject_topic_key  TEXT NOT NULL,
                source_message_id  TEXT NOT NULL,
                source_topic_key   TEXT NOT NULL,
                run_id             TEXT NOT NULL,
                PRIMARY KEY (subject_topic_key, source_message_id, source_topic_key, run_id)
            ) STRICT;
        ",
    },
    Migration {
        version: 2,
        description: "user-server activity tracking for global-warming's two-server trigger",
        sql: "
            CREATE TABLE IF NOT EXISTS user_server_activity (
                user_id     TEXT NOT NULL,
                server_id   TEXT NOT NULL,
                first_seen_at TEXT NOT NULL,
                PRIMARY KEY (user_id, server_id)
            ) STRICT;
        ",
    },
    Migration {
        version: 3,
        description: "scheduler bookkeeping: next/last fire per layer, survives restart",
        sql: "
            CREATE TABLE IF NOT EXISTS scheduler_state (
                layer_name          TEXT PRIMARY KEY NOT NULL,
                last_fired_at       TEXT,
                next_fire_at        TEXT,
                updated_at          TEXT NOT NULL
            ) STRICT;
        ",
    },
];

pub fn init_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL,
            description TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// Apply every migration whose version is not yet recorded, in order, each
/// inside its own transaction. Never re-runs an applied version.
pub fn apply_pending(conn: &mut Connection, target: Option<i64>) -> Result<()> {
    init_version_table(conn)?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        if let Some(t) = target {
            if migration.version > t {
                break;
            }
        }

        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql).map_err(|e| StoreError::Migration {
            version: migration.version,
            reason: e.to_string(),
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, Utc::now().to_rfc3339(), migration.description],
        )?;
        tx.commit()?;
        info!(version = migration.version, description = migration.description, "migration applied");
    }

    Ok(())
}

/// `(current_version, pending_versions)` for `db status`.
pub fn status(conn: &Connection) -> Result<(i64, Vec<i64>)> {
    init_version_table(conn)?;
    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    let pending = MIGRATIONS
        .iter()
        .map(|m| m.version)
        .filter(|v| *v > current)
        .collect();
    Ok((current, pending))
}
