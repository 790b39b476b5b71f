use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Task table: one row per synchronization + correction unit of work
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task (
            id_task INTEGER PRIMARY KEY AUTOINCREMENT,
            stage TEXT NOT NULL DEFAULT 'new',
            status TEXT NOT NULL DEFAULT 'idle',
            claimed_at INTEGER,
            id_database_connection INTEGER NOT NULL,
            table_name TEXT NOT NULL,
            id_column_name TEXT NOT NULL,
            column_name TEXT NOT NULL,
            hash_method TEXT NOT NULL DEFAULT 'sha256',
            fetch_marker_id INTEGER NOT NULL DEFAULT 0,
            resync_marker_id INTEGER NOT NULL DEFAULT 0,
            marker_max_id INTEGER NOT NULL DEFAULT 0,
            records_total INTEGER NOT NULL DEFAULT 0,
            records_fetched INTEGER NOT NULL DEFAULT 0,
            records_new INTEGER NOT NULL DEFAULT 0,
            records_updated INTEGER NOT NULL DEFAULT 0,
            records_processed INTEGER NOT NULL DEFAULT 0,
            sync_progress REAL NOT NULL DEFAULT 0,
            ai_progress REAL NOT NULL DEFAULT 0,
            id_ai_model INTEGER,
            ai_user_rules TEXT,
            description TEXT,
            error_log TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Task item table: one row per source record
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_item (
            id_task_item INTEGER PRIMARY KEY AUTOINCREMENT,
            id_task INTEGER NOT NULL,
            remote_id INTEGER NOT NULL,
            text_original TEXT NOT NULL,
            original_hash TEXT NOT NULL,
            text_corrected TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            similarity_score REAL,
            tokens_input INTEGER,
            tokens_output INTEGER,
            ai_model TEXT,
            finish_reason TEXT,
            fetched_at INTEGER NOT NULL,
            processed_at INTEGER,
            UNIQUE(id_task, remote_id),
            FOREIGN KEY (id_task) REFERENCES task(id_task)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Source connection descriptors
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS database_connection (
            id_database INTEGER PRIMARY KEY AUTOINCREMENT,
            db_type TEXT NOT NULL,
            host TEXT NOT NULL DEFAULT '',
            port INTEGER NOT NULL DEFAULT 0,
            db_user TEXT NOT NULL DEFAULT '',
            db_password TEXT NOT NULL DEFAULT '',
            db_name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // AI model descriptors
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ai_model (
            id_ai_model INTEGER PRIMARY KEY AUTOINCREMENT,
            provider TEXT NOT NULL,
            model_name TEXT NOT NULL,
            api_key_encrypted TEXT,
            base_url TEXT,
            temperature REAL,
            max_tokens INTEGER,
            max_char_input INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_task_stage ON task(stage)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_task_item_task_status ON task_item(id_task, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
