//! Core data models used throughout proofsync.
//!
//! These types represent the tasks, task items, and external descriptors
//! that flow through the fetch, resync, and correction pipeline.

use sqlx::FromRow;

/// Task lifecycle stages. The stage only advances forward, except for the
/// resync branch which revisits `fetch` after a resync pass completes.
pub mod stage {
    pub const NEW: &str = "new";
    pub const FETCH: &str = "fetch";
    pub const RESYNC: &str = "resync";
    pub const AI: &str = "ai";
    pub const EXPORT: &str = "export";
    pub const DONE: &str = "done";

    /// Stages the sync runner may claim.
    pub const SYNC_ELIGIBLE: &[&str] = &[NEW, FETCH, RESYNC];
    /// Stages the AI runner may claim. Disjoint from [`SYNC_ELIGIBLE`],
    /// so the two runners never touch the same task concurrently.
    pub const AI_ELIGIBLE: &[&str] = &[AI];
}

/// Per-item correction status.
pub mod item_status {
    pub const PENDING: &str = "pending";
    pub const CHANGED: &str = "changed";
    pub const UNCHANGED: &str = "unchanged";
}

/// One long-lived unit of synchronization + correction work.
#[derive(Debug, Clone, FromRow)]
pub struct Task {
    pub id_task: i64,
    pub stage: String,
    pub status: String,
    pub claimed_at: Option<i64>,
    pub id_database_connection: i64,
    pub table_name: String,
    pub id_column_name: String,
    pub column_name: String,
    pub hash_method: String,
    pub fetch_marker_id: i64,
    pub resync_marker_id: i64,
    pub marker_max_id: i64,
    pub records_total: i64,
    pub records_fetched: i64,
    pub records_new: i64,
    pub records_updated: i64,
    pub records_processed: i64,
    pub sync_progress: f64,
    pub ai_progress: f64,
    pub id_ai_model: Option<i64>,
    pub ai_user_rules: Option<String>,
    pub description: Option<String>,
    pub error_log: Option<String>,
}

/// One source record under correction.
#[derive(Debug, Clone, FromRow)]
pub struct TaskItem {
    pub id_task_item: i64,
    pub id_task: i64,
    pub remote_id: i64,
    pub text_original: String,
    pub original_hash: String,
    pub text_corrected: Option<String>,
    pub status: String,
    pub similarity_score: Option<f64>,
    pub tokens_input: Option<i64>,
    pub tokens_output: Option<i64>,
    pub ai_model: Option<String>,
    pub finish_reason: Option<String>,
    pub fetched_at: i64,
    pub processed_at: Option<i64>,
}

/// Minimal projection of a pending item handed to the prompt builder.
#[derive(Debug, Clone, FromRow)]
pub struct PendingItem {
    pub id_task_item: i64,
    pub remote_id: Option<i64>,
    pub text_original: String,
}

/// Fixed row shape produced by every source reader, regardless of dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    pub remote_id: i64,
    pub text_value: String,
}

/// External source database descriptor. Read-only input to the fetch and
/// resync engines.
#[derive(Debug, Clone, FromRow)]
pub struct DatabaseConnection {
    pub id_database: i64,
    pub db_type: String,
    pub host: String,
    pub port: i64,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
}

/// AI model descriptor. Read-only input to the prompt/gateway boundary.
#[derive(Debug, Clone, FromRow)]
pub struct AiModelConfig {
    pub id_ai_model: i64,
    pub provider: String,
    pub model_name: String,
    pub api_key_encrypted: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
    pub max_char_input: Option<i64>,
    pub is_active: i64,
}
