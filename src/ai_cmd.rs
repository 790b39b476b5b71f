//! AI runner: one invocation claims one correction-stage task, submits one
//! batch of pending items, reconciles the reply, and exits.
//!
//! The same error taxonomy as the sync runner applies. Failure to reach the
//! provider at all fails the invocation without mutating the task; a
//! provider-side error, an unparseable reply, or a reply that fails
//! validation is recorded in the task error log and the invocation exits
//! cleanly, leaving every item of the batch pending for the next attempt.
//! There is no in-process retry.

use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::gateway::{build_request, check_model, execute_request};
use crate::models::{stage, PendingItem, Task};
use crate::prompt::{build_correction_prompt, RequestOptions};
use crate::reconcile::{parse_json_response, reconcile_response, BatchUsage};
use crate::task::{
    append_description, append_error, claim_next_task, fetch_pending_items, get_ai_model,
    release_task, update_ai_progress,
};

pub async fn run(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = run_once(&pool, config).await;
    pool.close().await;
    result
}

/// Claim and advance at most one correction-stage task.
pub async fn run_once(pool: &SqlitePool, config: &Config) -> Result<()> {
    let Some(task) = claim_next_task(pool, stage::AI_ELIGIBLE, config.sync.claim_timeout_secs)
        .await?
    else {
        tracing::info!("no task eligible for correction");
        return Ok(());
    };

    tracing::info!(id_task = task.id_task, "claimed correction task");

    let result = process_task(pool, config, &task).await;
    release_task(pool, task.id_task).await?;
    result
}

async fn process_task(pool: &SqlitePool, config: &Config, task: &Task) -> Result<()> {
    let Some(id_ai_model) = task.id_ai_model else {
        return task_failure(pool, task, "ai: task has no AI model assigned").await;
    };
    let Some(model) = get_ai_model(pool, id_ai_model).await? else {
        return task_failure(
            pool,
            task,
            &format!("ai: AI model {} not found or inactive", id_ai_model),
        )
        .await;
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.ai.timeout_secs))
        .build()?;

    // An unsupported provider is a task-level failure, not an invocation
    // failure; connectivity trouble inside the check already degrades to
    // the static allow-list.
    let model_available = match check_model(&client, &model).await {
        Ok(available) => available,
        Err(err) => return task_failure(pool, task, &format!("ai: {:#}", err)).await,
    };
    if !model_available {
        return task_failure(
            pool,
            task,
            &format!(
                "ai: model '{}' is not available at provider {}",
                model.model_name, model.provider
            ),
        )
        .await;
    }

    let items =
        fetch_pending_items(pool, task.id_task, config.ai.chunk_size, config.ai.max_items).await?;
    if items.is_empty() {
        // Nothing pending. The accountant still runs so a fully reconciled
        // task flips to export.
        let summary = update_ai_progress(pool, task.id_task).await?;
        tracing::info!(
            id_task = task.id_task,
            progress = summary.ai_progress,
            stage = %summary.stage,
            "no pending items"
        );
        return Ok(());
    }

    let items = match limit_batch_chars(items, model.max_char_input) {
        Ok(items) => items,
        Err(message) => return task_failure(pool, task, &message).await,
    };

    let prompt = build_correction_prompt(&items, task.ai_user_rules.as_deref());
    let request = match build_request(&model, &prompt, &RequestOptions::default()) {
        Ok(request) => request,
        Err(err) => return task_failure(pool, task, &format!("ai: {:#}", err)).await,
    };

    tracing::info!(
        id_task = task.id_task,
        items = items.len(),
        model = %model.model_name,
        "submitting correction batch"
    );

    let response = match execute_request(&client, &request).await {
        Ok(response) => response,
        Err(err) => {
            if is_connectivity_error(&err) {
                // Provider unreachable: fail the invocation, task untouched.
                return Err(err.context("ai: failed to reach provider"));
            }
            return task_failure(pool, task, &format!("ai: {:#}", err)).await;
        }
    };

    let entries = match parse_json_response(&response.text) {
        Ok(entries) => entries,
        Err(err) => return task_failure(pool, task, &format!("ai: {:#}", err)).await,
    };

    let usage = BatchUsage {
        tokens_input: response.tokens_input,
        tokens_output: response.tokens_output,
        ai_model: response.model.clone(),
        finish_reason: response.finish_reason.clone(),
    };
    let updated = match reconcile_response(pool, &entries, &items, &usage).await {
        Ok(updated) => updated,
        Err(err) => return task_failure(pool, task, &format!("ai: {:#}", err)).await,
    };

    let summary = update_ai_progress(pool, task.id_task).await?;
    append_description(
        pool,
        task.id_task,
        &format!(
            "Corrected batch of {} items ({}/{} done).",
            updated, summary.processed, summary.total
        ),
    )
    .await?;
    tracing::info!(
        id_task = task.id_task,
        updated,
        progress = summary.ai_progress,
        stage = %summary.stage,
        "correction batch reconciled"
    );

    Ok(())
}

/// Record a task-level failure and exit the invocation cleanly.
async fn task_failure(pool: &SqlitePool, task: &Task, message: &str) -> Result<()> {
    tracing::warn!(id_task = task.id_task, "{}", message);
    append_error(pool, task.id_task, message).await?;
    Ok(())
}

/// Trim the batch so the combined original text stays within the model's
/// input character limit. A single item over the limit on its own is a
/// task-level failure, otherwise the batch would never shrink past it.
fn limit_batch_chars(
    items: Vec<PendingItem>,
    max_char_input: Option<i64>,
) -> std::result::Result<Vec<PendingItem>, String> {
    let Some(limit) = max_char_input.filter(|l| *l > 0) else {
        return Ok(items);
    };

    let mut kept = Vec::with_capacity(items.len());
    let mut total = 0i64;
    for item in items {
        let len = item.text_original.chars().count() as i64;
        if len > limit {
            return Err(format!(
                "ai: item {} exceeds max_char_input ({} > {})",
                item.id_task_item, len, limit
            ));
        }
        if total + len > limit {
            break;
        }
        total += len;
        kept.push(item);
    }
    Ok(kept)
}

fn is_connectivity_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<reqwest::Error>()
        .map(|e| e.is_connect() || e.is_timeout())
        .unwrap_or(false)
}
