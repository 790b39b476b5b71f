//! Incremental fetch engine.
//!
//! Walks the source table in ascending id order starting after the stored
//! fetch marker. Each batch is one local transaction: the upserted rows and
//! the marker advance commit together, so a crash at any point leaves the
//! marker pointing at the last fully persisted batch and the next run
//! resumes without gaps or duplicates.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::{stage, Task};
use crate::source::SourceReader;
use crate::task::{append_description, append_error, update_stage_and_markers};
use crate::util::calculate_hash;

/// Counters accumulated over one fetch pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOutcome {
    pub rows_fetched: i64,
    pub rows_new: i64,
}

/// Run one fetch pass for `task`. Failures are appended to the task error
/// log before being returned, so the record of what went wrong survives the
/// rolled-back batch.
pub async fn run_fetch(
    pool: &SqlitePool,
    reader: &dyn SourceReader,
    task: &Task,
    batch_size: i64,
) -> Result<FetchOutcome> {
    match fetch_pass(pool, reader, task, batch_size).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            append_error(pool, task.id_task, &format!("fetch: {:#}", err)).await?;
            Err(err)
        }
    }
}

async fn fetch_pass(
    pool: &SqlitePool,
    reader: &dyn SourceReader,
    task: &Task,
    batch_size: i64,
) -> Result<FetchOutcome> {
    // Probe before any pagination: verifies the id column exists and holds
    // values, and detects the empty table early.
    if reader.probe().await?.is_none() {
        update_stage_and_markers(pool, task.id_task, 0, stage::FETCH, Some(0)).await?;
        append_description(pool, task.id_task, "Source table is empty; nothing to fetch.")
            .await?;
        return Ok(FetchOutcome::default());
    }

    let total = reader.count().await?;
    let ceiling = reader.max_id().await?;
    update_stage_and_markers(pool, task.id_task, ceiling, stage::FETCH, Some(total)).await?;
    tracing::info!(
        id_task = task.id_task,
        total,
        ceiling,
        marker = task.fetch_marker_id,
        "starting fetch pass"
    );

    let mut cursor = task.fetch_marker_id;
    let mut outcome = FetchOutcome::default();

    while cursor < ceiling {
        let page = reader.fetch_page(cursor, batch_size).await?;
        if page.is_empty() {
            break;
        }

        let mut tx = pool.begin().await?;
        let mut batch_new = 0i64;
        let now = Utc::now().timestamp();

        for row in &page {
            let existing: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM task_item WHERE id_task = ? AND remote_id = ?",
            )
            .bind(task.id_task)
            .bind(row.remote_id)
            .fetch_one(&mut *tx)
            .await?;
            if existing == 0 {
                batch_new += 1;
            }

            let hash = calculate_hash(&row.text_value, &task.hash_method)?;
            // The upsert overwrites text and hash only; correction state
            // belongs to the reconciliation engine.
            sqlx::query(
                "INSERT INTO task_item \
                     (id_task, remote_id, text_original, original_hash, fetched_at) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(id_task, remote_id) DO UPDATE SET \
                     text_original = excluded.text_original, \
                     original_hash = excluded.original_hash, \
                     fetched_at = excluded.fetched_at",
            )
            .bind(task.id_task)
            .bind(row.remote_id)
            .bind(&row.text_value)
            .bind(&hash)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let last_id = page.last().map(|r| r.remote_id).unwrap_or(cursor);
        sqlx::query(
            "UPDATE task SET fetch_marker_id = ?, \
                 records_new = records_new + ?, \
                 records_fetched = records_fetched + ? \
             WHERE id_task = ?",
        )
        .bind(last_id)
        .bind(batch_new)
        .bind(page.len() as i64)
        .bind(task.id_task)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            id_task = task.id_task,
            rows = page.len(),
            new = batch_new,
            marker = last_id,
            "fetch batch committed"
        );
        outcome.rows_fetched += page.len() as i64;
        outcome.rows_new += batch_new;
        cursor = last_id;
    }

    let note = if outcome.rows_fetched == 0 {
        format!("No new records beyond marker {}.", task.fetch_marker_id)
    } else {
        format!(
            "Fetched {} rows ({} new).",
            outcome.rows_fetched, outcome.rows_new
        )
    };
    append_description(pool, task.id_task, &note).await?;

    Ok(outcome)
}
