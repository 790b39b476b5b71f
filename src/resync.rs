//! Resync engine: hash-compare re-walk of already-fetched records.
//!
//! Walks the source table from the stored resync marker up to the ceiling
//! recorded when fetching began, comparing each remote row's content hash
//! against the stored one. Only rows whose hash differs are rewritten, and
//! only text, hash, and fetch timestamp change; correction state stays as
//! the reconciliation engine left it. The marker advances unconditionally,
//! so a pass over unchanged data still makes durable progress. On completion
//! the task hands back to the fetch stage, which picks up ids beyond the old
//! ceiling in the same invocation.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::{stage, Task};
use crate::source::SourceReader;
use crate::task::{append_description, append_error};
use crate::util::calculate_hash;

/// Counters accumulated over one resync pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResyncOutcome {
    pub rows_scanned: i64,
    pub rows_updated: i64,
}

/// Run one resync pass for `task`. Failures are appended to the task error
/// log before being returned.
pub async fn run_resync(
    pool: &SqlitePool,
    reader: &dyn SourceReader,
    task: &Task,
    batch_size: i64,
) -> Result<ResyncOutcome> {
    match resync_pass(pool, reader, task, batch_size).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            append_error(pool, task.id_task, &format!("resync: {:#}", err)).await?;
            Err(err)
        }
    }
}

async fn resync_pass(
    pool: &SqlitePool,
    reader: &dyn SourceReader,
    task: &Task,
    batch_size: i64,
) -> Result<ResyncOutcome> {
    let ceiling = task.marker_max_id;
    // A marker at or past the ceiling means the previous pass finished;
    // this one starts over from the beginning.
    let mut cursor = if task.resync_marker_id >= ceiling {
        0
    } else {
        task.resync_marker_id
    };

    tracing::info!(
        id_task = task.id_task,
        ceiling,
        marker = cursor,
        "starting resync pass"
    );

    let mut outcome = ResyncOutcome::default();

    while cursor < ceiling {
        let page = reader.fetch_page(cursor, batch_size).await?;
        if page.is_empty() {
            break;
        }

        let mut tx = pool.begin().await?;
        let mut batch_updated = 0i64;
        let mut last_id = cursor;
        let now = Utc::now().timestamp();

        for row in &page {
            // Rows beyond the ceiling belong to the fetch stage.
            if row.remote_id > ceiling {
                break;
            }
            last_id = row.remote_id;
            outcome.rows_scanned += 1;

            let hash = calculate_hash(&row.text_value, &task.hash_method)?;
            let stored: Option<String> = sqlx::query_scalar(
                "SELECT original_hash FROM task_item WHERE id_task = ? AND remote_id = ?",
            )
            .bind(task.id_task)
            .bind(row.remote_id)
            .fetch_optional(&mut *tx)
            .await?;

            match stored {
                // Only rows whose hash differs are rewritten, and only
                // text, hash, and fetch timestamp change: correction state
                // is left as the reconciliation engine set it. Rows absent
                // locally belong to the fetch stage.
                Some(stored_hash) if stored_hash != hash => {
                    sqlx::query(
                        "UPDATE task_item SET \
                             text_original = ?, original_hash = ?, fetched_at = ? \
                         WHERE id_task = ? AND remote_id = ?",
                    )
                    .bind(&row.text_value)
                    .bind(&hash)
                    .bind(now)
                    .bind(task.id_task)
                    .bind(row.remote_id)
                    .execute(&mut *tx)
                    .await?;
                    batch_updated += 1;
                }
                _ => {}
            }
        }

        // The marker commits even when no row changed.
        sqlx::query(
            "UPDATE task SET resync_marker_id = ?, records_updated = records_updated + ? \
             WHERE id_task = ?",
        )
        .bind(last_id)
        .bind(batch_updated)
        .bind(task.id_task)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            id_task = task.id_task,
            updated = batch_updated,
            marker = last_id,
            "resync batch committed"
        );
        outcome.rows_updated += batch_updated;

        if last_id == cursor {
            // Every row of the page was beyond the ceiling.
            break;
        }
        cursor = last_id;
        if (page.len() as i64) < batch_size {
            break;
        }
    }

    // Pass complete: pin the marker to the ceiling and hand the task back
    // to fetch so ids beyond the old ceiling are picked up next.
    sqlx::query("UPDATE task SET resync_marker_id = ?, stage = ? WHERE id_task = ?")
        .bind(ceiling)
        .bind(stage::FETCH)
        .bind(task.id_task)
        .execute(pool)
        .await?;
    append_description(
        pool,
        task.id_task,
        &format!(
            "Resync pass scanned {} rows, updated {}.",
            outcome.rows_scanned, outcome.rows_updated
        ),
    )
    .await?;

    Ok(outcome)
}
