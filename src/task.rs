//! Task lifecycle state machine and progress accounting.
//!
//! Tasks move through `new → fetch → {resync →} fetch → ai → export`, and
//! the stage field drives which runner may claim them: the sync runner
//! selects from `{new, fetch, resync}`, the AI runner from `{ai}`. Claims
//! are taken atomically via `UPDATE ... RETURNING` against the oldest
//! eligible row, with stale claims (crashed runners) taken over after a
//! timeout. Counter updates and the stage transitions they trigger are
//! persisted in the same transaction.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::{stage, AiModelConfig, DatabaseConnection, PendingItem, Task};

/// Claim the oldest task whose stage is in `stages`. Returns `None` when no
/// task is eligible. The row selection and the claim write are one atomic
/// statement, so two concurrent runners can never claim the same task.
pub async fn claim_next_task(
    pool: &SqlitePool,
    stages: &[&str],
    claim_timeout_secs: i64,
) -> Result<Option<Task>> {
    let now = Utc::now().timestamp();
    let stale_before = now - claim_timeout_secs;
    let stage_list = stages
        .iter()
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ");

    // Stage names are internal constants, not user input.
    let sql = format!(
        "UPDATE task SET status = 'running', claimed_at = ?1 \
         WHERE id_task = ( \
             SELECT id_task FROM task \
             WHERE stage IN ({stage_list}) \
               AND (status = 'idle' OR claimed_at < ?2) \
             ORDER BY id_task ASC LIMIT 1 \
         ) \
         RETURNING *",
    );

    let task = sqlx::query_as::<_, Task>(&sql)
        .bind(now)
        .bind(stale_before)
        .fetch_optional(pool)
        .await?;
    Ok(task)
}

/// Release a claim taken by [`claim_next_task`].
pub async fn release_task(pool: &SqlitePool, id_task: i64) -> Result<()> {
    sqlx::query("UPDATE task SET status = 'idle', claimed_at = NULL WHERE id_task = ?")
        .bind(id_task)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_task(pool: &SqlitePool, id_task: i64) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM task WHERE id_task = ?")
        .bind(id_task)
        .fetch_optional(pool)
        .await?;
    Ok(task)
}

pub async fn get_database_connection(
    pool: &SqlitePool,
    id_database: i64,
) -> Result<Option<DatabaseConnection>> {
    let conn = sqlx::query_as::<_, DatabaseConnection>(
        "SELECT * FROM database_connection WHERE id_database = ?",
    )
    .bind(id_database)
    .fetch_optional(pool)
    .await?;
    Ok(conn)
}

pub async fn get_ai_model(pool: &SqlitePool, id_ai_model: i64) -> Result<Option<AiModelConfig>> {
    let model = sqlx::query_as::<_, AiModelConfig>(
        "SELECT * FROM ai_model WHERE id_ai_model = ? AND is_active = 1",
    )
    .bind(id_ai_model)
    .fetch_optional(pool)
    .await?;
    Ok(model)
}

/// Append a human-readable progress note to the task description.
pub async fn append_description<'a, E>(executor: E, id_task: i64, message: &str) -> Result<()>
where
    E: sqlx::Executor<'a, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "UPDATE task SET description = CASE \
         WHEN description IS NULL OR description = '' THEN ?1 \
         ELSE description || char(10) || ?1 END \
         WHERE id_task = ?2",
    )
    .bind(message)
    .bind(id_task)
    .execute(executor)
    .await?;
    Ok(())
}

/// Append an error message to the task error log. Called outside the failed
/// batch transaction, so the message survives the rollback.
pub async fn append_error<'a, E>(executor: E, id_task: i64, message: &str) -> Result<()>
where
    E: sqlx::Executor<'a, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "UPDATE task SET error_log = CASE \
         WHEN error_log IS NULL OR error_log = '' THEN ?1 \
         ELSE error_log || char(10) || ?1 END \
         WHERE id_task = ?2",
    )
    .bind(message)
    .bind(id_task)
    .execute(executor)
    .await?;
    Ok(())
}

/// Persist the stage ceiling and stage name observed when a fetch pass
/// begins, optionally together with the total record count.
pub async fn update_stage_and_markers(
    pool: &SqlitePool,
    id_task: i64,
    marker_max_id: i64,
    new_stage: &str,
    records_total: Option<i64>,
) -> Result<()> {
    match records_total {
        Some(total) => {
            sqlx::query(
                "UPDATE task SET marker_max_id = ?, stage = ?, records_total = ? \
                 WHERE id_task = ?",
            )
            .bind(marker_max_id)
            .bind(new_stage)
            .bind(total)
            .bind(id_task)
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query("UPDATE task SET marker_max_id = ?, stage = ? WHERE id_task = ?")
                .bind(marker_max_id)
                .bind(new_stage)
                .bind(id_task)
                .execute(pool)
                .await?;
        }
    }
    Ok(())
}

/// Collect pending items in keyset-paged chunks, up to `max_items`.
pub async fn fetch_pending_items(
    pool: &SqlitePool,
    id_task: i64,
    chunk_size: i64,
    max_items: i64,
) -> Result<Vec<PendingItem>> {
    let mut items: Vec<PendingItem> = Vec::new();
    let mut last_id = 0i64;

    while (items.len() as i64) < max_items {
        let batch = sqlx::query_as::<_, PendingItem>(
            "SELECT id_task_item, remote_id, text_original FROM task_item \
             WHERE id_task = ? AND status = 'pending' AND id_task_item > ? \
             ORDER BY id_task_item ASC LIMIT ?",
        )
        .bind(id_task)
        .bind(last_id)
        .bind(chunk_size)
        .fetch_all(pool)
        .await?;

        if batch.is_empty() {
            break;
        }
        let short = (batch.len() as i64) < chunk_size;
        last_id = batch.last().map(|i| i.id_task_item).unwrap_or(last_id);
        items.extend(batch);
        if short {
            break;
        }
    }

    items.truncate(max_items as usize);
    Ok(items)
}

/// Summary produced by the sync-side progress accountant.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub pending_count: i64,
    pub sync_progress: f64,
    pub stage: String,
}

/// Recompute sync counters from an authoritative recount of the local store
/// and persist them, flipping the stage to `ai` when fetching is complete.
/// The recount guards against double-counted increments from retried
/// batches; counters and the transition they trigger commit together.
pub async fn update_sync_progress(pool: &SqlitePool, id_task: i64) -> Result<SyncSummary> {
    let mut tx = pool.begin().await?;

    let (records_total, current_stage): (i64, String) =
        sqlx::query_as("SELECT records_total, stage FROM task WHERE id_task = ?")
            .bind(id_task)
            .fetch_one(&mut *tx)
            .await?;
    let fetched: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_item WHERE id_task = ?")
        .bind(id_task)
        .fetch_one(&mut *tx)
        .await?;
    let pending_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM task_item WHERE id_task = ? AND status = 'pending'",
    )
    .bind(id_task)
    .fetch_one(&mut *tx)
    .await?;

    let sync_progress = percentage(fetched, records_total);
    let complete = records_total > 0 && fetched == records_total;

    if complete {
        sqlx::query(
            "UPDATE task SET records_fetched = ?, sync_progress = ?, stage = ? WHERE id_task = ?",
        )
        .bind(fetched)
        .bind(sync_progress)
        .bind(stage::AI)
        .bind(id_task)
        .execute(&mut *tx)
        .await?;
    } else {
        sqlx::query("UPDATE task SET records_fetched = ?, sync_progress = ? WHERE id_task = ?")
            .bind(fetched)
            .bind(sync_progress)
            .bind(id_task)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(SyncSummary {
        pending_count,
        sync_progress,
        stage: if complete {
            stage::AI.to_string()
        } else {
            current_stage
        },
    })
}

/// Summary produced by the AI-side progress accountant.
#[derive(Debug, Clone)]
pub struct AiSummary {
    pub processed: i64,
    pub total: i64,
    pub ai_progress: f64,
    pub stage: String,
}

/// Recompute correction counters and persist them, flipping the stage to
/// `export` when every record has been reconciled.
pub async fn update_ai_progress(pool: &SqlitePool, id_task: i64) -> Result<AiSummary> {
    let mut tx = pool.begin().await?;

    let records_total: i64 = sqlx::query_scalar("SELECT records_total FROM task WHERE id_task = ?")
        .bind(id_task)
        .fetch_one(&mut *tx)
        .await?;
    let processed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM task_item WHERE id_task = ? AND status IN ('changed', 'unchanged')",
    )
    .bind(id_task)
    .fetch_one(&mut *tx)
    .await?;

    let ai_progress = percentage(processed, records_total);
    let complete = records_total > 0 && processed == records_total;

    if complete {
        sqlx::query(
            "UPDATE task SET records_processed = ?, ai_progress = ?, stage = ? WHERE id_task = ?",
        )
        .bind(processed)
        .bind(ai_progress)
        .bind(stage::EXPORT)
        .bind(id_task)
        .execute(&mut *tx)
        .await?;
    } else {
        sqlx::query("UPDATE task SET records_processed = ?, ai_progress = ? WHERE id_task = ?")
            .bind(processed)
            .bind(ai_progress)
            .bind(id_task)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(AiSummary {
        processed,
        total: records_total,
        ai_progress,
        stage: if complete {
            stage::EXPORT.to_string()
        } else {
            stage::AI.to_string()
        },
    })
}

fn percentage(part: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    ((part as f64 / total as f64) * 100.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::percentage;

    #[test]
    fn percentage_rounds_to_two_decimals() {
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(3, 3), 100.0);
    }

    #[test]
    fn percentage_of_zero_total_is_zero() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(5, 0), 0.0);
    }
}
