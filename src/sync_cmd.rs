//! Sync runner: one invocation claims one task and advances its fetch or
//! resync work, then exits.
//!
//! Error handling follows a fixed taxonomy. Connectivity failures against
//! the source fail the invocation without touching task business state, so
//! a transient outage does not poison the task. Schema, validation, and
//! engine failures are recoverable at the task level: they are appended to
//! the task error log, the claim is released, and the invocation still
//! exits cleanly so an external scheduler keeps driving other tasks.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::fetch::run_fetch;
use crate::models::{stage, Task};
use crate::resync::run_resync;
use crate::source::{connect_source, SourceReader};
use crate::task::{
    append_error, claim_next_task, get_database_connection, get_task, release_task,
    update_sync_progress,
};

pub async fn run(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = run_once(&pool, config).await;
    pool.close().await;
    result
}

/// Claim and advance at most one task.
pub async fn run_once(pool: &SqlitePool, config: &Config) -> Result<()> {
    let Some(task) = claim_next_task(
        pool,
        stage::SYNC_ELIGIBLE,
        config.sync.claim_timeout_secs,
    )
    .await?
    else {
        tracing::info!("no task eligible for sync");
        return Ok(());
    };

    tracing::info!(id_task = task.id_task, stage = %task.stage, "claimed sync task");

    let Some(source_params) = get_database_connection(pool, task.id_database_connection).await?
    else {
        let message = format!(
            "sync: database connection {} not found",
            task.id_database_connection
        );
        tracing::warn!(id_task = task.id_task, "{}", message);
        append_error(pool, task.id_task, &message).await?;
        release_task(pool, task.id_task).await?;
        return Ok(());
    };

    // A source connection failure fails the whole invocation; the claim is
    // handed back first so the task is immediately eligible again.
    let reader = match connect_source(
        &source_params,
        &task.table_name,
        &task.id_column_name,
        &task.column_name,
    )
    .await
    {
        Ok(reader) => reader,
        Err(err) => {
            release_task(pool, task.id_task).await?;
            return Err(err.context("sync: failed to connect to source database"));
        }
    };

    let outcome = advance_task(pool, reader.as_ref(), &task, config).await;
    match outcome {
        Ok(()) => {
            let summary = update_sync_progress(pool, task.id_task).await?;
            tracing::info!(
                id_task = task.id_task,
                progress = summary.sync_progress,
                pending = summary.pending_count,
                stage = %summary.stage,
                "sync pass finished"
            );
        }
        Err(err) => {
            // Already recorded in the task error log by the engine wrapper.
            tracing::warn!(id_task = task.id_task, error = %format!("{:#}", err), "sync pass failed");
        }
    }

    release_task(pool, task.id_task).await?;
    Ok(())
}

/// Run the engine matching the task's stage. A completed resync hands back
/// to fetch, which then runs in the same invocation to pick up ids beyond
/// the old ceiling.
async fn advance_task(
    pool: &SqlitePool,
    reader: &dyn SourceReader,
    task: &Task,
    config: &Config,
) -> Result<()> {
    let batch_size = config.sync.batch_size;

    if task.stage == stage::RESYNC {
        run_resync(pool, reader, task, batch_size).await?;
        let Some(task) = get_task(pool, task.id_task).await? else {
            return Ok(());
        };
        run_fetch(pool, reader, &task, batch_size).await?;
    } else {
        run_fetch(pool, reader, task, batch_size).await?;
    }
    Ok(())
}
