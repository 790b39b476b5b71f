//! Task overview command.
//!
//! Prints a one-line-per-task table of stages, counters, and progress, plus
//! the last error line of any task that has one. Used by `proofsync tasks`
//! to check that the sync and correction runners are making progress.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

struct TaskOverview {
    id_task: i64,
    stage: String,
    status: String,
    table_name: String,
    records_total: i64,
    records_fetched: i64,
    records_processed: i64,
    sync_progress: f64,
    ai_progress: f64,
    last_error: Option<String>,
}

pub async fn run_tasks(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let rows = sqlx::query(
        "SELECT id_task, stage, status, table_name, records_total, records_fetched, \
                records_processed, sync_progress, ai_progress, error_log \
         FROM task ORDER BY id_task ASC",
    )
    .fetch_all(&pool)
    .await?;

    let tasks: Vec<TaskOverview> = rows
        .iter()
        .map(|row| {
            let error_log: Option<String> = row.get("error_log");
            TaskOverview {
                id_task: row.get("id_task"),
                stage: row.get("stage"),
                status: row.get("status"),
                table_name: row.get("table_name"),
                records_total: row.get("records_total"),
                records_fetched: row.get("records_fetched"),
                records_processed: row.get("records_processed"),
                sync_progress: row.get("sync_progress"),
                ai_progress: row.get("ai_progress"),
                last_error: error_log
                    .as_deref()
                    .and_then(|log| log.lines().last())
                    .map(String::from),
            }
        })
        .collect();

    if tasks.is_empty() {
        println!("No tasks.");
        pool.close().await;
        return Ok(());
    }

    println!(
        "{:<6} {:<8} {:<8} {:<20} {:>8} {:>8} {:>9} {:>7} {:>7}",
        "TASK", "STAGE", "STATUS", "TABLE", "TOTAL", "FETCHED", "PROCESSED", "SYNC%", "AI%"
    );
    println!("{}", "-".repeat(92));
    for t in &tasks {
        println!(
            "{:<6} {:<8} {:<8} {:<20} {:>8} {:>8} {:>9} {:>7.2} {:>7.2}",
            t.id_task,
            t.stage,
            t.status,
            t.table_name,
            t.records_total,
            t.records_fetched,
            t.records_processed,
            t.sync_progress,
            t.ai_progress,
        );
    }

    let with_errors: Vec<&TaskOverview> = tasks.iter().filter(|t| t.last_error.is_some()).collect();
    if !with_errors.is_empty() {
        println!();
        println!("Last errors:");
        for t in with_errors {
            if let Some(error) = &t.last_error {
                println!("  task {}: {}", t.id_task, error);
            }
        }
    }

    pool.close().await;
    Ok(())
}
