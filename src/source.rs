//! Source query building and reading.
//!
//! The query builders produce dialect-correct statements for the three
//! supported source kinds: MySQL-like (`LIMIT`, `?` placeholders),
//! SQL-Server-like (`TOP`, `@P1` placeholders), and embedded SQLite files.
//! Table and column identifiers are validated against a strict allow-pattern
//! before interpolation; all data values remain bound parameters.
//!
//! [`SourceReader`] is the seam between the fetch/resync engines and the
//! source connection. Engines only ever see [`SourceRow`]s in ascending
//! `remote_id` order, never driver-specific row shapes.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

use crate::models::{DatabaseConnection, SourceRow};
use crate::util::sanitize_identifier;

/// Supported source dialect tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDialect {
    MySql,
    MsSql,
    Sqlite,
}

impl SourceDialect {
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "mysql" => Ok(SourceDialect::MySql),
            "mssql" => Ok(SourceDialect::MsSql),
            "sqlite" => Ok(SourceDialect::Sqlite),
            other => bail!("Unsupported source database type: {}", other),
        }
    }

    fn placeholder(&self) -> &'static str {
        match self {
            SourceDialect::MsSql => "@P1",
            _ => "?",
        }
    }
}

/// Single-row probe select, used to verify the id column exists and is
/// populated before any pagination starts.
pub fn build_probe_query(
    dialect: SourceDialect,
    table: &str,
    id_column: &str,
    text_column: &str,
) -> Result<String> {
    let table = sanitize_identifier(table)?;
    let id_column = sanitize_identifier(id_column)?;
    let text_column = sanitize_identifier(text_column)?;

    Ok(match dialect {
        SourceDialect::MsSql => format!(
            "SELECT TOP 1 {id} AS remote_id, {text} AS text_value FROM {table} ORDER BY {id} ASC",
            id = id_column,
            text = text_column,
            table = table,
        ),
        _ => format!(
            "SELECT {id} AS remote_id, {text} AS text_value FROM {table} ORDER BY {id} ASC LIMIT 1",
            id = id_column,
            text = text_column,
            table = table,
        ),
    })
}

/// Total row count select.
pub fn build_count_query(table: &str) -> Result<String> {
    let table = sanitize_identifier(table)?;
    Ok(format!("SELECT COUNT(*) AS total_count FROM {}", table))
}

/// Maximum source id select.
pub fn build_max_id_query(table: &str, id_column: &str) -> Result<String> {
    let table = sanitize_identifier(table)?;
    let id_column = sanitize_identifier(id_column)?;
    Ok(format!(
        "SELECT MAX({}) AS max_id FROM {}",
        id_column, table
    ))
}

/// Paginated select: rows with id strictly greater than the bound marker,
/// ascending, at most `batch_size` rows. The marker is the single bound
/// parameter.
pub fn build_page_query(
    dialect: SourceDialect,
    table: &str,
    id_column: &str,
    text_column: &str,
    batch_size: i64,
) -> Result<String> {
    let table = sanitize_identifier(table)?;
    let id_column = sanitize_identifier(id_column)?;
    let text_column = sanitize_identifier(text_column)?;
    let marker = dialect.placeholder();

    Ok(match dialect {
        SourceDialect::MsSql => format!(
            "SELECT TOP {n} {id} AS remote_id, {text} AS text_value FROM {table} \
             WHERE {id} > {marker} ORDER BY {id} ASC",
            n = batch_size,
            id = id_column,
            text = text_column,
            table = table,
            marker = marker,
        ),
        _ => format!(
            "SELECT {id} AS remote_id, {text} AS text_value FROM {table} \
             WHERE {id} > {marker} ORDER BY {id} ASC LIMIT {n}",
            n = batch_size,
            id = id_column,
            text = text_column,
            table = table,
            marker = marker,
        ),
    })
}

/// Read-only access to one source table. The source connection is never
/// mutated by this engine.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Fetch one row to verify the column shape. Errors when the id column
    /// is absent or holds no value; `None` when the table is empty.
    async fn probe(&self) -> Result<Option<SourceRow>>;
    /// Total row count of the source table.
    async fn count(&self) -> Result<i64>;
    /// Maximum source id, or 0 for an empty table.
    async fn max_id(&self) -> Result<i64>;
    /// Up to `limit` rows with id strictly greater than `after`, ascending.
    async fn fetch_page(&self, after: i64, limit: i64) -> Result<Vec<SourceRow>>;
}

/// Embedded-file source reader backed by SQLite.
pub struct SqliteSource {
    pool: SqlitePool,
    table: String,
    id_column: String,
    text_column: String,
}

impl SqliteSource {
    pub async fn open(
        path: &str,
        table: &str,
        id_column: &str,
        text_column: &str,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(false)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            table: table.to_string(),
            id_column: id_column.to_string(),
            text_column: text_column.to_string(),
        })
    }
}

#[async_trait]
impl SourceReader for SqliteSource {
    async fn probe(&self) -> Result<Option<SourceRow>> {
        let sql = build_probe_query(
            SourceDialect::Sqlite,
            &self.table,
            &self.id_column,
            &self.text_column,
        )?;
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let remote_id: Option<i64> = row.try_get("remote_id")?;
                let Some(remote_id) = remote_id else {
                    bail!("Id column '{}' holds no value in the source table", self.id_column);
                };
                let text_value: Option<String> = row.try_get("text_value")?;
                Ok(Some(SourceRow {
                    remote_id,
                    text_value: text_value.unwrap_or_default(),
                }))
            }
        }
    }

    async fn count(&self) -> Result<i64> {
        let sql = build_count_query(&self.table)?;
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn max_id(&self) -> Result<i64> {
        let sql = build_max_id_query(&self.table, &self.id_column)?;
        let max: Option<i64> = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(max.unwrap_or(0))
    }

    async fn fetch_page(&self, after: i64, limit: i64) -> Result<Vec<SourceRow>> {
        let sql = build_page_query(
            SourceDialect::Sqlite,
            &self.table,
            &self.id_column,
            &self.text_column,
            limit,
        )?;
        let rows = sqlx::query(&sql).bind(after).fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                let remote_id: i64 = row.try_get("remote_id")?;
                let text_value: Option<String> = row.try_get("text_value")?;
                Ok(SourceRow {
                    remote_id,
                    text_value: text_value.unwrap_or_default(),
                })
            })
            .collect()
    }
}

/// MySQL-like source reader.
pub struct MySqlSource {
    pool: MySqlPool,
    table: String,
    id_column: String,
    text_column: String,
}

impl MySqlSource {
    pub async fn connect(
        params: &DatabaseConnection,
        table: &str,
        id_column: &str,
        text_column: &str,
    ) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&params.host)
            .port(if params.port > 0 { params.port as u16 } else { 3306 })
            .username(&params.db_user)
            .password(&params.db_password)
            .database(&params.db_name);
        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            table: table.to_string(),
            id_column: id_column.to_string(),
            text_column: text_column.to_string(),
        })
    }
}

#[async_trait]
impl SourceReader for MySqlSource {
    async fn probe(&self) -> Result<Option<SourceRow>> {
        let sql = build_probe_query(
            SourceDialect::MySql,
            &self.table,
            &self.id_column,
            &self.text_column,
        )?;
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let remote_id: Option<i64> = row.try_get("remote_id")?;
                let Some(remote_id) = remote_id else {
                    bail!("Id column '{}' holds no value in the source table", self.id_column);
                };
                let text_value: Option<String> = row.try_get("text_value")?;
                Ok(Some(SourceRow {
                    remote_id,
                    text_value: text_value.unwrap_or_default(),
                }))
            }
        }
    }

    async fn count(&self) -> Result<i64> {
        let sql = build_count_query(&self.table)?;
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn max_id(&self) -> Result<i64> {
        let sql = build_max_id_query(&self.table, &self.id_column)?;
        let max: Option<i64> = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(max.unwrap_or(0))
    }

    async fn fetch_page(&self, after: i64, limit: i64) -> Result<Vec<SourceRow>> {
        let sql = build_page_query(
            SourceDialect::MySql,
            &self.table,
            &self.id_column,
            &self.text_column,
            limit,
        )?;
        let rows = sqlx::query(&sql).bind(after).fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                let remote_id: i64 = row.try_get("remote_id")?;
                let text_value: Option<String> = row.try_get("text_value")?;
                Ok(SourceRow {
                    remote_id,
                    text_value: text_value.unwrap_or_default(),
                })
            })
            .collect()
    }
}

/// Open a reader for the source described by `params`, scoped to one task's
/// table and columns. Connection failures here are connectivity errors: the
/// invocation fails without mutating any task state.
pub async fn connect_source(
    params: &DatabaseConnection,
    table: &str,
    id_column: &str,
    text_column: &str,
) -> Result<Box<dyn SourceReader>> {
    match SourceDialect::from_tag(&params.db_type)? {
        SourceDialect::Sqlite => Ok(Box::new(
            SqliteSource::open(&params.db_name, table, id_column, text_column).await?,
        )),
        SourceDialect::MySql => Ok(Box::new(
            MySqlSource::connect(params, table, id_column, text_column).await?,
        )),
        SourceDialect::MsSql => {
            // Statement contract is implemented and tested; no MSSQL driver
            // is bundled with this build.
            bail!("No MSSQL driver is available in this build; use an external reader")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_query_per_dialect() {
        let mysql =
            build_probe_query(SourceDialect::MySql, "articles", "id", "body").unwrap();
        assert_eq!(
            mysql,
            "SELECT id AS remote_id, body AS text_value FROM articles ORDER BY id ASC LIMIT 1"
        );

        let mssql =
            build_probe_query(SourceDialect::MsSql, "articles", "id", "body").unwrap();
        assert_eq!(
            mssql,
            "SELECT TOP 1 id AS remote_id, body AS text_value FROM articles ORDER BY id ASC"
        );
    }

    #[test]
    fn page_query_mysql_uses_limit_and_question_mark() {
        let sql =
            build_page_query(SourceDialect::MySql, "articles", "id", "body", 50).unwrap();
        assert_eq!(
            sql,
            "SELECT id AS remote_id, body AS text_value FROM articles \
             WHERE id > ? ORDER BY id ASC LIMIT 50"
        );
    }

    #[test]
    fn page_query_mssql_uses_top_and_named_placeholder() {
        let sql =
            build_page_query(SourceDialect::MsSql, "articles", "id", "body", 50).unwrap();
        assert_eq!(
            sql,
            "SELECT TOP 50 id AS remote_id, body AS text_value FROM articles \
             WHERE id > @P1 ORDER BY id ASC"
        );
    }

    #[test]
    fn count_and_max_queries() {
        assert_eq!(
            build_count_query("articles").unwrap(),
            "SELECT COUNT(*) AS total_count FROM articles"
        );
        assert_eq!(
            build_max_id_query("articles", "id").unwrap(),
            "SELECT MAX(id) AS max_id FROM articles"
        );
    }

    #[test]
    fn builders_reject_bad_identifiers() {
        assert!(build_count_query("articles; DROP TABLE x").is_err());
        assert!(build_page_query(SourceDialect::MySql, "t", "id OR 1=1", "body", 10).is_err());
        assert!(build_probe_query(SourceDialect::Sqlite, "t", "id", "body--").is_err());
    }

    #[test]
    fn unknown_dialect_tag_errors() {
        assert!(SourceDialect::from_tag("pgsql").is_err());
        assert!(SourceDialect::from_tag("").is_err());
    }
}
