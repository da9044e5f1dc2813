//! Relational target of a migration. The importer and verifier only see the
//! [`TargetDatabase`] trait; [`MysqlTarget`] is the production implementation.

use async_trait::async_trait;
use folio_core::MysqlConfig;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::query::Query;
use sqlx::{MySql, Row, Transaction};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// One statement failed (constraint violation, bad value). The connection is still usable.
    #[error("{0}")]
    Statement(String),
    /// The connection or transaction itself failed.
    #[error("connection error: {0}")]
    Connection(String),
}

impl From<sqlx::Error> for TargetError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(_)
            | sqlx::Error::RowNotFound
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => Self::Statement(err.to_string()),
            other => Self::Connection(other.to_string()),
        }
    }
}

/// A JSON value lowered to what gets bound into an insert.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    /// Arrays and objects become JSON text; everything else maps onto its scalar.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::UInt(u)
                } else {
                    Self::Float(n.as_f64().unwrap_or_default())
                }
            }
            JsonValue::String(s) => Self::Text(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => Self::Text(value.to_string()),
        }
    }
}

/// String form used to compare ids across source and target.
pub fn id_key(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
pub trait TargetDatabase: Send {
    async fn begin(&mut self) -> Result<(), TargetError>;

    async fn commit(&mut self) -> Result<(), TargetError>;

    async fn rollback(&mut self) -> Result<(), TargetError>;

    async fn insert_row(
        &mut self,
        table: &str,
        columns: &[String],
        values: &[SqlValue],
    ) -> Result<(), TargetError>;

    async fn count_rows(&mut self, table: &str) -> Result<u64, TargetError>;

    /// Which of `ids` exist in `table`, as [`id_key`] strings.
    async fn existing_ids(&mut self, table: &str, ids: &[JsonValue]) -> Result<Vec<String>, TargetError>;

    /// `(id, path)` pairs for every row of `table`.
    async fn path_rows(
        &mut self,
        table: &str,
        id_column: &str,
        path_column: &str,
    ) -> Result<Vec<(String, Option<String>)>, TargetError>;

    async fn update_path(
        &mut self,
        table: &str,
        id_column: &str,
        path_column: &str,
        id: &str,
        path: &str,
    ) -> Result<(), TargetError>;
}

pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub fn insert_statement(table: &str, columns: &[String]) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({column_list}) VALUES ({placeholders})",
        quote_identifier(table)
    )
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &SqlValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::UInt(u) => query.bind(*u),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.clone()),
    }
}

/// MySQL target holding one connection for the whole process.
pub struct MysqlTarget {
    pool: MySqlPool,
    tx: Option<Transaction<'static, MySql>>,
}

impl MysqlTarget {
    pub async fn connect(config: &MysqlConfig) -> Result<Self, TargetError> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| TargetError::Connection(e.to_string()))?;
        Ok(Self { pool, tx: None })
    }

    pub async fn close(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.rollback().await;
        }
        self.pool.close().await;
    }

    async fn execute(&mut self, query: Query<'_, MySql, MySqlArguments>) -> Result<u64, TargetError> {
        let result = match self.tx.as_mut() {
            Some(tx) => query.execute(&mut **tx).await?,
            None => query.execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TargetDatabase for MysqlTarget {
    async fn begin(&mut self) -> Result<(), TargetError> {
        if self.tx.is_some() {
            return Err(TargetError::Connection("transaction already open".to_string()));
        }
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TargetError::Connection(e.to_string()))?;
        self.tx = Some(tx);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), TargetError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| TargetError::Connection("no open transaction".to_string()))?;
        tx.commit()
            .await
            .map_err(|e| TargetError::Connection(e.to_string()))
    }

    async fn rollback(&mut self) -> Result<(), TargetError> {
        match self.tx.take() {
            Some(tx) => tx
                .rollback()
                .await
                .map_err(|e| TargetError::Connection(e.to_string())),
            None => Ok(()),
        }
    }

    async fn insert_row(
        &mut self,
        table: &str,
        columns: &[String],
        values: &[SqlValue],
    ) -> Result<(), TargetError> {
        let sql = insert_statement(table, columns);
        let query = values
            .iter()
            .fold(sqlx::query(&sql), |query, value| bind_value(query, value));
        self.execute(query).await?;
        Ok(())
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64, TargetError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn existing_ids(&mut self, table: &str, ids: &[JsonValue]) -> Result<Vec<String>, TargetError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT CAST(`id` AS CHAR) FROM {} WHERE `id` IN ({placeholders})",
            quote_identifier(table)
        );
        let query = ids
            .iter()
            .fold(sqlx::query(&sql), |query, id| query.bind(id_key(id)));
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(TargetError::from))
            .collect()
    }

    async fn path_rows(
        &mut self,
        table: &str,
        id_column: &str,
        path_column: &str,
    ) -> Result<Vec<(String, Option<String>)>, TargetError> {
        let sql = format!(
            "SELECT CAST({} AS CHAR), {} FROM {}",
            quote_identifier(id_column),
            quote_identifier(path_column),
            quote_identifier(table)
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<(String, Option<String>), TargetError> {
                let id: String = row.try_get(0)?;
                let path: Option<String> = row.try_get(1)?;
                Ok((id, path))
            })
            .collect()
    }

    async fn update_path(
        &mut self,
        table: &str,
        id_column: &str,
        path_column: &str,
        id: &str,
        path: &str,
    ) -> Result<(), TargetError> {
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} = ?",
            quote_identifier(table),
            quote_identifier(path_column),
            quote_identifier(id_column)
        );
        let query = sqlx::query(&sql).bind(path.to_string()).bind(id.to_string());
        self.execute(query).await?;
        Ok(())
    }
}
