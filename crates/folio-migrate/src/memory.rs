//! In-memory source and target used to exercise the pipelines without a
//! network or a MySQL server.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use folio_core::Record;
use folio_storage::{SourceBackend, SourceError, StorageObject};
use serde_json::Value as JsonValue;

use crate::target::{id_key, SqlValue, TargetDatabase, TargetError};

#[derive(Debug, Clone)]
struct MemoryObject {
    entry: StorageObject,
    bytes: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct MemorySource {
    endpoint: String,
    unreachable: bool,
    tables: BTreeMap<String, Vec<Record>>,
    buckets: BTreeMap<String, Vec<MemoryObject>>,
    failing_tables: HashSet<String>,
    uncountable_tables: HashSet<String>,
    transient_page_failures: Mutex<usize>,
    page_requests: Mutex<BTreeMap<String, usize>>,
    list_requests: Mutex<BTreeMap<String, usize>>,
}

impl MemorySource {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Adds a table; non-object values are ignored.
    pub fn with_table(mut self, name: &str, rows: Vec<JsonValue>) -> Self {
        let records = rows
            .into_iter()
            .filter_map(|row| match row {
                JsonValue::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.tables.insert(name.to_string(), records);
        self
    }

    pub fn with_object(mut self, bucket: &str, name: &str, bytes: &[u8]) -> Self {
        self.push_object(bucket, name, Some(format!("obj-{name}")), Some(bytes.to_vec()));
        self
    }

    pub fn with_folder(mut self, bucket: &str, name: &str) -> Self {
        self.push_object(bucket, name, None, None);
        self
    }

    /// An object that lists fine but cannot be downloaded.
    pub fn with_broken_object(mut self, bucket: &str, name: &str) -> Self {
        self.push_object(bucket, name, Some(format!("obj-{name}")), None);
        self
    }

    /// Every page fetch and count for `name` fails.
    pub fn failing_table(mut self, name: &str) -> Self {
        self.failing_tables.insert(name.to_string());
        self
    }

    pub fn uncountable_table(mut self, name: &str) -> Self {
        self.uncountable_tables.insert(name.to_string());
        self
    }

    /// The next `n` page fetches fail with a retryable error.
    pub fn transient_page_failures(self, n: usize) -> Self {
        *self.transient_page_failures.lock().unwrap_or_else(PoisonError::into_inner) = n;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn page_requests(&self, table: &str) -> usize {
        self.page_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .copied()
            .unwrap_or(0)
    }

    pub fn list_requests(&self, bucket: &str) -> usize {
        self.list_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bucket)
            .copied()
            .unwrap_or(0)
    }

    fn push_object(&mut self, bucket: &str, name: &str, id: Option<String>, bytes: Option<Vec<u8>>) {
        let objects = self.buckets.entry(bucket.to_string()).or_default();
        objects.push(MemoryObject {
            entry: StorageObject {
                name: name.to_string(),
                id,
                metadata: None,
            },
            bytes,
        });
        objects.sort_by(|a, b| a.entry.name.cmp(&b.entry.name));
    }

    fn table(&self, table: &str) -> Result<&Vec<Record>, SourceError> {
        if self.failing_tables.contains(table) {
            return Err(SourceError::Unavailable(format!("{table} is failing")));
        }
        self.tables.get(table).ok_or_else(|| SourceError::HttpStatus {
            status: 404,
            url: format!("memory://{table}"),
            body: "relation does not exist".to_string(),
        })
    }
}

#[async_trait]
impl SourceBackend for MemorySource {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn ping(&self) -> Result<(), SourceError> {
        if self.unreachable {
            return Err(SourceError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<u64, SourceError> {
        if self.uncountable_tables.contains(table) {
            return Err(SourceError::Unavailable(format!("cannot count {table}")));
        }
        Ok(self.table(table)?.len() as u64)
    }

    async fn fetch_page(
        &self,
        table: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Record>, SourceError> {
        *self
            .page_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table.to_string())
            .or_default() += 1;
        {
            let mut transient = self.transient_page_failures.lock().unwrap_or_else(PoisonError::into_inner);
            if *transient > 0 {
                *transient -= 1;
                return Err(SourceError::Unavailable("transient failure".to_string()));
            }
        }
        Ok(self
            .table(table)?
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn sample_ids(&self, table: &str, limit: u64) -> Result<Vec<JsonValue>, SourceError> {
        Ok(self
            .table(table)?
            .iter()
            .filter_map(|row| row.get("id").cloned())
            .take(limit as usize)
            .collect())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<StorageObject>, SourceError> {
        *self
            .list_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(bucket.to_string())
            .or_default() += 1;
        let objects = self.buckets.get(bucket).ok_or_else(|| SourceError::HttpStatus {
            status: 400,
            url: format!("memory://storage/{bucket}"),
            body: "Bucket not found".to_string(),
        })?;
        Ok(objects
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|o| o.entry.clone())
            .collect())
    }

    async fn download_object(&self, bucket: &str, name: &str) -> Result<Vec<u8>, SourceError> {
        self.buckets
            .get(bucket)
            .and_then(|objects| objects.iter().find(|o| o.entry.name == name))
            .and_then(|o| o.bytes.clone())
            .ok_or_else(|| SourceError::HttpStatus {
                status: 404,
                url: format!("memory://storage/{bucket}/{name}"),
                body: "Object not found".to_string(),
            })
    }
}

type MemoryRow = BTreeMap<String, SqlValue>;

fn sql_key(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "null".to_string(),
        SqlValue::Bool(b) => b.to_string(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::UInt(u) => u.to_string(),
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Text(s) => s.clone(),
    }
}

/// Tables with an `id` primary key, transactional inserts and injectable failures.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    tables: BTreeMap<String, Vec<MemoryRow>>,
    pending: Vec<(String, MemoryRow)>,
    in_transaction: bool,
    failing_commits: usize,
    uncountable: HashSet<String>,
    writes: usize,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str) -> Self {
        self.tables.entry(name.to_string()).or_default();
        self
    }

    pub fn with_tables<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        for name in names {
            self.tables.entry(name.to_string()).or_default();
        }
        self
    }

    pub fn with_rows(mut self, name: &str, rows: Vec<JsonValue>) -> Self {
        let table = self.tables.entry(name.to_string()).or_default();
        for row in rows {
            if let JsonValue::Object(map) = row {
                table.push(
                    map.iter()
                        .map(|(k, v)| (k.clone(), SqlValue::from_json(v)))
                        .collect(),
                );
            }
        }
        self
    }

    /// The next `n` commits fail as if the connection dropped.
    pub fn failing_commits(mut self, n: usize) -> Self {
        self.failing_commits = n;
        self
    }

    pub fn uncountable(mut self, name: &str) -> Self {
        self.uncountable.insert(name.to_string());
        self
    }

    pub fn rows(&self, table: &str) -> &[MemoryRow] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    /// Successful inserts and updates, committed or not.
    pub fn writes(&self) -> usize {
        self.writes
    }

    fn has_id(&self, table: &str, key: &str) -> bool {
        let matches = |row: &MemoryRow| row.get("id").map(sql_key).as_deref() == Some(key);
        self.rows(table).iter().any(matches)
            || self
                .pending
                .iter()
                .any(|(t, row)| t == table && matches(row))
    }
}

#[async_trait]
impl TargetDatabase for MemoryTarget {
    async fn begin(&mut self) -> Result<(), TargetError> {
        if self.in_transaction {
            return Err(TargetError::Connection("transaction already open".to_string()));
        }
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), TargetError> {
        if self.failing_commits > 0 {
            self.failing_commits -= 1;
            return Err(TargetError::Connection("server has gone away".to_string()));
        }
        for (table, row) in self.pending.drain(..) {
            self.tables.entry(table).or_default().push(row);
        }
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), TargetError> {
        self.writes -= self.pending.len();
        self.pending.clear();
        self.in_transaction = false;
        Ok(())
    }

    async fn insert_row(
        &mut self,
        table: &str,
        columns: &[String],
        values: &[SqlValue],
    ) -> Result<(), TargetError> {
        if !self.tables.contains_key(table) {
            return Err(TargetError::Statement(format!("Table '{table}' doesn't exist")));
        }
        if columns.len() != values.len() {
            return Err(TargetError::Statement(
                "Column count doesn't match value count".to_string(),
            ));
        }
        let row: MemoryRow = columns.iter().cloned().zip(values.iter().cloned()).collect();
        if let Some(id) = row.get("id").filter(|id| **id != SqlValue::Null) {
            let key = sql_key(id);
            if self.has_id(table, &key) {
                return Err(TargetError::Statement(format!(
                    "Duplicate entry '{key}' for key 'PRIMARY'"
                )));
            }
        }
        self.writes += 1;
        if self.in_transaction {
            self.pending.push((table.to_string(), row));
        } else {
            self.tables.entry(table.to_string()).or_default().push(row);
        }
        Ok(())
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64, TargetError> {
        if self.uncountable.contains(table) {
            return Err(TargetError::Connection(format!("lost connection counting {table}")));
        }
        self.tables
            .get(table)
            .map(|rows| rows.len() as u64)
            .ok_or_else(|| TargetError::Statement(format!("Table '{table}' doesn't exist")))
    }

    async fn existing_ids(&mut self, table: &str, ids: &[JsonValue]) -> Result<Vec<String>, TargetError> {
        let wanted: HashSet<String> = ids.iter().map(id_key).collect();
        Ok(self
            .rows(table)
            .iter()
            .filter_map(|row| row.get("id").map(sql_key))
            .filter(|key| wanted.contains(key))
            .collect())
    }

    async fn path_rows(
        &mut self,
        table: &str,
        id_column: &str,
        path_column: &str,
    ) -> Result<Vec<(String, Option<String>)>, TargetError> {
        let rows = self
            .tables
            .get(table)
            .ok_or_else(|| TargetError::Statement(format!("Table '{table}' doesn't exist")))?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let id = row.get(id_column).map(sql_key)?;
                let path = match row.get(path_column) {
                    Some(SqlValue::Text(s)) => Some(s.clone()),
                    _ => None,
                };
                Some((id, path))
            })
            .collect())
    }

    async fn update_path(
        &mut self,
        table: &str,
        id_column: &str,
        path_column: &str,
        id: &str,
        path: &str,
    ) -> Result<(), TargetError> {
        let rows = self
            .tables
            .get_mut(table)
            .ok_or_else(|| TargetError::Statement(format!("Table '{table}' doesn't exist")))?;
        for row in rows
            .iter_mut()
            .filter(|row| row.get(id_column).map(sql_key).as_deref() == Some(id))
        {
            row.insert(path_column.to_string(), SqlValue::Text(path.to_string()));
            self.writes += 1;
        }
        Ok(())
    }
}
