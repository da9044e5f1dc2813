//! Compares row and file counts between the source, the target and the local copies.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use folio_core::{
    write_document, ChecksumSummary, MigrationConfig, StorageCheck, TableCatalog, TableCheck,
    TableDescriptor,
};
use folio_storage::{count_files, retry_with_backoff, BackoffPolicy, SourceBackend};
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use crate::target::{id_key, TargetDatabase};

/// How many source ids are spot-checked per table.
const SAMPLE_SIZE: u64 = 5;

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub storage_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub checksums_path: PathBuf,
    pub sample_size: u64,
    pub backoff: BackoffPolicy,
}

impl VerifyOptions {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            storage_dir: config.storage_dir(),
            uploads_dir: config.uploads_dir.clone(),
            checksums_path: config.checksums_path(),
            sample_size: SAMPLE_SIZE,
            backoff: BackoffPolicy::default(),
        }
    }
}

pub struct Verifier<'a> {
    source: &'a dyn SourceBackend,
    target: &'a mut dyn TargetDatabase,
    catalog: &'a TableCatalog,
    options: VerifyOptions,
}

impl<'a> Verifier<'a> {
    pub fn new(
        source: &'a dyn SourceBackend,
        target: &'a mut dyn TargetDatabase,
        catalog: &'a TableCatalog,
        options: VerifyOptions,
    ) -> Self {
        Self {
            source,
            target,
            catalog,
            options,
        }
    }

    /// Checks every table and the file tree, then writes `checksums.json`.
    ///
    /// Mismatches are reported in the summary; only failing to write the
    /// summary is an error.
    pub async fn run(&mut self) -> Result<ChecksumSummary> {
        let catalog = self.catalog;
        let mut tables = Vec::with_capacity(catalog.len());
        for table in catalog.iter() {
            let check = self.verify_table(table).await;
            if check.error {
                error!(
                    table = %check.table_name,
                    error = check.error_message.as_deref().unwrap_or_default(),
                    "could not compare table"
                );
            } else if check.matches {
                info!(table = %check.table_name, rows = ?check.mysql_count, "counts match");
            } else {
                warn!(
                    table = %check.table_name,
                    source = ?check.supabase_count,
                    target = ?check.mysql_count,
                    difference = ?check.difference,
                    "row count mismatch"
                );
            }
            tables.push(check);
        }

        let storage = self.verify_storage().await;
        if !storage.matches {
            warn!(
                exported = storage.exported_files,
                copied = storage.copied_files,
                "file count mismatch"
            );
        }

        let summary = ChecksumSummary::new(Utc::now(), tables, storage);
        write_document(&self.options.checksums_path, &summary)
            .with_context(|| format!("writing {}", self.options.checksums_path.display()))?;
        info!(
            total = summary.summary.total_tables,
            matching = summary.summary.matching_tables,
            mismatched = summary.summary.mismatched_tables,
            errors = summary.summary.error_tables,
            storage_match = summary.summary.storage_match,
            path = %self.options.checksums_path.display(),
            "verification complete"
        );
        Ok(summary)
    }

    /// Count comparison for one table. Failures become an error entry, never a panic or early exit.
    pub async fn verify_table(&mut self, table: &TableDescriptor) -> TableCheck {
        let source = retry_with_backoff(&self.options.backoff, "count source rows", || {
            self.source.count_rows(&table.name)
        })
        .await;
        let target = self.target.count_rows(&table.name).await;

        let (source, target) = match (source, target) {
            (Ok(source), Ok(target)) => (source, target),
            (source, target) => {
                let mut messages = Vec::new();
                if let Err(err) = &source {
                    messages.push(format!("source: {err}"));
                }
                if let Err(err) = &target {
                    messages.push(format!("target: {err}"));
                }
                return TableCheck::errored(
                    &table.name,
                    source.ok(),
                    target.ok(),
                    messages.join("; "),
                );
            }
        };

        let mut check = TableCheck::compared(&table.name, source, target);
        if source > 0 && self.options.sample_size > 0 {
            check.missing_sample_ids = self.missing_sample_ids(table).await;
        }
        check
    }

    /// Source ids from a small sample that the target does not have. Informational only.
    async fn missing_sample_ids(&mut self, table: &TableDescriptor) -> Vec<JsonValue> {
        let ids = match self.source.sample_ids(&table.name, self.options.sample_size).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(table = %table.name, error = %err, "could not sample source ids");
                return Vec::new();
            }
        };
        if ids.is_empty() {
            return Vec::new();
        }
        match self.target.existing_ids(&table.name, &ids).await {
            Ok(present) => ids
                .into_iter()
                .filter(|id| !present.contains(&id_key(id)))
                .collect(),
            Err(err) => {
                warn!(table = %table.name, error = %err, "could not look up sampled ids");
                Vec::new()
            }
        }
    }

    /// Exported files versus files in the upload tree. Unreadable trees count as empty.
    pub async fn verify_storage(&self) -> StorageCheck {
        let exported = count_or_zero(&self.options.storage_dir).await;
        let copied = count_or_zero(&self.options.uploads_dir).await;
        StorageCheck::new(exported, copied)
    }
}

async fn count_or_zero(root: &std::path::Path) -> u64 {
    match count_files(root).await {
        Ok(count) => count,
        Err(err) => {
            warn!(path = %root.display(), error = %format!("{err:#}"), "could not count files");
            0
        }
    }
}
