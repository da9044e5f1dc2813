//! Run documents written by each stage: export manifest, import report and
//! checksum summary. Field names follow the camelCase file contract.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error on {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Writes `doc` as pretty-printed JSON, replacing any previous run's file.
pub fn write_document<T: Serialize>(path: &Path, doc: &T) -> Result<(), DocumentError> {
    let io_err = |source| DocumentError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let bytes = serde_json::to_vec_pretty(doc).map_err(|source| DocumentError::Json {
        path: path.display().to_string(),
        source,
    })?;
    std::fs::write(path, bytes).map_err(io_err)
}

pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, DocumentError> {
    let text = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| DocumentError::Json {
        path: path.display().to_string(),
        source,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestTotals {
    pub total_rows: u64,
    pub total_files: u64,
}

/// Summary of one export run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub export_date: DateTime<Utc>,
    pub supabase_url: String,
    pub tables: BTreeMap<String, u64>,
    pub storage: BTreeMap<String, u64>,
    pub totals: ManifestTotals,
    /// Column list per table, the union of keys seen in first-seen order.
    #[serde(default)]
    pub columns: BTreeMap<String, Vec<String>>,
}

impl Manifest {
    /// Builds a manifest whose totals are derived from the per-table and per-bucket counts.
    pub fn new(
        export_date: DateTime<Utc>,
        supabase_url: impl Into<String>,
        tables: BTreeMap<String, u64>,
        storage: BTreeMap<String, u64>,
        columns: BTreeMap<String, Vec<String>>,
    ) -> Self {
        let totals = ManifestTotals {
            total_rows: tables.values().sum(),
            total_files: storage.values().sum(),
        };
        Self {
            export_date,
            supabase_url: supabase_url.into(),
            tables,
            storage,
            totals,
            columns,
        }
    }

    pub fn totals_consistent(&self) -> bool {
        self.totals.total_rows == self.tables.values().sum::<u64>()
            && self.totals.total_files == self.storage.values().sum::<u64>()
    }

    pub fn columns_for(&self, table: &str) -> Option<&[String]> {
        self.columns
            .get(table)
            .filter(|cols| !cols.is_empty())
            .map(Vec::as_slice)
    }
}

/// A row that could not be imported. `row` is the row's `id`, or its line index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<JsonValue>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableImportResult {
    pub imported: u64,
    pub skipped: u64,
    pub errors: Vec<RowError>,
}

impl TableImportResult {
    pub fn failed(error: impl Into<String>, skipped: u64) -> Self {
        Self {
            imported: 0,
            skipped,
            errors: vec![RowError {
                row: None,
                error: error.into(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub file: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCopyResult {
    pub copied: u64,
    pub skipped: u64,
    pub errors: Vec<FileError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetUpdateResult {
    pub updated: u64,
    pub failed: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportTotals {
    pub rows_imported: u64,
    pub rows_skipped: u64,
    pub files_copied: u64,
    pub files_skipped: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableErrors {
    pub table: String,
    pub errors: Vec<RowError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportErrors {
    pub tables: Vec<TableErrors>,
    pub storage: Vec<FileError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub import_date: DateTime<Utc>,
    pub dry_run: bool,
    pub tables: BTreeMap<String, TableImportResult>,
    /// Copy results keyed by bucket.
    pub storage: BTreeMap<String, StorageCopyResult>,
    #[serde(default)]
    pub asset_urls: AssetUpdateResult,
    pub totals: ImportTotals,
    pub errors: ImportErrors,
}

impl ImportReport {
    pub fn new(
        import_date: DateTime<Utc>,
        dry_run: bool,
        tables: BTreeMap<String, TableImportResult>,
        storage: BTreeMap<String, StorageCopyResult>,
        asset_urls: AssetUpdateResult,
    ) -> Self {
        let totals = ImportTotals {
            rows_imported: tables.values().map(|r| r.imported).sum(),
            rows_skipped: tables.values().map(|r| r.skipped).sum(),
            files_copied: storage.values().map(|r| r.copied).sum(),
            files_skipped: storage.values().map(|r| r.skipped).sum(),
        };
        let errors = ImportErrors {
            tables: tables
                .iter()
                .filter(|(_, r)| !r.errors.is_empty())
                .map(|(name, r)| TableErrors {
                    table: name.clone(),
                    errors: r.errors.clone(),
                })
                .collect(),
            storage: storage
                .values()
                .flat_map(|r| r.errors.iter().cloned())
                .collect(),
        };
        Self {
            import_date,
            dry_run,
            tables,
            storage,
            asset_urls,
            totals,
            errors,
        }
    }
}

/// Per-table comparison between source and target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCheck {
    pub table_name: String,
    pub supabase_count: Option<u64>,
    pub mysql_count: Option<u64>,
    #[serde(rename = "match")]
    pub matches: bool,
    pub difference: Option<i64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_sample_ids: Vec<JsonValue>,
}

impl TableCheck {
    pub fn compared(table_name: impl Into<String>, source: u64, target: u64) -> Self {
        Self {
            table_name: table_name.into(),
            supabase_count: Some(source),
            mysql_count: Some(target),
            matches: source == target,
            difference: Some(target as i64 - source as i64),
            error: false,
            error_message: None,
            missing_sample_ids: Vec::new(),
        }
    }

    pub fn errored(
        table_name: impl Into<String>,
        source: Option<u64>,
        target: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            supabase_count: source,
            mysql_count: target,
            matches: false,
            difference: None,
            error: true,
            error_message: Some(message.into()),
            missing_sample_ids: Vec::new(),
        }
    }

    pub fn is_mismatch(&self) -> bool {
        !self.matches && !self.error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageCheck {
    pub exported_files: u64,
    pub copied_files: u64,
    #[serde(rename = "match")]
    pub matches: bool,
}

impl StorageCheck {
    pub fn new(exported_files: u64, copied_files: u64) -> Self {
        Self {
            exported_files,
            copied_files,
            matches: exported_files == copied_files,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSummary {
    pub total_tables: usize,
    pub matching_tables: usize,
    pub mismatched_tables: usize,
    pub error_tables: usize,
    pub storage_match: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumSummary {
    pub verification_date: DateTime<Utc>,
    pub tables: Vec<TableCheck>,
    pub storage: StorageCheck,
    pub summary: VerificationSummary,
}

impl ChecksumSummary {
    pub fn new(verification_date: DateTime<Utc>, tables: Vec<TableCheck>, storage: StorageCheck) -> Self {
        let summary = VerificationSummary {
            total_tables: tables.len(),
            matching_tables: tables.iter().filter(|t| t.matches).count(),
            mismatched_tables: tables.iter().filter(|t| t.is_mismatch()).count(),
            error_tables: tables.iter().filter(|t| t.error).count(),
            storage_match: storage.matches,
        };
        Self {
            verification_date,
            tables,
            storage,
            summary,
        }
    }

    /// True when every table matched and the file counts agree.
    pub fn passed(&self) -> bool {
        self.summary.mismatched_tables == 0
            && self.summary.error_tables == 0
            && self.summary.storage_match
    }
}
