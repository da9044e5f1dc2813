//! Core domain model for the portfolio migration pipeline.
//!
//! Everything the exporter, importer and verifier share lives here: the table
//! catalog that drives all three loops, the JSON documents each stage leaves
//! behind, and the environment-driven configuration.

mod catalog;
mod config;
mod documents;

pub use catalog::{AssetRule, CatalogError, TableCatalog, TableDescriptor};
pub use config::{ConfigError, MigrationConfig, MysqlConfig, SourceConfig};
pub use documents::{
    read_document, write_document, AssetUpdateResult, ChecksumSummary, DocumentError,
    ImportErrors, ImportReport, ImportTotals, Manifest, ManifestTotals, RowError, StorageCheck,
    StorageCopyResult, TableCheck, TableErrors, TableImportResult, VerificationSummary,
    FileError,
};

pub const CRATE_NAME: &str = "folio-core";

/// One exported row: arbitrary column names mapped to arbitrary JSON values.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Public URL prefix under which copied storage files are served.
pub const PUBLIC_UPLOADS_PREFIX: &str = "/uploads";
