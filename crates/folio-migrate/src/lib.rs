//! Export, import and verification pipelines.
//!
//! Each pipeline takes its collaborators as trait objects so it can be run
//! against [`memory`] doubles; the `run_*_from_env` functions wire up the
//! production source and target from the environment.

mod export;
mod import;
pub mod memory;
mod target;
mod verify;

use anyhow::{bail, Context, Result};
use folio_core::{ChecksumSummary, ImportReport, Manifest, MigrationConfig, TableCatalog};
use folio_storage::SupabaseSource;
use tokio::fs;
use tracing::info;

pub use export::{ExportOptions, Exporter, TableExport};
pub use import::{FileMapping, ImportOptions, Importer};
pub use target::{id_key, insert_statement, quote_identifier, MysqlTarget, SqlValue, TargetDatabase, TargetError};
pub use verify::{VerifyOptions, Verifier};

pub const CRATE_NAME: &str = "folio-migrate";

fn load_catalog(config: &MigrationConfig) -> Result<TableCatalog> {
    let path = config.catalog_path();
    TableCatalog::load_or_default(&path).with_context(|| format!("loading {}", path.display()))
}

pub async fn run_export_from_env() -> Result<Manifest> {
    let config = MigrationConfig::from_env()?;
    let catalog = load_catalog(&config)?;
    let source = SupabaseSource::new(&config.source()?)?;
    info!(tables = catalog.len(), export_dir = %config.export_dir().display(), "starting export");
    Exporter::new(&source, &catalog, ExportOptions::from_config(&config))
        .run()
        .await
}

pub async fn run_import_from_env(dry_run: bool) -> Result<ImportReport> {
    let config = MigrationConfig::from_env()?;
    let mysql = config.mysql_strict()?;
    let catalog = load_catalog(&config)?;
    let export_dir = config.export_dir();
    if !fs::try_exists(&export_dir).await.unwrap_or(false) {
        bail!(
            "export directory {} not found; run folio-export first",
            export_dir.display()
        );
    }

    let mut target = MysqlTarget::connect(&mysql)
        .await
        .with_context(|| format!("connecting to MySQL at {}", mysql.display_target()))?;
    info!(target = %mysql.display_target(), dry_run, "starting import");
    let result = Importer::new(&mut target, &catalog, ImportOptions::from_config(&config, dry_run))
        .run()
        .await;
    target.close().await;
    result
}

pub async fn run_verify_from_env() -> Result<ChecksumSummary> {
    let config = MigrationConfig::from_env()?;
    let catalog = load_catalog(&config)?;
    let source = SupabaseSource::new(&config.source()?)?;
    let mysql = config.mysql();
    let mut target = MysqlTarget::connect(&mysql)
        .await
        .with_context(|| format!("connecting to MySQL at {}", mysql.display_target()))?;
    info!(target = %mysql.display_target(), "starting verification");
    let result = Verifier::new(&source, &mut target, &catalog, VerifyOptions::from_config(&config))
        .run()
        .await;
    target.close().await;
    result
}
