//! Loads an export directory into the relational target and the upload tree.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use folio_core::{
    read_document, write_document, AssetUpdateResult, FileError, ImportReport, Manifest,
    MigrationConfig, Record, RowError, StorageCopyResult, TableCatalog, TableDescriptor,
    TableImportResult, PUBLIC_UPLOADS_PREFIX,
};
use folio_storage::{collision_filename, read_jsonl, sanitize_filename, walk_files};
use serde_json::{json, Value as JsonValue};
use tokio::fs;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::target::{SqlValue, TargetDatabase, TargetError};

/// Original storage path (`cv-files/My CV.pdf`) to public path (`/uploads/cv-files/My_CV.pdf`).
pub type FileMapping = HashMap<String, String>;

/// Copy results keyed by bucket directory.
pub type BucketCopyResults = BTreeMap<String, StorageCopyResult>;

/// Report key for files found directly under the storage mirror root.
const ROOT_BUCKET: &str = ".";

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub export_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub report_path: PathBuf,
    pub batch_size: usize,
    pub dry_run: bool,
}

impl ImportOptions {
    pub fn from_config(config: &MigrationConfig, dry_run: bool) -> Self {
        Self {
            export_dir: config.export_dir(),
            uploads_dir: config.uploads_dir.clone(),
            report_path: config.import_report_path(),
            batch_size: config.import_batch_size(),
            dry_run,
        }
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.export_dir.join("storage")
    }
}

/// Where an insert's column list came from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ColumnSource {
    /// Catalog or manifest: missing keys insert NULL, unknown keys reject the row.
    Explicit(Vec<String>),
    /// First row's keys; every row must carry exactly this set.
    Inferred(Vec<String>),
}

impl ColumnSource {
    fn columns(&self) -> &[String] {
        match self {
            Self::Explicit(columns) | Self::Inferred(columns) => columns,
        }
    }
}

struct PreparedRow {
    index: usize,
    id: JsonValue,
    values: Vec<SqlValue>,
}

struct BatchOutcome {
    imported: u64,
    errors: Vec<RowError>,
}

pub struct Importer<'a> {
    target: &'a mut dyn TargetDatabase,
    catalog: &'a TableCatalog,
    options: ImportOptions,
    manifest: Option<Manifest>,
}

impl<'a> Importer<'a> {
    pub fn new(target: &'a mut dyn TargetDatabase, catalog: &'a TableCatalog, options: ImportOptions) -> Self {
        Self {
            target,
            catalog,
            options,
            manifest: None,
        }
    }

    /// Imports every table, copies storage files, rewrites asset paths and writes the report.
    pub async fn run(&mut self) -> Result<ImportReport> {
        if !fs::try_exists(&self.options.export_dir).await.unwrap_or(false) {
            bail!(
                "export directory {} not found; run the exporter first",
                self.options.export_dir.display()
            );
        }
        if self.options.dry_run {
            info!("dry run: nothing will be written to the target");
        }

        let manifest_path = self.options.export_dir.join("manifest.json");
        self.manifest = match read_document::<Manifest>(&manifest_path) {
            Ok(manifest) => Some(manifest),
            Err(err) => {
                warn!(error = %err, "no usable export manifest, inferring columns from rows");
                None
            }
        };

        let catalog = self.catalog;
        let mut tables = BTreeMap::new();
        for table in catalog.iter() {
            let result = match self.import_table(table).await {
                Ok(result) => result,
                Err(err) => {
                    error!(table = %table.name, error = %format!("{err:#}"), "table import failed");
                    TableImportResult::failed(format!("{err:#}"), 0)
                }
            };
            tables.insert(table.name.clone(), result);
        }

        let (storage, mapping) = match self.copy_storage_files().await {
            Ok(copied) => copied,
            Err(err) => {
                error!(error = %format!("{err:#}"), "copying storage files failed");
                let failed = StorageCopyResult {
                    errors: vec![FileError {
                        file: self.options.storage_dir().display().to_string(),
                        error: format!("{err:#}"),
                    }],
                    ..Default::default()
                };
                (BTreeMap::from([(ROOT_BUCKET.to_string(), failed)]), FileMapping::new())
            }
        };

        let files_copied: u64 = storage.values().map(|r| r.copied).sum();
        let asset_urls = if !self.options.dry_run && files_copied > 0 {
            self.update_asset_urls(&mapping).await
        } else {
            AssetUpdateResult::default()
        };

        let report = ImportReport::new(Utc::now(), self.options.dry_run, tables, storage, asset_urls);
        write_document(&self.options.report_path, &report)
            .with_context(|| format!("writing {}", self.options.report_path.display()))?;
        info!(
            rows_imported = report.totals.rows_imported,
            rows_skipped = report.totals.rows_skipped,
            files_copied = report.totals.files_copied,
            files_skipped = report.totals.files_skipped,
            path = %self.options.report_path.display(),
            "import complete"
        );
        Ok(report)
    }

    /// Loads `<name>.jsonl` into the target in transactional batches.
    pub async fn import_table(&mut self, table: &TableDescriptor) -> Result<TableImportResult> {
        let span = info_span!("import_table", table = %table.name);
        let result: Result<TableImportResult> = async {
            let path = self.options.export_dir.join(format!("{}.jsonl", table.name));
            if !fs::try_exists(&path).await.unwrap_or(false) {
                info!(file = %path.display(), "export file not found, skipping");
                return Ok(TableImportResult::default());
            }

            let lines = read_jsonl(&path).await?;
            let total = lines.len() as u64;
            if lines.is_empty() {
                info!("no rows to import");
                return Ok(TableImportResult::default());
            }

            let mut result = TableImportResult::default();
            let mut records = Vec::with_capacity(lines.len());
            for line in lines {
                match line.record {
                    Ok(record) => records.push((line.index, record)),
                    Err(err) => {
                        result.skipped += 1;
                        result.errors.push(RowError {
                            row: Some(json!(line.index)),
                            error: err,
                        });
                    }
                }
            }
            if records.is_empty() {
                return Ok(result);
            }

            let column_source = match self.resolve_columns(table, &records) {
                Ok(source) => source,
                Err(message) => {
                    error!(%message, "inconsistent columns, refusing to import table");
                    return Ok(TableImportResult::failed(message, total));
                }
            };

            let mut prepared = Vec::with_capacity(records.len());
            for (index, record) in &records {
                match prepare_row(*index, record, &column_source) {
                    Ok(row) => prepared.push(row),
                    Err(message) => {
                        result.skipped += 1;
                        result.errors.push(RowError {
                            row: Some(row_id(*index, record)),
                            error: message,
                        });
                    }
                }
            }

            if self.options.dry_run {
                result.imported = prepared.len() as u64;
                info!(would_import = result.imported, "dry run, skipping inserts");
                return Ok(result);
            }

            let columns = column_source.columns();
            for batch in prepared.chunks(self.options.batch_size.max(1)) {
                match self.import_batch(&table.name, columns, batch).await {
                    Ok(outcome) => {
                        result.imported += outcome.imported;
                        result.skipped += outcome.errors.len() as u64;
                        result.errors.extend(outcome.errors);
                    }
                    Err(err) => {
                        if let Err(rollback_err) = self.target.rollback().await {
                            warn!(error = %rollback_err, "rollback failed");
                        }
                        let first = batch.first().map(|row| row.index).unwrap_or_default();
                        error!(first_row = first, rows = batch.len(), error = %err, "batch rolled back");
                        result.skipped += batch.len() as u64;
                        result.errors.push(RowError {
                            row: None,
                            error: format!("batch starting at row {first} rolled back: {err}"),
                        });
                    }
                }
                debug!(imported = result.imported, total, "imported batch");
            }

            info!(imported = result.imported, skipped = result.skipped, "imported table");
            Ok(result)
        }
        .instrument(span)
        .await;
        result
    }

    /// One transaction. Statement errors skip their row; anything else aborts the batch.
    async fn import_batch(
        &mut self,
        table: &str,
        columns: &[String],
        batch: &[PreparedRow],
    ) -> Result<BatchOutcome, TargetError> {
        self.target.begin().await?;
        let mut outcome = BatchOutcome {
            imported: 0,
            errors: Vec::new(),
        };
        for row in batch {
            match self.target.insert_row(table, columns, &row.values).await {
                Ok(()) => outcome.imported += 1,
                Err(TargetError::Statement(message)) => outcome.errors.push(RowError {
                    row: Some(row.id.clone()),
                    error: message,
                }),
                Err(err) => return Err(err),
            }
        }
        self.target.commit().await?;
        Ok(outcome)
    }

    fn resolve_columns(
        &self,
        table: &TableDescriptor,
        records: &[(usize, Record)],
    ) -> Result<ColumnSource, String> {
        if !table.columns.is_empty() {
            return Ok(ColumnSource::Explicit(table.columns.clone()));
        }
        if let Some(columns) = self
            .manifest
            .as_ref()
            .and_then(|m| m.columns_for(&table.name))
        {
            return Ok(ColumnSource::Explicit(columns.to_vec()));
        }
        infer_columns(records)
    }

    /// Mirrors `export/storage` into the upload directory.
    ///
    /// Returns per-bucket copy counts and the original-to-public path mapping.
    /// The bucket is the first directory of each file's path in the mirror.
    pub async fn copy_storage_files(&self) -> Result<(BucketCopyResults, FileMapping)> {
        let storage_dir = self.options.storage_dir();
        let mut results = BucketCopyResults::new();
        let mut mapping = FileMapping::new();

        if !fs::try_exists(&storage_dir).await.unwrap_or(false) {
            info!("no storage files to copy");
            return Ok((results, mapping));
        }
        if !self.options.dry_run {
            fs::create_dir_all(&self.options.uploads_dir)
                .await
                .with_context(|| format!("creating {}", self.options.uploads_dir.display()))?;
        }

        let mut claimed = HashSet::new();
        for relative in walk_files(&storage_dir).await? {
            let source_key = slash_path(&relative);
            let Some(file_name) = relative.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let parent = relative.parent().map(Path::to_path_buf).unwrap_or_default();
            let dest_dir = self.options.uploads_dir.join(&parent);
            let bucket = bucket_of(&relative);
            let result = results.entry(bucket).or_default();

            let mut dest_name = sanitize_filename(&file_name);
            let mut dest = dest_dir.join(&dest_name);
            if claimed.contains(&dest) || fs::try_exists(&dest).await.unwrap_or(false) {
                dest_name = collision_filename(&dest_name, &source_key);
                dest = dest_dir.join(&dest_name);
            }

            if self.options.dry_run {
                info!(file = %source_key, dest = %dest.display(), "dry run, would copy");
            } else if let Err(err) = copy_file(&storage_dir.join(&relative), &dest_dir, &dest).await {
                warn!(file = %source_key, error = %format!("{err:#}"), "copy failed");
                result.skipped += 1;
                result.errors.push(FileError {
                    file: source_key,
                    error: format!("{err:#}"),
                });
                continue;
            }

            let public = format!("{PUBLIC_UPLOADS_PREFIX}/{}", slash_path(&parent.join(&dest_name)));
            mapping.insert(source_key, public);
            claimed.insert(dest);
            result.copied += 1;
        }

        for (bucket, result) in &results {
            info!(bucket = %bucket, copied = result.copied, skipped = result.skipped, "copied storage files");
        }
        Ok((results, mapping))
    }

    /// Points stored asset paths at their copied locations. Never fails the run.
    pub async fn update_asset_urls(&mut self, mapping: &FileMapping) -> AssetUpdateResult {
        let catalog = self.catalog;
        let mut result = AssetUpdateResult::default();
        for (table, rule) in catalog.with_asset_rules() {
            let rows = match self
                .target
                .path_rows(&table.name, &rule.id_column, &rule.column)
                .await
            {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(table = %table.name, error = %err, "reading asset paths failed");
                    result.failed += 1;
                    result.errors.push(format!("{}: {err}", table.name));
                    continue;
                }
            };

            for (id, path) in rows {
                let Some(path) = path else { continue };
                let Some(new_path) = rewritten_path(&path, &rule.bucket, mapping) else {
                    continue;
                };
                if new_path == path {
                    continue;
                }
                match self
                    .target
                    .update_path(&table.name, &rule.id_column, &rule.column, &id, &new_path)
                    .await
                {
                    Ok(()) => result.updated += 1,
                    Err(err) => {
                        warn!(table = %table.name, id = %id, error = %err, "updating asset path failed");
                        result.failed += 1;
                        result.errors.push(format!("{}#{id}: {err}", table.name));
                    }
                }
            }
        }
        info!(updated = result.updated, failed = result.failed, "updated asset URLs");
        result
    }
}

/// Columns from the first row, provided every other row has the same key set.
fn infer_columns(records: &[(usize, Record)]) -> Result<ColumnSource, String> {
    let Some((_, first)) = records.first() else {
        return Ok(ColumnSource::Inferred(Vec::new()));
    };
    let columns: Vec<String> = first.keys().cloned().collect();
    let expected: BTreeSet<&str> = columns.iter().map(String::as_str).collect();
    for (index, record) in records.iter().skip(1) {
        let keys: BTreeSet<&str> = record.keys().map(String::as_str).collect();
        if keys != expected {
            let missing = expected.difference(&keys).copied().collect::<Vec<_>>();
            let extra = keys.difference(&expected).copied().collect::<Vec<_>>();
            return Err(format!(
                "row {index} does not match the first row's columns (missing {missing:?}, extra {extra:?})"
            ));
        }
    }
    Ok(ColumnSource::Inferred(columns))
}

fn prepare_row(index: usize, record: &Record, source: &ColumnSource) -> Result<PreparedRow, String> {
    let columns = source.columns();
    if let ColumnSource::Explicit(_) = source {
        if let Some(unknown) = record.keys().find(|key| !columns.contains(key)) {
            return Err(format!("unknown column `{unknown}`"));
        }
    }
    let values = columns
        .iter()
        .map(|column| record.get(column).map(SqlValue::from_json).unwrap_or(SqlValue::Null))
        .collect();
    Ok(PreparedRow {
        index,
        id: row_id(index, record),
        values,
    })
}

/// The row's `id`, or its line index when it has none.
fn row_id(index: usize, record: &Record) -> JsonValue {
    match record.get("id") {
        Some(id) if !id.is_null() => id.clone(),
        _ => json!(index),
    }
}

/// New public path for a stored asset path, or `None` when it has no file name.
fn rewritten_path(stored: &str, bucket: &str, mapping: &FileMapping) -> Option<String> {
    let basename = stored.rsplit('/').next().filter(|name| !name.is_empty())?;
    Some(
        mapping
            .get(&format!("{bucket}/{basename}"))
            .cloned()
            .unwrap_or_else(|| format!("{PUBLIC_UPLOADS_PREFIX}/{basename}")),
    )
}

/// First directory of a mirror-relative path, or [`ROOT_BUCKET`] for top-level files.
fn bucket_of(relative: &Path) -> String {
    let mut components = relative.components();
    match (components.next(), components.next()) {
        (Some(first), Some(_)) => first.as_os_str().to_string_lossy().into_owned(),
        _ => ROOT_BUCKET.to_string(),
    }
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

async fn copy_file(source: &Path, dest_dir: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest_dir)
        .await
        .with_context(|| format!("creating {}", dest_dir.display()))?;
    fs::copy(source, dest)
        .await
        .with_context(|| format!("copying {} -> {}", source.display(), dest.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTarget;
    use folio_storage::short_hash;
    use tempfile::{tempdir, TempDir};

    fn write_jsonl(dir: &Path, table: &str, rows: &[JsonValue]) {
        let text: String = rows.iter().map(|r| format!("{r}\n")).collect();
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(format!("{table}.jsonl")), text).unwrap();
    }

    fn options(root: &TempDir, batch_size: usize, dry_run: bool) -> ImportOptions {
        ImportOptions {
            export_dir: root.path().join("export"),
            uploads_dir: root.path().join("uploads"),
            report_path: root.path().join("import_report.json"),
            batch_size,
            dry_run,
        }
    }

    fn tables(names: &[&str]) -> TableCatalog {
        TableCatalog::new(names.iter().map(|n| TableDescriptor::named(*n)).collect()).unwrap()
    }

    #[tokio::test]
    async fn one_bad_row_skips_only_itself() {
        let root = tempdir().unwrap();
        let rows: Vec<JsonValue> = [1, 2, 2, 3, 4]
            .iter()
            .map(|id| json!({"id": id, "name": format!("skill {id}")}))
            .collect();
        write_jsonl(&root.path().join("export"), "portfolio_skills", &rows);
        let catalog = tables(&["portfolio_skills"]);
        let mut target = MemoryTarget::new().with_table("portfolio_skills");

        let report = Importer::new(&mut target, &catalog, options(&root, 5, false))
            .run()
            .await
            .unwrap();

        let result = &report.tables["portfolio_skills"];
        assert_eq!(result.imported, 4);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].row, Some(json!(2)));
        assert!(result.errors[0].error.contains("Duplicate entry"));
        assert_eq!(target.row_count("portfolio_skills"), 4);
    }

    #[tokio::test]
    async fn failed_commit_rolls_back_whole_batch() {
        let root = tempdir().unwrap();
        let rows: Vec<JsonValue> = (1..=5).map(|id| json!({"id": id})).collect();
        write_jsonl(&root.path().join("export"), "cv_downloads", &rows);
        let catalog = tables(&["cv_downloads"]);
        let mut target = MemoryTarget::new().with_table("cv_downloads").failing_commits(1);

        let report = Importer::new(&mut target, &catalog, options(&root, 2, false))
            .run()
            .await
            .unwrap();

        let result = &report.tables["cv_downloads"];
        assert_eq!(result.imported, 3);
        assert_eq!(result.skipped, 2);
        assert!(result.imported + result.skipped <= 5);
        assert!(result.errors[0].error.contains("rolled back"));
        let ids: Vec<_> = target
            .rows("cv_downloads")
            .iter()
            .map(|row| row["id"].clone())
            .collect();
        assert_eq!(ids, vec![SqlValue::Int(3), SqlValue::Int(4), SqlValue::Int(5)]);
    }

    #[tokio::test]
    async fn missing_export_file_is_not_an_error() {
        let root = tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("export")).unwrap();
        let catalog = tables(&["portfolio_articles"]);
        let mut target = MemoryTarget::new().with_table("portfolio_articles");

        let report = Importer::new(&mut target, &catalog, options(&root, 10, false))
            .run()
            .await
            .unwrap();
        assert_eq!(report.tables["portfolio_articles"], TableImportResult::default());
        assert!(root.path().join("import_report.json").exists());
    }

    #[tokio::test]
    async fn missing_export_dir_is_fatal() {
        let root = tempdir().unwrap();
        let catalog = tables(&["portfolio_articles"]);
        let mut target = MemoryTarget::new();
        let err = Importer::new(&mut target, &catalog, options(&root, 10, false))
            .run()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("export directory"));
    }

    #[tokio::test]
    async fn heterogeneous_rows_fail_the_table_without_a_manifest() {
        let root = tempdir().unwrap();
        write_jsonl(
            &root.path().join("export"),
            "portfolio_projects",
            &[json!({"id": 1, "title": "a"}), json!({"id": 2, "title": "b", "tags": ["x"]})],
        );
        let catalog = tables(&["portfolio_projects"]);
        let mut target = MemoryTarget::new().with_table("portfolio_projects");

        let report = Importer::new(&mut target, &catalog, options(&root, 10, false))
            .run()
            .await
            .unwrap();
        let result = &report.tables["portfolio_projects"];
        assert_eq!(result.imported, 0);
        assert_eq!(result.skipped, 2);
        assert!(result.errors[0].error.contains("extra [\"tags\"]"));
        assert_eq!(target.writes(), 0);
    }

    #[tokio::test]
    async fn manifest_columns_allow_sparse_rows() {
        let root = tempdir().unwrap();
        let export_dir = root.path().join("export");
        write_jsonl(
            &export_dir,
            "portfolio_projects",
            &[json!({"id": 1, "title": "a"}), json!({"id": 2, "title": "b", "tags": ["x"]})],
        );
        let manifest = Manifest::new(
            Utc::now(),
            "memory://source",
            BTreeMap::from([("portfolio_projects".to_string(), 2)]),
            BTreeMap::new(),
            BTreeMap::from([(
                "portfolio_projects".to_string(),
                vec!["id".to_string(), "title".to_string(), "tags".to_string()],
            )]),
        );
        write_document(&export_dir.join("manifest.json"), &manifest).unwrap();
        let catalog = tables(&["portfolio_projects"]);
        let mut target = MemoryTarget::new().with_table("portfolio_projects");

        let report = Importer::new(&mut target, &catalog, options(&root, 10, false))
            .run()
            .await
            .unwrap();
        assert_eq!(report.tables["portfolio_projects"].imported, 2);
        let rows = target.rows("portfolio_projects");
        assert_eq!(rows[0]["tags"], SqlValue::Null);
        assert_eq!(rows[1]["tags"], SqlValue::Text("[\"x\"]".to_string()));
    }

    #[tokio::test]
    async fn unparseable_lines_are_skipped_rows() {
        let root = tempdir().unwrap();
        let export_dir = root.path().join("export");
        std::fs::create_dir_all(&export_dir).unwrap();
        std::fs::write(
            export_dir.join("contact_submissions.jsonl"),
            "{\"id\":1}\n{not json\n{\"id\":2}\n",
        )
        .unwrap();
        let catalog = tables(&["contact_submissions"]);
        let mut target = MemoryTarget::new().with_table("contact_submissions");

        let report = Importer::new(&mut target, &catalog, options(&root, 10, false))
            .run()
            .await
            .unwrap();
        let result = &report.tables["contact_submissions"];
        assert_eq!(result.imported, 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.errors[0].row, Some(json!(1)));
    }

    #[tokio::test]
    async fn colliding_names_get_deterministic_hash_suffix() {
        let root = tempdir().unwrap();
        let storage = root.path().join("export/storage/cv-files");
        std::fs::create_dir_all(&storage).unwrap();
        std::fs::write(storage.join("My CV.pdf"), b"first").unwrap();
        std::fs::write(storage.join("My_CV.pdf"), b"second").unwrap();
        let catalog = tables(&["cv_management"]);

        let mut runs = Vec::new();
        for _ in 0..2 {
            let uploads = root.path().join("uploads");
            let _ = std::fs::remove_dir_all(&uploads);
            let mut target = MemoryTarget::new();
            let importer = Importer::new(&mut target, &catalog, options(&root, 10, false));
            let (results, mapping) = importer.copy_storage_files().await.unwrap();
            assert_eq!(results["cv-files"].copied, 2);
            let mut names: Vec<_> = std::fs::read_dir(uploads.join("cv-files"))
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            runs.push((names, mapping));
        }

        let hashed = format!("My_CV-{}.pdf", short_hash("cv-files/My_CV.pdf"));
        assert_eq!(runs[0].0, vec![hashed.clone(), "My_CV.pdf".to_string()]);
        assert_eq!(runs[0], runs[1]);
        assert_eq!(runs[0].1["cv-files/My CV.pdf"], "/uploads/cv-files/My_CV.pdf");
        assert_eq!(runs[0].1["cv-files/My_CV.pdf"], format!("/uploads/cv-files/{hashed}"));
        let uploads = root.path().join("uploads/cv-files");
        assert_eq!(std::fs::read(uploads.join("My_CV.pdf")).unwrap(), b"first");
        assert_eq!(std::fs::read(uploads.join(&hashed)).unwrap(), b"second");
    }

    #[tokio::test]
    async fn copy_results_are_reported_per_bucket() {
        let root = tempdir().unwrap();
        let storage = root.path().join("export/storage");
        std::fs::create_dir_all(storage.join("cv-files/archive")).unwrap();
        std::fs::create_dir_all(storage.join("images")).unwrap();
        std::fs::write(storage.join("cv-files/cv.pdf"), b"cv").unwrap();
        std::fs::write(storage.join("cv-files/archive/old.pdf"), b"old").unwrap();
        std::fs::write(storage.join("images/a.png"), b"a").unwrap();
        std::fs::write(storage.join("images/b.png"), b"b").unwrap();
        std::fs::write(storage.join("stray.txt"), b"?").unwrap();
        // A plain file where the images upload directory should go makes those copies fail.
        std::fs::create_dir_all(root.path().join("uploads")).unwrap();
        std::fs::write(root.path().join("uploads/images"), b"not a dir").unwrap();
        std::fs::create_dir_all(root.path().join("export")).unwrap();

        let catalog = tables(&["portfolio_projects"]);
        let mut target = MemoryTarget::new().with_table("portfolio_projects");
        let report = Importer::new(&mut target, &catalog, options(&root, 10, false))
            .run()
            .await
            .unwrap();

        let buckets: Vec<_> = report.storage.keys().cloned().collect();
        assert_eq!(buckets, vec![".", "cv-files", "images"]);
        assert_eq!(report.storage["cv-files"].copied, 2);
        assert_eq!(report.storage["cv-files"].skipped, 0);
        assert_eq!(report.storage["images"].copied, 0);
        assert_eq!(report.storage["images"].skipped, 2);
        assert_eq!(report.storage["images"].errors.len(), 2);
        assert_eq!(report.storage["."].copied, 1);
        assert_eq!(report.totals.files_copied, 3);
        assert_eq!(report.totals.files_skipped, 2);
        assert_eq!(report.errors.storage[0].file, "images/a.png");
        assert!(root.path().join("uploads/cv-files/archive/old.pdf").exists());
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let root = tempdir().unwrap();
        let export_dir = root.path().join("export");
        write_jsonl(&export_dir, "portfolio_projects", &[json!({"id": 1}), json!({"id": 2})]);
        std::fs::create_dir_all(export_dir.join("storage/cv-files")).unwrap();
        std::fs::write(export_dir.join("storage/cv-files/cv.pdf"), b"pdf").unwrap();
        let catalog = tables(&["portfolio_projects"]);
        let mut target = MemoryTarget::new().with_table("portfolio_projects");

        let report = Importer::new(&mut target, &catalog, options(&root, 10, true))
            .run()
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.tables["portfolio_projects"].imported, 2);
        assert_eq!(report.storage["cv-files"].copied, 1);
        assert_eq!(report.totals.files_copied, 1);
        assert_eq!(target.writes(), 0);
        assert_eq!(target.row_count("portfolio_projects"), 0);
        assert!(!root.path().join("uploads").exists());
    }

    #[tokio::test]
    async fn asset_paths_follow_copied_files() {
        let root = tempdir().unwrap();
        let export_dir = root.path().join("export");
        write_jsonl(
            &export_dir,
            "cv_management",
            &[
                json!({"id": 1, "file_path": "https://x.supabase.co/storage/v1/object/public/cv-files/My CV.pdf"}),
                json!({"id": 2, "file_path": "cv-files/old.pdf"}),
                json!({"id": 3, "file_path": null}),
            ],
        );
        std::fs::create_dir_all(export_dir.join("storage/cv-files")).unwrap();
        std::fs::write(export_dir.join("storage/cv-files/My CV.pdf"), b"pdf").unwrap();
        let catalog = TableCatalog::portfolio();
        let mut target = MemoryTarget::new().with_tables(catalog.names());

        let report = Importer::new(&mut target, &catalog, options(&root, 10, false))
            .run()
            .await
            .unwrap();

        assert_eq!(report.asset_urls.updated, 2);
        assert_eq!(report.asset_urls.failed, 0);
        let paths: Vec<_> = target
            .rows("cv_management")
            .iter()
            .map(|row| row["file_path"].clone())
            .collect();
        assert_eq!(
            paths,
            vec![
                SqlValue::Text("/uploads/cv-files/My_CV.pdf".to_string()),
                SqlValue::Text("/uploads/old.pdf".to_string()),
                SqlValue::Null,
            ]
        );
    }

    #[test]
    fn rewritten_path_falls_back_to_uploads_root() {
        let mapping = FileMapping::from([(
            "cv-files/cv.pdf".to_string(),
            "/uploads/cv-files/cv.pdf".to_string(),
        )]);
        assert_eq!(
            rewritten_path("https://host/cv-files/cv.pdf", "cv-files", &mapping).as_deref(),
            Some("/uploads/cv-files/cv.pdf")
        );
        assert_eq!(
            rewritten_path("legacy/other.pdf", "cv-files", &mapping).as_deref(),
            Some("/uploads/other.pdf")
        );
        assert_eq!(rewritten_path("dir/", "cv-files", &mapping), None);
    }
}
