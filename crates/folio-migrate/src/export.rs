//! Snapshot of source tables and storage buckets into the export directory.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use folio_core::{write_document, Manifest, MigrationConfig, TableCatalog, TableDescriptor};
use folio_storage::{retry_with_backoff, write_atomic, BackoffPolicy, JsonlWriter, SourceBackend};
use tokio::fs;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Buckets are listed this many entries at a time.
const LIST_PAGE_SIZE: u64 = 1000;

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub export_dir: PathBuf,
    pub page_size: u64,
    pub buckets: Vec<String>,
    pub backoff: BackoffPolicy,
}

impl ExportOptions {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            export_dir: config.export_dir(),
            page_size: config.export_batch_size() as u64,
            buckets: config.storage_buckets.clone(),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.export_dir.join("storage")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.export_dir.join("manifest.json")
    }
}

/// Rows written for one table and the columns they used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableExport {
    pub rows: u64,
    pub columns: Vec<String>,
}

pub struct Exporter<'a> {
    source: &'a dyn SourceBackend,
    catalog: &'a TableCatalog,
    options: ExportOptions,
}

impl<'a> Exporter<'a> {
    pub fn new(source: &'a dyn SourceBackend, catalog: &'a TableCatalog, options: ExportOptions) -> Self {
        Self {
            source,
            catalog,
            options,
        }
    }

    /// Exports every table and bucket, then writes the manifest.
    ///
    /// Only an unreachable source or an unwritable export directory fails the
    /// run; table and file failures are logged and counted as zero.
    pub async fn run(&self) -> Result<Manifest> {
        retry_with_backoff(&self.options.backoff, "ping", || self.source.ping())
            .await
            .with_context(|| format!("cannot reach source {}", self.source.endpoint()))?;
        info!(endpoint = self.source.endpoint(), "connected to source");

        fs::create_dir_all(self.options.storage_dir())
            .await
            .with_context(|| format!("creating {}", self.options.storage_dir().display()))?;

        let mut table_counts = BTreeMap::new();
        let mut columns = BTreeMap::new();
        for table in self.catalog.iter() {
            let export = match self.export_table(table).await {
                Ok(export) => export,
                Err(err) => {
                    error!(table = %table.name, error = %format!("{err:#}"), "table export failed");
                    TableExport::default()
                }
            };
            table_counts.insert(table.name.clone(), export.rows);
            columns.insert(table.name.clone(), export.columns);
        }

        let mut storage_counts = BTreeMap::new();
        for bucket in &self.options.buckets {
            let count = match self.export_bucket(bucket).await {
                Ok(count) => count,
                Err(err) => {
                    error!(bucket = %bucket, error = %format!("{err:#}"), "bucket export failed");
                    0
                }
            };
            storage_counts.insert(bucket.clone(), count);
        }

        let manifest = Manifest::new(
            Utc::now(),
            self.source.endpoint(),
            table_counts,
            storage_counts,
            columns,
        );
        let manifest_path = self.options.manifest_path();
        write_document(&manifest_path, &manifest)
            .with_context(|| format!("writing {}", manifest_path.display()))?;
        info!(
            total_rows = manifest.totals.total_rows,
            total_files = manifest.totals.total_files,
            path = %manifest_path.display(),
            "export complete"
        );
        Ok(manifest)
    }

    /// Pages through one table into `<name>.jsonl`.
    ///
    /// A page that still fails after retries empties the file and reports zero
    /// rows. The exact source count, when available, bounds the number of page
    /// requests; a short or empty page always ends the table.
    pub async fn export_table(&self, table: &TableDescriptor) -> Result<TableExport> {
        let span = info_span!("export_table", table = %table.name);
        let result: Result<TableExport> = async {
            let name = table.name.as_str();
            let page_size = self.options.page_size.max(1);
            let path = self.options.export_dir.join(format!("{name}.jsonl"));
            let mut writer = JsonlWriter::create(&path).await?;

            let expected = match retry_with_backoff(&self.options.backoff, "count_rows", || {
                self.source.count_rows(name)
            })
            .await
            {
                Ok(count) => Some(count),
                Err(err) => {
                    warn!(error = %err, "exact count unavailable, paging until a short page");
                    None
                }
            };

            let mut columns = Vec::new();
            let mut seen = HashSet::new();
            let mut offset = 0u64;
            loop {
                if expected.is_some_and(|n| writer.lines() >= n) {
                    break;
                }
                let page = match retry_with_backoff(&self.options.backoff, "fetch_page", || {
                    self.source.fetch_page(name, offset, page_size)
                })
                .await
                {
                    Ok(page) => page,
                    Err(err) => {
                        error!(offset, error = %err, "page fetch failed, discarding table output");
                        writer.truncate().await?;
                        return Ok(TableExport::default());
                    }
                };
                if page.is_empty() {
                    break;
                }

                let fetched = page.len() as u64;
                for row in &page {
                    for key in row.keys() {
                        if seen.insert(key.clone()) {
                            columns.push(key.clone());
                        }
                    }
                    writer.write_record(row).await?;
                }
                offset += fetched;
                debug!(rows = writer.lines(), "exported page");

                if fetched < page_size {
                    break;
                }
            }

            let rows = writer.finish().await?;
            info!(rows, "exported table");
            Ok(TableExport { rows, columns })
        }
        .instrument(span)
        .await;
        result
    }

    /// Mirrors one bucket under `storage/<bucket>/` and returns the number of files downloaded.
    pub async fn export_bucket(&self, bucket: &str) -> Result<u64> {
        let span = info_span!("export_bucket", bucket);
        let result: Result<u64> = async {
            let bucket_dir = self.options.storage_dir().join(bucket);
            fs::create_dir_all(&bucket_dir)
                .await
                .with_context(|| format!("creating {}", bucket_dir.display()))?;

            let mut objects = Vec::new();
            let mut offset = 0u64;
            loop {
                let page = match retry_with_backoff(&self.options.backoff, "list_objects", || {
                    self.source.list_objects(bucket, offset, LIST_PAGE_SIZE)
                })
                .await
                {
                    Ok(page) => page,
                    Err(err) => {
                        error!(error = %err, "listing bucket failed");
                        return Ok(0);
                    }
                };
                let listed = page.len() as u64;
                objects.extend(page);
                if listed < LIST_PAGE_SIZE {
                    break;
                }
                offset += listed;
            }

            let files = objects.iter().filter(|o| !o.is_folder()).collect::<Vec<_>>();
            if files.is_empty() {
                info!("bucket is empty");
                return Ok(0);
            }

            let mut downloaded = 0u64;
            for object in &files {
                let Some(dest) = mirror_path(&bucket_dir, &object.name) else {
                    warn!(file = %object.name, "skipping object with unsafe name");
                    continue;
                };
                let bytes = match retry_with_backoff(&self.options.backoff, "download_object", || {
                    self.source.download_object(bucket, &object.name)
                })
                .await
                {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(file = %object.name, error = %err, "download failed");
                        continue;
                    }
                };
                if let Err(err) = write_atomic(&dest, &bytes).await {
                    warn!(file = %object.name, error = %format!("{err:#}"), "saving download failed");
                    continue;
                }
                downloaded += 1;
                debug!(downloaded, total = files.len(), "downloaded file");
            }

            info!(downloaded, "exported bucket");
            Ok(downloaded)
        }
        .instrument(span)
        .await;
        result
    }
}

/// Local path for an object name, refusing names that would escape the bucket directory.
fn mirror_path(bucket_dir: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    (safe && !name.is_empty()).then(|| bucket_dir.join(relative))
}
