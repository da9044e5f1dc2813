use folio_core::{read_document, ImportReport, Manifest, TableCatalog};
use folio_migrate::memory::{MemorySource, MemoryTarget};
use folio_migrate::{ExportOptions, Exporter, ImportOptions, Importer, SqlValue, Verifier, VerifyOptions};
use folio_storage::BackoffPolicy;
use serde_json::json;
use tempfile::tempdir;

fn seeded_source(catalog: &TableCatalog) -> MemorySource {
    let mut source = MemorySource::new("memory://portfolio");
    for name in catalog.names() {
        source = source.with_table(name, Vec::new());
    }
    source
        .with_table(
            "portfolio_projects",
            (1..=7)
                .map(|id| json!({"id": id, "title": format!("project {id}"), "tags": ["rust"]}))
                .collect(),
        )
        .with_table(
            "cv_management",
            vec![
                json!({"id": "a1", "file_path": "https://demo.supabase.co/storage/v1/object/public/cv-files/CV 2024.pdf", "is_active": true}),
                json!({"id": "b2", "file_path": "cv-files/archive/old.pdf", "is_active": false}),
            ],
        )
        .with_object("cv-files", "CV 2024.pdf", b"%PDF-current")
        .with_object("cv-files", "archive/old.pdf", b"%PDF-old")
        .with_folder("cv-files", "archive")
}

#[tokio::test]
async fn export_import_verify_round_trip() {
    let root = tempdir().unwrap();
    let export_dir = root.path().join("migrations/export");
    let uploads_dir = root.path().join("public/uploads");
    let catalog = TableCatalog::portfolio();
    let source = seeded_source(&catalog);

    let manifest = Exporter::new(
        &source,
        &catalog,
        ExportOptions {
            export_dir: export_dir.clone(),
            page_size: 3,
            buckets: vec!["cv-files".to_string()],
            backoff: BackoffPolicy::immediate(3),
        },
    )
    .run()
    .await
    .unwrap();

    assert_eq!(manifest.tables["portfolio_projects"], 7);
    assert_eq!(manifest.storage["cv-files"], 2);
    assert_eq!(manifest.totals.total_rows, 9);
    assert!(manifest.totals_consistent());
    assert_eq!(source.page_requests("portfolio_projects"), 3);
    let on_disk: Manifest = read_document(&export_dir.join("manifest.json")).unwrap();
    assert_eq!(on_disk, manifest);

    let mut target = MemoryTarget::new().with_tables(catalog.names());
    let report = Importer::new(
        &mut target,
        &catalog,
        ImportOptions {
            export_dir: export_dir.clone(),
            uploads_dir: uploads_dir.clone(),
            report_path: root.path().join("migrations/import_report.json"),
            batch_size: 4,
            dry_run: false,
        },
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.totals.rows_imported, 9);
    assert_eq!(report.totals.rows_skipped, 0);
    assert_eq!(report.totals.files_copied, 2);
    assert_eq!(report.asset_urls.updated, 2);
    assert!(uploads_dir.join("cv-files/CV_2024.pdf").exists());
    assert!(uploads_dir.join("cv-files/archive/old.pdf").exists());
    let saved: ImportReport =
        read_document(&root.path().join("migrations/import_report.json")).unwrap();
    assert_eq!(saved, report);

    let paths: Vec<_> = target
        .rows("cv_management")
        .iter()
        .map(|row| row["file_path"].clone())
        .collect();
    assert_eq!(
        paths,
        vec![
            SqlValue::Text("/uploads/cv-files/CV_2024.pdf".to_string()),
            SqlValue::Text("/uploads/old.pdf".to_string()),
        ]
    );
    assert_eq!(
        target.rows("portfolio_projects")[0]["tags"],
        SqlValue::Text("[\"rust\"]".to_string())
    );

    let summary = Verifier::new(
        &source,
        &mut target,
        &catalog,
        VerifyOptions {
            storage_dir: export_dir.join("storage"),
            uploads_dir,
            checksums_path: root.path().join("migrations/checksums.json"),
            sample_size: 5,
            backoff: BackoffPolicy::immediate(3),
        },
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.summary.total_tables, catalog.len());
    assert_eq!(summary.summary.matching_tables, catalog.len());
    assert!(summary.tables.iter().all(|t| t.missing_sample_ids.is_empty()));
    assert!(summary.summary.storage_match);
    assert!(summary.passed());
}

#[tokio::test]
async fn dry_run_import_leaves_target_untouched() {
    let root = tempdir().unwrap();
    let export_dir = root.path().join("export");
    let catalog = TableCatalog::portfolio();
    let source = seeded_source(&catalog);

    Exporter::new(
        &source,
        &catalog,
        ExportOptions {
            export_dir: export_dir.clone(),
            page_size: 100,
            buckets: vec!["cv-files".to_string()],
            backoff: BackoffPolicy::immediate(1),
        },
    )
    .run()
    .await
    .unwrap();

    let mut target = MemoryTarget::new().with_tables(catalog.names());
    let report = Importer::new(
        &mut target,
        &catalog,
        ImportOptions {
            export_dir,
            uploads_dir: root.path().join("uploads"),
            report_path: root.path().join("import_report.json"),
            batch_size: 500,
            dry_run: true,
        },
    )
    .run()
    .await
    .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.totals.rows_imported, 9);
    assert_eq!(report.totals.files_copied, 2);
    assert_eq!(report.asset_urls.updated, 0);
    assert_eq!(target.writes(), 0);
    assert!(!root.path().join("uploads").exists());
}
