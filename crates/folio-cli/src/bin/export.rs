use anyhow::Result;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "folio-export")]
#[command(about = "Export portfolio tables and storage buckets to JSONL files")]
struct Cli {}

#[tokio::main]
async fn main() -> Result<()> {
    let _cli = Cli::parse();
    folio_cli::init();

    let manifest = folio_migrate::run_export_from_env()
        .await
        .inspect_err(folio_cli::report_fatal)?;
    println!(
        "export complete: tables={} rows={} files={}",
        manifest.tables.len(),
        manifest.totals.total_rows,
        manifest.totals.total_files
    );
    Ok(())
}
