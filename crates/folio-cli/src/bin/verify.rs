use anyhow::{bail, Result};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "folio-verify")]
#[command(about = "Compare source and target row counts and copied files")]
struct Cli {}

#[tokio::main]
async fn main() -> Result<()> {
    let _cli = Cli::parse();
    folio_cli::init();

    let summary = folio_migrate::run_verify_from_env()
        .await
        .inspect_err(folio_cli::report_fatal)?;
    let totals = summary.summary;
    println!(
        "verification: tables={} matching={} mismatched={} errors={} storage_match={}",
        totals.total_tables,
        totals.matching_tables,
        totals.mismatched_tables,
        totals.error_tables,
        totals.storage_match
    );
    if !summary.passed() {
        bail!("verification failed, see checksums.json");
    }
    Ok(())
}
