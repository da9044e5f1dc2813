use anyhow::Result;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "folio-import")]
#[command(about = "Import an export directory into MySQL and the upload tree")]
struct Cli {
    /// Read and validate everything but write nothing to MySQL or the upload directory.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    folio_cli::init();

    let report = folio_migrate::run_import_from_env(cli.dry_run)
        .await
        .inspect_err(folio_cli::report_fatal)?;
    println!(
        "import complete{}: rows_imported={} rows_skipped={} files_copied={} files_skipped={}",
        if report.dry_run { " (dry run)" } else { "" },
        report.totals.rows_imported,
        report.totals.rows_skipped,
        report.totals.files_copied,
        report.totals.files_skipped
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_flag_is_optional() {
        assert!(!Cli::try_parse_from(["folio-import"]).unwrap().dry_run);
        assert!(Cli::try_parse_from(["folio-import", "--dry-run"]).unwrap().dry_run);
        assert!(Cli::try_parse_from(["folio-import", "import"]).is_err());
    }
}
