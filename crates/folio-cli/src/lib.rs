//! Shared start-up for the `folio-export`, `folio-import` and `folio-verify` binaries.

use tracing_subscriber::EnvFilter;

pub const CRATE_NAME: &str = "folio-cli";

/// Loads `.env` from the working directory, then installs the log subscriber.
///
/// `.env` goes first so a `RUST_LOG` set there takes effect. Defaults to `info`.
pub fn init() {
    let dotenv_path = dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();
    if let Some(path) = dotenv_path {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }
}

/// Logs a fatal error with its full context chain before the process exits non-zero.
pub fn report_fatal(err: &anyhow::Error) {
    tracing::error!(error = %format!("{err:#}"), "fatal");
}
