use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_EXPORT_BATCH_SIZE: usize = 1000;
const DEFAULT_IMPORT_BATCH_SIZE: usize = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Connection details for the hosted source project.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub url: String,
    pub service_key: String,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl MysqlConfig {
    /// `host:port/database`, safe to log.
    pub fn display_target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub supabase_url: Option<String>,
    pub supabase_service_key: Option<String>,
    pub http_timeout_secs: u64,
    pub mysql_host: String,
    pub mysql_port: u16,
    pub mysql_user: String,
    pub mysql_password: String,
    pub mysql_database: Option<String>,
    pub batch_size_override: Option<usize>,
    pub storage_buckets: Vec<String>,
    pub uploads_dir: PathBuf,
    pub migrations_dir: PathBuf,
}

impl MigrationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            supabase_url: get("SUPABASE_URL").map(|v| v.trim_end_matches('/').to_string()),
            supabase_service_key: get("SUPABASE_SERVICE_KEY"),
            http_timeout_secs: parse_or("MIGRATION_HTTP_TIMEOUT_SECS", get("MIGRATION_HTTP_TIMEOUT_SECS"), 30)?,
            mysql_host: get("MYSQL_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            mysql_port: parse_or("MYSQL_PORT", get("MYSQL_PORT"), 3306)?,
            mysql_user: get("MYSQL_USER").unwrap_or_else(|| "root".to_string()),
            mysql_password: lookup("MYSQL_PASSWORD").unwrap_or_default(),
            mysql_database: get("MYSQL_DATABASE"),
            batch_size_override: parse_batch_size(get("MIGRATION_BATCH_SIZE"))?,
            storage_buckets: get("STORAGE_BUCKETS")
                .map(|v| split_list(&v))
                .filter(|buckets| !buckets.is_empty())
                .unwrap_or_else(|| vec!["cv-files".to_string()]),
            uploads_dir: get("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("public/uploads")),
            migrations_dir: get("MIGRATIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("migrations")),
        })
    }

    pub fn source(&self) -> Result<SourceConfig, ConfigError> {
        let url = self
            .supabase_url
            .clone()
            .ok_or(ConfigError::Missing("SUPABASE_URL"))?;
        let service_key = self
            .supabase_service_key
            .clone()
            .ok_or(ConfigError::Missing("SUPABASE_SERVICE_KEY"))?;
        Ok(SourceConfig {
            url,
            service_key,
            http_timeout: Duration::from_secs(self.http_timeout_secs),
        })
    }

    /// Target settings with the local defaults applied.
    pub fn mysql(&self) -> MysqlConfig {
        MysqlConfig {
            host: self.mysql_host.clone(),
            port: self.mysql_port,
            user: self.mysql_user.clone(),
            password: self.mysql_password.clone(),
            database: self
                .mysql_database
                .clone()
                .unwrap_or_else(|| "portfolio_local".to_string()),
        }
    }

    /// Like [`mysql`](Self::mysql) but refuses to guess the database name.
    pub fn mysql_strict(&self) -> Result<MysqlConfig, ConfigError> {
        if self.mysql_database.is_none() {
            return Err(ConfigError::Missing("MYSQL_DATABASE"));
        }
        Ok(self.mysql())
    }

    pub fn export_batch_size(&self) -> usize {
        self.batch_size_override.unwrap_or(DEFAULT_EXPORT_BATCH_SIZE)
    }

    pub fn import_batch_size(&self) -> usize {
        self.batch_size_override.unwrap_or(DEFAULT_IMPORT_BATCH_SIZE)
    }

    pub fn export_dir(&self) -> PathBuf {
        self.migrations_dir.join("export")
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.export_dir().join("storage")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.export_dir().join("manifest.json")
    }

    pub fn import_report_path(&self) -> PathBuf {
        self.migrations_dir.join("import_report.json")
    }

    pub fn checksums_path(&self) -> PathBuf {
        self.migrations_dir.join("checksums.json")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.migrations_dir.join("tables.yaml")
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value,
            reason: e.to_string(),
        }),
    }
}

fn parse_batch_size(raw: Option<String>) -> Result<Option<usize>, ConfigError> {
    let Some(value) = raw else {
        return Ok(None);
    };
    let size: usize = parse_or("MIGRATION_BATCH_SIZE", Some(value.clone()), 0)?;
    if size == 0 {
        return Err(ConfigError::Invalid {
            key: "MIGRATION_BATCH_SIZE",
            value,
            reason: "batch size must be at least 1".to_string(),
        });
    }
    Ok(Some(size))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<MigrationConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MigrationConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_local_setup() {
        let config = config_from(&[]).expect("config");
        assert_eq!(config.export_batch_size(), 1000);
        assert_eq!(config.import_batch_size(), 500);
        assert_eq!(config.storage_buckets, vec!["cv-files".to_string()]);
        assert_eq!(config.mysql().display_target(), "127.0.0.1:3306/portfolio_local");
        assert_eq!(config.manifest_path(), PathBuf::from("migrations/export/manifest.json"));
        assert_eq!(config.checksums_path(), PathBuf::from("migrations/checksums.json"));
        assert_eq!(config.uploads_dir, PathBuf::from("public/uploads"));
    }

    #[test]
    fn missing_credentials_are_reported_by_name() {
        let config = config_from(&[("SUPABASE_URL", "https://x.supabase.co")]).expect("config");
        assert_eq!(
            config.source().unwrap_err(),
            ConfigError::Missing("SUPABASE_SERVICE_KEY")
        );
        assert_eq!(
            config.mysql_strict().unwrap_err(),
            ConfigError::Missing("MYSQL_DATABASE")
        );
    }

    #[test]
    fn batch_size_and_buckets_override() {
        let config = config_from(&[
            ("MIGRATION_BATCH_SIZE", "250"),
            ("STORAGE_BUCKETS", "cv-files, project-images ,,"),
            ("SUPABASE_URL", "https://x.supabase.co/"),
            ("SUPABASE_SERVICE_KEY", "secret"),
        ])
        .expect("config");
        assert_eq!(config.export_batch_size(), 250);
        assert_eq!(config.import_batch_size(), 250);
        assert_eq!(config.storage_buckets, vec!["cv-files", "project-images"]);
        assert_eq!(config.source().unwrap().url, "https://x.supabase.co");
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(matches!(
            config_from(&[("MIGRATION_BATCH_SIZE", "0")]),
            Err(ConfigError::Invalid { key: "MIGRATION_BATCH_SIZE", .. })
        ));
        assert!(matches!(
            config_from(&[("MYSQL_PORT", "not-a-port")]),
            Err(ConfigError::Invalid { key: "MYSQL_PORT", .. })
        ));
    }
}
