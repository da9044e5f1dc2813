use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tables migrated for the portfolio, in processing order.
const PORTFOLIO_TABLES: [&str; 12] = [
    "portfolio_projects",
    "portfolio_skills",
    "portfolio_experience",
    "portfolio_certifications",
    "portfolio_articles",
    "portfolio_case_studies",
    "cv_management",
    "contact_submissions",
    "visitor_analytics",
    "site_analytics",
    "cv_downloads",
    "project_interactions",
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("reading table catalog {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing table catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("table catalog is empty")]
    Empty,
    #[error("invalid identifier {0:?} in table catalog")]
    InvalidIdentifier(String),
    #[error("table {0} listed more than once")]
    Duplicate(String),
}

/// Rewrites a column holding storage paths once files have been copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRule {
    pub column: String,
    pub bucket: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
}

fn default_id_column() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    /// Expected columns. Empty means the importer falls back to the export manifest.
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub asset: Option<AssetRule>,
}

impl TableDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            asset: None,
        }
    }
}

/// Ordered list of tables shared by every stage of a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCatalog {
    pub tables: Vec<TableDescriptor>,
}

impl TableCatalog {
    pub fn new(tables: Vec<TableDescriptor>) -> Result<Self, CatalogError> {
        let catalog = Self { tables };
        catalog.validate()?;
        Ok(catalog)
    }

    /// The built-in portfolio catalog.
    pub fn portfolio() -> Self {
        let tables = PORTFOLIO_TABLES
            .iter()
            .map(|name| {
                let mut table = TableDescriptor::named(*name);
                if *name == "cv_management" {
                    table.asset = Some(AssetRule {
                        column: "file_path".to_string(),
                        bucket: "cv-files".to_string(),
                        id_column: default_id_column(),
                    });
                }
                table
            })
            .collect();
        Self { tables }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, CatalogError> {
        let catalog: Self = serde_yaml::from_str(text)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Loads `path` when it exists, otherwise the built-in portfolio catalog.
    pub fn load_or_default(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Ok(Self::portfolio());
        }
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_yaml_str(&text)?;
        tracing::info!(path = %path.display(), tables = catalog.len(), "loaded table catalog");
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn with_asset_rules(&self) -> impl Iterator<Item = (&TableDescriptor, &AssetRule)> {
        self.tables
            .iter()
            .filter_map(|t| t.asset.as_ref().map(|rule| (t, rule)))
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.tables.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut seen = HashSet::new();
        for table in &self.tables {
            check_identifier(&table.name)?;
            for column in &table.columns {
                check_identifier(column)?;
            }
            if let Some(rule) = &table.asset {
                check_identifier(&rule.column)?;
                check_identifier(&rule.id_column)?;
            }
            if !seen.insert(table.name.as_str()) {
                return Err(CatalogError::Duplicate(table.name.clone()));
            }
        }
        Ok(())
    }
}

/// Table and column names end up in SQL and REST paths, so keep them to plain identifiers.
fn check_identifier(name: &str) -> Result<(), CatalogError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CatalogError::InvalidIdentifier(name.to_string()))
    }
}
