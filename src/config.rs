// ⚙️ Configuration - immutable table loaded once at start-up
//
// Provider layouts (header offset, column aliases, color rule) live here
// instead of in global state; the loaded CatalogConfig is passed by
// reference into every component.

use crate::error::CatalogError;
use crate::model::Owner;
use crate::normalize::{normalize, ProviderKey};
use crate::policy::RelaxStep;
use crate::workbook::normalize_color;
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub search: SearchConfig,
    /// Configuration order = spreadsheet-source arrival order
    #[serde(default)]
    pub providers: Vec<SpreadsheetSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub database: PathBuf,
    /// Folder holding each owner's spreadsheets
    #[serde(default, deserialize_with = "deserialize_owner_folders")]
    pub owner_folders: BTreeMap<Owner, PathBuf>,
    #[serde(default = "default_reserved_manual_filename")]
    pub reserved_manual_filename: String,
}

/// Owner keys go through `Owner::from_str`, so "Ferretería" is accepted too
fn deserialize_owner_folders<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<Owner, PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, PathBuf>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(owner, folder)| {
            owner
                .parse::<Owner>()
                .map(|o| (o, folder))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

fn default_reserved_manual_filename() -> String {
    "productos_manuales.xlsx".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Rows scanned for a header when the configured offset does not resolve
    #[serde(default = "default_header_scan_rows")]
    pub header_scan_rows: usize,
    /// Ordered relaxation steps applied when a strict query finds nothing
    #[serde(default = "default_relaxation")]
    pub relaxation: Vec<RelaxStep>,
    /// Appended to the name of every relaxed (low-confidence) entry
    #[serde(default = "default_fallback_marker")]
    pub fallback_marker: String,
}

fn default_header_scan_rows() -> usize {
    12
}
fn default_relaxation() -> Vec<RelaxStep> {
    vec![RelaxStep::DropTerm]
}
fn default_fallback_marker() -> String {
    " [sin coincidencia exacta]".to_string()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            header_scan_rows: default_header_scan_rows(),
            relaxation: default_relaxation(),
            fallback_marker: default_fallback_marker(),
        }
    }
}

// ============================================================================
// SPREADSHEET SOURCES
// ============================================================================

#[derive(Debug, Deserialize, Clone)]
pub struct SpreadsheetSourceConfig {
    /// File-name prefix and provider identity
    pub key: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub owner: Owner,
    /// 0-based row index of the header
    #[serde(default)]
    pub header_row_offset: usize,
    #[serde(default)]
    pub code_aliases: Vec<String>,
    #[serde(default)]
    pub name_aliases: Vec<String>,
    #[serde(default)]
    pub price_aliases: Vec<String>,
    #[serde(default)]
    pub color_override: Option<ColorOverride>,
}

/// Price is read only from the first candidate column whose fill matches;
/// rows without such a cell are excluded.
#[derive(Debug, Deserialize, Clone)]
pub struct ColorOverride {
    pub target_color: String,
    pub candidate_columns: Vec<String>,
}

impl ColorOverride {
    /// Target as 6-digit RGB
    pub fn target_rgb(&self) -> Option<String> {
        normalize_color(&self.target_color)
    }
}

impl SpreadsheetSourceConfig {
    pub fn new(key: &str, owner: Owner) -> Self {
        SpreadsheetSourceConfig {
            key: key.to_string(),
            display_name: None,
            owner,
            header_row_offset: 0,
            code_aliases: Vec::new(),
            name_aliases: Vec::new(),
            price_aliases: Vec::new(),
            color_override: None,
        }
    }

    pub fn provider_key(&self) -> ProviderKey {
        ProviderKey::new(&self.key)
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.key)
    }
}

// ============================================================================
// LOADING
// ============================================================================

impl CatalogConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: CatalogConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        // Relative paths are relative to the config file
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: CatalogConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        if self.storage.database.is_relative() {
            self.storage.database = base.join(&self.storage.database);
        }
        for folder in self.storage.owner_folders.values_mut() {
            if folder.is_relative() {
                *folder = base.join(&*folder);
            }
        }
    }

    pub fn validate(&self) -> std::result::Result<(), CatalogError> {
        let mut seen = HashSet::new();
        for source in &self.providers {
            let key = source.provider_key();
            if key.is_empty() {
                return Err(CatalogError::Config("provider key must not be empty".into()));
            }
            if !seen.insert((key.clone(), source.owner)) {
                return Err(CatalogError::Config(format!(
                    "provider '{}' configured twice for owner {}",
                    source.key, source.owner
                )));
            }
            if !self.storage.owner_folders.contains_key(&source.owner) {
                return Err(CatalogError::Config(format!(
                    "provider '{}' belongs to {} but no folder is configured for that owner",
                    source.key, source.owner
                )));
            }
            if let Some(rule) = &source.color_override {
                if rule.target_rgb().is_none() {
                    return Err(CatalogError::Config(format!(
                        "provider '{}': target_color '{}' is not 6 or 8 hex digits",
                        source.key, rule.target_color
                    )));
                }
                if rule.candidate_columns.is_empty() {
                    return Err(CatalogError::Config(format!(
                        "provider '{}': color_override needs candidate_columns",
                        source.key
                    )));
                }
            }
        }
        if normalize(&self.storage.reserved_manual_filename).is_empty() {
            return Err(CatalogError::Config("reserved_manual_filename must not be empty".into()));
        }
        Ok(())
    }

    pub fn owner_folder(&self, owner: Owner) -> Option<&Path> {
        self.storage.owner_folders.get(&owner).map(PathBuf::as_path)
    }

    /// Spreadsheet sources in configuration order
    pub fn sources_for(&self, owner: Owner) -> impl Iterator<Item = &SpreadsheetSourceConfig> {
        self.providers.iter().filter(move |s| s.owner == owner)
    }
}
