// ⚠️ Error taxonomy for the catalog engine
//
// Every variant here is recoverable: the orchestrator catches per-source
// failures and keeps going. Unparseable prices are NOT errors, they are
// recorded on the entry itself (price = 0, price_raw_text = original).

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Code/name/price columns could not be located, even after rescanning
    /// the first rows for a header.
    #[error("missing required column in {file} (sheet '{sheet}'): {role}")]
    MissingRequiredColumn {
        file: String,
        sheet: String,
        role: &'static str,
    },

    #[error("cannot access {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed OOXML package or CSV payload
    #[error("malformed spreadsheet {}: {reason}", path.display())]
    Workbook { path: PathBuf, reason: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("unknown owner '{0}'")]
    UnknownOwner(String),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CatalogError {
    pub fn workbook(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        CatalogError::Workbook {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
