// Catalog Search - Core Library
// Reconciliation + search over a curated manual catalog and provider
// spreadsheets, with a per-owner visibility overlay.

pub mod error;
pub mod price;          // PriceParser - locale-ambiguous price text
pub mod normalize;      // TextNormalizer - provider identity + search tokens
pub mod columns;        // ColumnResolver - header aliases → roles
pub mod workbook;       // XLSX / CSV grid loader
pub mod model;
pub mod config;
pub mod db;
pub mod entities;       // Provider interning
pub mod parser;         // SpreadsheetCatalogReader + file locator
pub mod manual;         // ManualCatalogStore
pub mod visibility;     // ProviderVisibilityResolver
pub mod policy;         // SearchPolicy - ordered relaxation steps
pub mod deduplication;
pub mod search;         // CatalogSearchOrchestrator

// Re-export commonly used types
pub use error::{CatalogError, Result};
pub use price::{parse as parse_price, ParsedPrice, RawPrice};
pub use normalize::{normalize, ProviderKey, TokenQuery};
pub use columns::ColumnRoles;
pub use model::{
    CatalogEntry, CatalogQuery, CatalogSource, MatchKind, Owner, OwnerScope, ProviderFilter,
    SourceKind, SourceRef,
};
pub use config::{CatalogConfig, ColorOverride, SearchConfig, SpreadsheetSourceConfig, StorageConfig};
pub use db::{
    insert_manual_product, register_provider, setup_database, sync_providers, verify_count, NewManualProduct,
};
pub use entities::{ProviderId, ProviderRecord, ProviderRegistry};
pub use parser::{locate_provider_files, SpreadsheetCatalogReader, SpreadsheetSource};
pub use manual::ManualCatalogStore;
pub use visibility::{
    DeleteOutcome, ProviderVisibilityResolver, VisibilityEvidence, VisibilityRecord, VisibilitySnapshot,
    VisibilityState,
};
pub use policy::{RelaxStep, SearchPolicy};
pub use deduplication::{DedupResult, DeduplicationEngine, DuplicateMatch};
pub use search::{CatalogSearchOrchestrator, SearchOutcome, SearchReport, SourceReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
