// 📦 Catalog model - the unit every source produces and every search returns
//
// CatalogEntry is ephemeral: built fresh per search from the manual store or
// a spreadsheet row, never persisted itself.

use crate::entities::ProviderId;
use crate::error::CatalogError;
use crate::normalize::{normalize, ProviderKey, TokenQuery};
use crate::policy::RelaxStep;
use crate::price::{self, RawPrice};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// OWNER
// ============================================================================

/// The two business units sharing the system, each with its own providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Owner {
    Ricky,
    Ferreteria,
}

impl Owner {
    pub const ALL: [Owner; 2] = [Owner::Ricky, Owner::Ferreteria];

    pub fn as_str(&self) -> &'static str {
        match self {
            Owner::Ricky => "ricky",
            Owner::Ferreteria => "ferreteria",
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Owner {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "ricky" => Ok(Owner::Ricky),
            "ferreteria" => Ok(Owner::Ferreteria),
            _ => Err(CatalogError::UnknownOwner(s.to_string())),
        }
    }
}

impl ToSql for Owner {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Owner {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: CatalogError| FromSqlError::Other(Box::new(e)))
    }
}

/// Which owners a search covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OwnerScope {
    #[default]
    Both,
    Only(Owner),
}

impl OwnerScope {
    pub fn contains(&self, owner: Owner) -> bool {
        match self {
            OwnerScope::Both => true,
            OwnerScope::Only(o) => *o == owner,
        }
    }

    pub fn owners(&self) -> Vec<Owner> {
        Owner::ALL.into_iter().filter(|o| self.contains(*o)).collect()
    }
}

impl From<Option<Owner>> for OwnerScope {
    fn from(owner: Option<Owner>) -> Self {
        owner.map_or(OwnerScope::Both, OwnerScope::Only)
    }
}

// ============================================================================
// SOURCE PROVENANCE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Manual,
    Spreadsheet,
}

/// Opaque locator back to the originating row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceRef {
    Manual { row_id: i64 },
    Spreadsheet { file: String, sheet: String, row: usize },
}

impl SourceRef {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceRef::Manual { .. } => SourceKind::Manual,
            SourceRef::Spreadsheet { .. } => SourceKind::Spreadsheet,
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Manual { row_id } => write!(f, "manual#{}", row_id),
            SourceRef::Spreadsheet { file, sheet, row } => write!(f, "{}[{}]:{}", file, sheet, row),
        }
    }
}

/// How an entry got into the results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchKind {
    #[default]
    Exact,
    /// Shown only because the strict query matched nothing
    Relaxed(RelaxStep),
}

// ============================================================================
// CATALOG ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub code: Option<String>,
    pub name: String,
    /// Always defined; 0 when the source text was unparseable
    pub price: Decimal,
    /// Original price text, only when parsing failed
    pub price_raw_text: Option<String>,
    /// Display name of the provider
    pub provider: String,
    pub provider_key: ProviderKey,
    pub owner: Owner,
    pub observations: String,
    pub source_kind: SourceKind,
    pub source_ref: SourceRef,
    #[serde(default)]
    pub match_kind: MatchKind,
}

impl CatalogEntry {
    pub fn new(name: String, provider: &str, owner: Owner, source_ref: SourceRef) -> Self {
        CatalogEntry {
            code: None,
            name,
            price: Decimal::ZERO,
            price_raw_text: None,
            provider: provider.trim().to_string(),
            provider_key: ProviderKey::new(provider),
            owner,
            observations: String::new(),
            source_kind: source_ref.kind(),
            source_ref,
            match_kind: MatchKind::Exact,
        }
    }

    /// Builder: code, blank codes are treated as absent
    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.code = code.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        self
    }

    /// Builder: run the raw price through the price parser
    pub fn with_price(mut self, raw: &RawPrice) -> Self {
        let parsed = price::parse(raw).non_negative(raw);
        self.price = parsed.value;
        self.price_raw_text = parsed.error_text;
        self
    }

    pub fn with_observations(mut self, observations: String) -> Self {
        self.observations = observations;
        self
    }

    /// Composite identity used for cross-source deduplication
    pub fn dedup_key(&self) -> (String, String, ProviderKey) {
        (
            normalize(self.code.as_deref().unwrap_or("")),
            normalize(&self.name),
            self.provider_key.clone(),
        )
    }

    pub fn is_relaxed(&self) -> bool {
        matches!(self.match_kind, MatchKind::Relaxed(_))
    }
}

// ============================================================================
// QUERY
// ============================================================================

/// Provider constraint of a search
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProviderFilter {
    #[default]
    Any,
    /// Interned provider under a specific owner
    Id(ProviderId, Owner),
    /// Free text, matched by normalized containment
    Text(String),
}

impl ProviderFilter {
    pub fn is_specific(&self) -> bool {
        !matches!(self, ProviderFilter::Any)
    }
}

/// What every source is asked. Sources never relax it themselves; relaxation
/// is the search policy's job.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CatalogQuery {
    pub term: Option<String>,
    pub provider: ProviderFilter,
    pub owners: OwnerScope,
    /// Additional AND-token constraint over the same fields as the term
    pub extra_filter: Option<String>,
    /// Match the term against codes exactly (numeric-code fast path)
    pub exact_code: bool,
}

impl CatalogQuery {
    pub fn new(term: &str) -> Self {
        CatalogQuery {
            term: Some(term.trim().to_string()).filter(|t| !t.is_empty()),
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider: ProviderFilter) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_owners(mut self, owners: OwnerScope) -> Self {
        self.owners = owners;
        self
    }

    pub fn with_extra_filter(mut self, filter: Option<String>) -> Self {
        self.extra_filter = filter.filter(|f| !f.trim().is_empty());
        self
    }

    pub fn has_term(&self) -> bool {
        self.term.is_some()
    }

    /// Owner constraint after folding in an (id, owner) provider filter.
    /// The id's owner wins over any explicit scope, for every source.
    pub fn effective_owners(&self) -> OwnerScope {
        match &self.provider {
            ProviderFilter::Id(_, owner) => OwnerScope::Only(*owner),
            _ => self.owners,
        }
    }

    /// Term + extra filter against the searched fields
    pub fn text_matches(&self, code: Option<&str>, fields: &[&str]) -> bool {
        let mut all: Vec<&str> = Vec::with_capacity(fields.len() + 1);
        all.push(code.unwrap_or(""));
        all.extend_from_slice(fields);

        let term_ok = if self.exact_code {
            let term = self.term.as_deref().map(normalize).unwrap_or_default();
            !term.is_empty() && code.map(normalize).as_deref() == Some(term.as_str())
        } else {
            self.term
                .as_deref()
                .map_or(true, |t| TokenQuery::parse(t).matches(&all))
        };
        let extra_ok = self
            .extra_filter
            .as_deref()
            .map_or(true, |f| TokenQuery::parse(f).matches(&all));
        term_ok && extra_ok
    }
}

// ============================================================================
// SOURCES
// ============================================================================

/// CatalogSource - anything the orchestrator can fan a query out to
///
/// Sources answer the query exactly as given; broadening is the
/// SearchPolicy's job, never the source's.
pub trait CatalogSource {
    /// Short label for logs and the search report
    fn label(&self) -> String;

    fn kind(&self) -> SourceKind;

    fn query(&self, query: &CatalogQuery) -> crate::error::Result<Vec<CatalogEntry>>;
}
