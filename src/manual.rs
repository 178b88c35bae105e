// 📒 Manual Catalog Store - read side of the curated catalog
//
// Owner + provider constraints are pushed down to SQL; token-AND term
// matching runs in Rust so it shares normalization with every other source.

use crate::config::SearchConfig;
use crate::db::parse_timestamp;
use crate::error::Result;
use crate::model::{
    CatalogEntry, CatalogQuery, CatalogSource, Owner, OwnerScope, ProviderFilter, SourceKind, SourceRef,
};
use crate::normalize::{normalize, ProviderKey};
use crate::policy::{annotate, SearchPolicy};
use crate::price::RawPrice;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

pub struct ManualCatalogStore<'a> {
    conn: &'a Connection,
    marker: String,
}

impl<'a> ManualCatalogStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        ManualCatalogStore {
            conn,
            marker: SearchConfig::default().fallback_marker,
        }
    }

    pub fn with_marker(mut self, marker: &str) -> Self {
        self.marker = marker.to_string();
        self
    }

    /// Standalone search with term-only broadening.
    ///
    /// When (provider, owner, term) matches nothing and a term was given,
    /// the rows for (provider, owner) are returned instead, each flagged
    /// and with the low-confidence marker appended to its name.
    pub fn search(&self, term: &str, provider: ProviderFilter, owners: OwnerScope) -> Result<Vec<CatalogEntry>> {
        let query = CatalogQuery::new(term).with_provider(provider).with_owners(owners);
        let mut outcome = SearchPolicy::default().execute(&query, |q| self.query(q))?;
        annotate(&mut outcome.entries, &self.marker);
        Ok(outcome.entries)
    }

    /// Exact query: no broadening
    pub fn query(&self, query: &CatalogQuery) -> Result<Vec<CatalogEntry>> {
        let mut sql = String::from(
            "SELECT id, code, name, price, provider, owner, observations
             FROM manual_products WHERE 1 = 1",
        );
        let mut values: Vec<Value> = Vec::new();

        if let OwnerScope::Only(owner) = query.effective_owners() {
            sql.push_str(" AND owner = ?");
            values.push(Value::Text(owner.as_str().to_string()));
        }

        match &query.provider {
            ProviderFilter::Any => {}
            ProviderFilter::Id(id, _) => {
                // Match by normalized name: rows keep their provider even if
                // their provider_id link was cleared
                sql.push_str(
                    " AND provider_normalized = (SELECT name_normalized FROM providers WHERE id = ?)",
                );
                values.push(Value::Integer(id.0));
            }
            ProviderFilter::Text(text) => {
                let needle = normalize(text);
                if !needle.is_empty() {
                    sql.push_str(" AND instr(provider_normalized, ?) > 0");
                    values.push(Value::Text(needle));
                }
            }
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(ManualRow {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    name: row.get(2)?,
                    price: row.get(3)?,
                    provider: row.get(4)?,
                    owner: row.get(5)?,
                    observations: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let total = rows.len();
        let entries: Vec<CatalogEntry> = rows
            .into_iter()
            .filter(|r| query.text_matches(r.code.as_deref(), &[&r.name, &r.provider]))
            .map(ManualRow::into_entry)
            .collect();

        tracing::debug!(scanned = total, matched = entries.len(), "manual catalog queried");
        Ok(entries)
    }

    /// Fresh evidence for a Deleted provider: any manual row for the pair
    /// updated after `since` (or any row at all when `since` is None)
    pub fn has_entries_since(&self, key: &ProviderKey, owner: Owner, since: Option<DateTime<Utc>>) -> Result<bool> {
        let mut stmt = self.conn.prepare(
            "SELECT updated_at FROM manual_products
             WHERE provider_normalized = ?1 AND owner = ?2",
        )?;
        let stamps = stmt
            .query_map(params![key.as_str(), owner], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(match since {
            None => !stamps.is_empty(),
            Some(since) => stamps
                .iter()
                .filter_map(|s| parse_timestamp(s))
                .any(|updated| updated > since),
        })
    }
}

impl CatalogSource for ManualCatalogStore<'_> {
    fn label(&self) -> String {
        "manual".to_string()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Manual
    }

    fn query(&self, query: &CatalogQuery) -> Result<Vec<CatalogEntry>> {
        ManualCatalogStore::query(self, query)
    }
}

struct ManualRow {
    id: i64,
    code: Option<String>,
    name: String,
    price: Value,
    provider: String,
    owner: Owner,
    observations: Option<String>,
}

impl ManualRow {
    fn into_entry(self) -> CatalogEntry {
        let raw = match self.price {
            Value::Integer(i) => RawPrice::Number(i as f64),
            Value::Real(f) => RawPrice::Number(f),
            Value::Text(s) => RawPrice::from(Some(s)),
            Value::Null | Value::Blob(_) => RawPrice::Empty,
        };

        CatalogEntry::new(self.name, &self.provider, self.owner, SourceRef::Manual { row_id: self.id })
            .with_code(self.code)
            .with_price(&raw)
            .with_observations(self.observations.unwrap_or_default())
    }
}
