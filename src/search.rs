// 🔎 Catalog Search Orchestrator - one query, every applicable source
//
// Flow per call:
// 1. Snapshot provider registry + visibility table (read once, never mutated)
// 2. Numeric code + specific provider → exact-code attempt first
// 3. Fan out: manual store, then spreadsheet sources in configuration order
// 4. Empty? SearchPolicy relaxes the query step by step
// 5. Deduplicate (first occurrence wins), mark relaxed names
//
// Best effort: a failing source contributes nothing and is recorded in the
// SearchReport; the call itself only fails on snapshot/lookup errors.

use crate::config::CatalogConfig;
use crate::deduplication::DeduplicationEngine;
use crate::entities::ProviderRegistry;
use crate::error::{CatalogError, Result};
use crate::manual::ManualCatalogStore;
use crate::model::{
    CatalogEntry, CatalogQuery, CatalogSource, Owner, OwnerScope, ProviderFilter, SourceKind,
};
use crate::normalize::{is_numeric_code, normalize, ProviderKey};
use crate::parser::SpreadsheetSource;
use crate::policy::{annotate, PolicyOutcome, RelaxStep, SearchPolicy};
use crate::visibility::{VisibilityEvidence, VisibilitySnapshot};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;

// ============================================================================
// REPORT
// ============================================================================

/// One source consulted during one attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    /// 1 = strict (or exact-code) query, 2+ = fast-path fallback / relaxations
    pub attempt: usize,
    pub label: String,
    pub kind: SourceKind,
    pub entries: usize,
    pub error: Option<String>,
}

/// Structured partial-failure signal for callers that want it
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchReport {
    pub attempts: usize,
    pub sources: Vec<SourceReport>,
    /// Spreadsheet sources skipped because their provider is not visible
    pub invisible_sources: Vec<String>,
    /// Manual rows dropped because their provider is not visible
    pub invisible_rows: usize,
    /// Results came from the numeric exact-code attempt
    pub exact_code: bool,
    /// Relaxation step that produced the results, if any
    pub relaxation: Option<RelaxStep>,
    pub duplicates_removed: usize,
}

impl SearchReport {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|s| s.error.is_some())
    }

    pub fn failure_count(&self) -> usize {
        self.failed_sources().count()
    }

    fn record(&mut self, label: String, kind: SourceKind, result: &Result<Vec<CatalogEntry>>) {
        let (entries, error) = match result {
            Ok(rows) => (rows.len(), None),
            Err(e) => (0, Some(e.to_string())),
        };
        self.sources.push(SourceReport {
            attempt: self.attempts,
            label,
            kind,
            entries,
            error,
        });
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub entries: Vec<CatalogEntry>,
    pub report: SearchReport,
}

// ============================================================================
// EVIDENCE (Deleted-provider reactivation)
// ============================================================================

/// Fresh data for (provider, owner): a manual row updated after the deletion
/// or a provider spreadsheet modified after it
struct SourceEvidence<'s> {
    manual: &'s ManualCatalogStore<'s>,
    config: &'s CatalogConfig,
}

impl VisibilityEvidence for SourceEvidence<'_> {
    fn has_fresh_evidence(&self, key: &ProviderKey, owner: Owner, since: Option<DateTime<Utc>>) -> bool {
        if self.manual.has_fresh_evidence(key, owner, since) {
            return true;
        }
        let Some(folder) = self.config.owner_folder(owner) else {
            return false;
        };
        self.config
            .sources_for(owner)
            .filter(|cfg| &cfg.provider_key() == key)
            .any(|cfg| {
                SpreadsheetSource::new(
                    cfg,
                    folder,
                    &self.config.storage.reserved_manual_filename,
                    self.config.search.header_scan_rows,
                )
                .has_files_since(since)
            })
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct CatalogSearchOrchestrator<'a> {
    conn: &'a Connection,
    config: &'a CatalogConfig,
    policy: SearchPolicy,
    dedup: DeduplicationEngine,
}

/// Per-call snapshot
struct SearchContext<'c> {
    registry: ProviderRegistry,
    visibility: VisibilitySnapshot,
    manual: ManualCatalogStore<'c>,
}

impl<'a> CatalogSearchOrchestrator<'a> {
    pub fn new(conn: &'a Connection, config: &'a CatalogConfig) -> Self {
        CatalogSearchOrchestrator {
            conn,
            config,
            policy: SearchPolicy::new(config.search.relaxation.clone()),
            dedup: DeduplicationEngine::new(),
        }
    }

    pub fn with_policy(mut self, policy: SearchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Result-list contract: entries only, failures look like "no matches"
    pub fn search(&self, term: &str, provider: ProviderFilter, owners: OwnerScope) -> Vec<CatalogEntry> {
        let query = CatalogQuery::new(term).with_provider(provider).with_owners(owners);
        self.search_query(&query)
    }

    pub fn search_query(&self, query: &CatalogQuery) -> Vec<CatalogEntry> {
        match self.search_with_report(query) {
            Ok(outcome) => outcome.entries,
            Err(e) => {
                tracing::warn!(error = %e, "search failed");
                Vec::new()
            }
        }
    }

    /// Resolve a provider name typed by a user. With an owner and a known
    /// provider this is an interned id filter; otherwise free text.
    pub fn provider_filter(&self, name: &str, owner: Option<Owner>) -> Result<ProviderFilter> {
        if normalize(name).is_empty() {
            return Ok(ProviderFilter::Any);
        }
        let registry = ProviderRegistry::load(self.conn)?;
        Ok(match (registry.lookup(name), owner) {
            (Some(record), Some(owner)) if record.owners.contains(&owner) => ProviderFilter::Id(record.id, owner),
            _ => ProviderFilter::Text(name.to_string()),
        })
    }

    pub fn search_with_report(&self, query: &CatalogQuery) -> Result<SearchOutcome> {
        let ctx = SearchContext {
            registry: ProviderRegistry::load(self.conn)?,
            visibility: VisibilitySnapshot::load(self.conn)?,
            manual: ManualCatalogStore::new(self.conn).with_marker(&self.config.search.fallback_marker),
        };

        if let ProviderFilter::Id(id, _) = &query.provider {
            if ctx.registry.get(*id).is_none() {
                return Err(CatalogError::UnknownProvider(id.to_string()));
            }
        }

        let mut report = SearchReport::default();
        let mut outcome = None;

        // Numeric fast path: "044" must not drown in "70448801"-style partial hits
        let numeric = query.term.as_deref().is_some_and(is_numeric_code);
        if numeric && query.provider.is_specific() && !query.exact_code {
            let mut exact = query.clone();
            exact.exact_code = true;
            let entries = self.fan_out(&ctx, &exact, &mut report);
            if !entries.is_empty() {
                report.exact_code = true;
                outcome = Some(PolicyOutcome { entries, step: None });
            } else {
                tracing::debug!(term = ?query.term, "no exact code hit, falling back to token search");
            }
        }

        let outcome = match outcome {
            Some(o) => o,
            None => self
                .policy
                .execute(query, |q| Ok::<_, Infallible>(self.fan_out(&ctx, q, &mut report)))
                .unwrap_or_else(|never| match never {}),
        };

        let mut deduped = self.dedup.deduplicate(outcome.entries);
        annotate(&mut deduped.entries, &self.config.search.fallback_marker);

        report.relaxation = outcome.step;
        report.duplicates_removed = deduped.duplicates.len();

        tracing::debug!(
            results = deduped.entries.len(),
            attempts = report.attempts,
            failures = report.failure_count(),
            relaxation = ?report.relaxation,
            "search finished"
        );

        Ok(SearchOutcome {
            entries: deduped.entries,
            report,
        })
    }

    /// Query every applicable source once, in arrival order
    fn fan_out(&self, ctx: &SearchContext<'_>, query: &CatalogQuery, report: &mut SearchReport) -> Vec<CatalogEntry> {
        report.attempts += 1;
        let evidence = SourceEvidence {
            manual: &ctx.manual,
            config: self.config,
        };
        let mut visible: HashMap<(ProviderKey, Owner), bool> = HashMap::new();
        let mut is_visible = |key: &ProviderKey, owner: Owner| {
            *visible
                .entry((key.clone(), owner))
                .or_insert_with(|| ctx.visibility.is_visible(key, owner, &evidence))
        };

        let mut entries = Vec::new();

        // Manual store first
        let result = ctx.manual.query(query);
        report.record(ctx.manual.label(), SourceKind::Manual, &result);
        match result {
            Ok(rows) => {
                let before = rows.len();
                entries.extend(
                    rows.into_iter()
                        .filter(|e| is_visible(&e.provider_key, e.owner)),
                );
                report.invisible_rows += before - entries.len();
            }
            Err(e) => tracing::warn!(source = "manual", error = %e, "source failed"),
        }

        // Spreadsheet sources, configuration order
        let owners = query.effective_owners();
        for cfg in &self.config.providers {
            if !owners.contains(cfg.owner) || !provider_admits(&query.provider, cfg, &ctx.registry) {
                continue;
            }
            let Some(folder) = self.config.owner_folder(cfg.owner) else {
                continue;
            };
            let source = SpreadsheetSource::new(
                cfg,
                folder,
                &self.config.storage.reserved_manual_filename,
                self.config.search.header_scan_rows,
            );

            if !is_visible(&cfg.provider_key(), cfg.owner) {
                tracing::debug!(source = %source.label(), "provider not visible, skipped");
                if !report.invisible_sources.contains(&source.label()) {
                    report.invisible_sources.push(source.label());
                }
                continue;
            }

            let result = source.query(query);
            report.record(source.label(), source.kind(), &result);
            match result {
                Ok(rows) => entries.extend(rows),
                Err(e) => tracing::warn!(source = %source.label(), error = %e, "source failed"),
            }
        }

        entries
    }
}

/// Does a configured spreadsheet source satisfy the provider filter?
fn provider_admits(
    filter: &ProviderFilter,
    cfg: &crate::config::SpreadsheetSourceConfig,
    registry: &ProviderRegistry,
) -> bool {
    match filter {
        ProviderFilter::Any => true,
        ProviderFilter::Id(id, owner) => {
            cfg.owner == *owner && registry.key_of(*id) == Some(&cfg.provider_key())
        }
        ProviderFilter::Text(text) => {
            let needle = ProviderKey::new(text);
            cfg.provider_key().contains(&needle) || ProviderKey::new(cfg.display_name()).contains(&needle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SearchConfig, SpreadsheetSourceConfig, StorageConfig};
    use crate::db::{insert_manual_product, setup_database, sync_providers, NewManualProduct};
    use crate::model::MatchKind;
    use crate::price::RawPrice;
    use crate::visibility::ProviderVisibilityResolver;
    use crate::workbook::fixtures::xlsx_bytes;
    use chrono::Duration;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        conn: Connection,
        config: CatalogConfig,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let ricky = dir.path().join("ricky");
        let ferreteria = dir.path().join("ferreteria");
        fs::create_dir_all(&ricky).unwrap();
        fs::create_dir_all(&ferreteria).unwrap();

        write_xlsx(
            &ricky.join("Chiesa_octubre.xlsx"),
            &[
                &["LISTA CHIESA"],
                &["Codigo", "Descripcion", "Precio"],
                &["CARBG7202", "CARBON para amoladora", "=1500"],
                &["ESC-11", "Escobilla", "=820"],
            ],
        );
        write_xlsx(
            &ferreteria.join("bahco.xlsx"),
            &[
                &["Codigo", "Descripcion", "Precio"],
                &["70448801", "Llave combinada 13mm", "=2500"],
                &["044", "Arandela plana", "=15"],
            ],
        );

        let mut chiesa = SpreadsheetSourceConfig::new("chiesa", Owner::Ricky);
        chiesa.display_name = Some("Chiesa".into());
        chiesa.header_row_offset = 1;
        chiesa.code_aliases = vec!["codigo".into()];
        chiesa.name_aliases = vec!["descripcion".into()];
        chiesa.price_aliases = vec!["precio".into()];

        let mut bahco = chiesa.clone();
        bahco.key = "bahco".into();
        bahco.display_name = Some("Bahco".into());
        bahco.owner = Owner::Ferreteria;
        bahco.header_row_offset = 0;

        let config = CatalogConfig {
            storage: StorageConfig {
                database: dir.path().join("catalog.db"),
                owner_folders: BTreeMap::from([(Owner::Ricky, ricky), (Owner::Ferreteria, ferreteria)]),
                reserved_manual_filename: "productos_manuales.xlsx".into(),
            },
            search: SearchConfig::default(),
            providers: vec![chiesa, bahco],
        };

        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        sync_providers(&conn, &config).unwrap();
        insert_manual_product(
            &conn,
            &NewManualProduct::new("Carbón para amoladora", "chiesa", Owner::Ricky)
                .with_code("CARBG7202")
                .with_price(RawPrice::Text("1.500".into()))
                .updated_at(Utc::now() - Duration::days(10)),
        )
        .unwrap();

        Fixture { _dir: dir, conn, config }
    }

    fn write_xlsx(path: &Path, rows: &[&[&str]]) {
        let rows: Vec<Vec<(&str, Option<&str>)>> = rows
            .iter()
            .map(|r| r.iter().map(|v| (*v, None)).collect())
            .collect();
        fs::write(path, xlsx_bytes(&[("Hoja1", rows)])).unwrap();
    }

    #[test]
    fn test_manual_and_spreadsheet_consolidate() {
        let f = fixture();
        let engine = CatalogSearchOrchestrator::new(&f.conn, &f.config);

        for spelling in ["Chiesa", "CHIÉSA"] {
            let hits = engine.search("CARBG7202", ProviderFilter::Text(spelling.into()), OwnerScope::Both);
            assert_eq!(hits.len(), 1, "spelling {}", spelling);
            assert_eq!(hits[0].owner, Owner::Ricky);
            assert_eq!(hits[0].source_kind, SourceKind::Manual);
        }
    }

    #[test]
    fn test_numeric_fast_path_avoids_partial_digits() {
        let f = fixture();
        let engine = CatalogSearchOrchestrator::new(&f.conn, &f.config);

        let outcome = engine
            .search_with_report(&CatalogQuery::new("044").with_provider(ProviderFilter::Text("bahco".into())))
            .unwrap();
        assert!(outcome.report.exact_code);
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].name, "Arandela plana");

        // without a provider the general token search runs: both match
        let hits = engine.search("044", ProviderFilter::Any, OwnerScope::Both);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_numeric_fast_path_honors_extra_filter() {
        let f = fixture();
        let engine = CatalogSearchOrchestrator::new(&f.conn, &f.config);

        let query = CatalogQuery::new("044")
            .with_provider(ProviderFilter::Text("bahco".into()))
            .with_extra_filter(Some("llave".into()));
        let outcome = engine.search_with_report(&query).unwrap();

        // "Arandela plana" owns code 044 but fails the filter, so the token search answers
        assert!(!outcome.report.exact_code);
        assert_eq!(outcome.report.relaxation, None);
        let names: Vec<&str> = outcome.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Llave combinada 13mm"]);
    }

    #[test]
    fn test_provider_id_owner_wins_over_explicit_scope() {
        let f = fixture();
        insert_manual_product(
            &f.conn,
            &NewManualProduct::new("Llave manual", "Bahco", Owner::Ricky).with_code("LL-1"),
        )
        .unwrap();
        let engine = CatalogSearchOrchestrator::new(&f.conn, &f.config).with_policy(SearchPolicy::strict());

        let filter = engine.provider_filter("bahco", Some(Owner::Ferreteria)).unwrap();
        let query = CatalogQuery::new("llave")
            .with_provider(filter)
            .with_owners(OwnerScope::Only(Owner::Ricky));
        let hits = engine.search_query(&query);

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Llave combinada 13mm");
        assert_eq!(hits[0].owner, Owner::Ferreteria);
        assert_eq!(hits[0].source_kind, SourceKind::Spreadsheet);
    }

    fn any_owner() -> impl Strategy<Value = Owner> {
        prop_oneof![Just(Owner::Ricky), Just(Owner::Ferreteria)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn hidden_provider_never_appears(
            term in "[a-zA-Z0-9 óÓ-]{0,12}",
            owner in any_owner(),
            whole_catalog in any::<bool>(),
        ) {
            let f = fixture();
            for provider in ["Chiesa", "Bahco"] {
                ProviderVisibilityResolver::new(&f.conn).hide(provider, owner).unwrap();
            }
            let engine = CatalogSearchOrchestrator::new(&f.conn, &f.config)
                .with_policy(SearchPolicy::full());

            let scope = if whole_catalog { OwnerScope::Both } else { OwnerScope::Only(owner) };
            let outcome = engine
                .search_with_report(&CatalogQuery::new(&term).with_owners(scope))
                .unwrap();
            prop_assert!(outcome.entries.iter().all(|e| e.owner != owner), "term {:?}", term);
        }
    }

    #[test]
    fn test_deleted_provider_reactivates_on_fresh_evidence() {
        let f = fixture();
        let resolver = ProviderVisibilityResolver::new(&f.conn);
        // spreadsheets were written moments ago; delete "in the future" so they are stale
        resolver
            .delete_at("Chiesa", Owner::Ricky, Utc::now() + Duration::hours(1))
            .unwrap();
        let engine = CatalogSearchOrchestrator::new(&f.conn, &f.config).with_policy(SearchPolicy::strict());

        assert!(engine
            .search("carbon", ProviderFilter::Any, OwnerScope::Only(Owner::Ricky))
            .is_empty());

        // delete long ago: the manual row and spreadsheet are newer → visible again
        resolver
            .delete_at("Chiesa", Owner::Ricky, Utc::now() - Duration::days(30))
            .unwrap();
        let hits = engine.search("carbon", ProviderFilter::Any, OwnerScope::Only(Owner::Ricky));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_fallback_is_flagged_not_empty() {
        let f = fixture();
        let engine = CatalogSearchOrchestrator::new(&f.conn, &f.config);

        let outcome = engine
            .search_with_report(&CatalogQuery::new("zzz").with_provider(ProviderFilter::Text("chiesa".into())))
            .unwrap();
        assert_eq!(outcome.report.relaxation, Some(RelaxStep::DropTerm));
        assert_eq!(outcome.entries.len(), 2);
        for entry in &outcome.entries {
            assert_eq!(entry.match_kind, MatchKind::Relaxed(RelaxStep::DropTerm));
            assert!(entry.name.ends_with(" [sin coincidencia exacta]"));
        }
    }

    #[test]
    fn test_failing_source_is_reported_not_fatal() {
        let f = fixture();
        let folder = f.config.owner_folder(Owner::Ricky).unwrap().to_path_buf();
        fs::write(folder.join("chiesa_roto.xlsx"), b"garbage").unwrap();
        fs::write(f.config.owner_folder(Owner::Ferreteria).unwrap().join("bahco.xlsx"), b"garbage").unwrap();
        let engine = CatalogSearchOrchestrator::new(&f.conn, &f.config);

        let outcome = engine.search_with_report(&CatalogQuery::new("llave")).unwrap();
        assert!(outcome.entries.is_empty() || outcome.report.relaxation.is_some());
        assert!(outcome
            .report
            .failed_sources()
            .any(|s| s.label == "spreadsheet:bahco:ferreteria"));
        // chiesa still has one readable file
        assert!(!outcome
            .report
            .failed_sources()
            .any(|s| s.label == "spreadsheet:chiesa:ricky"));
    }

    #[test]
    fn test_provider_id_filter_and_unknown_id() {
        let f = fixture();
        let engine = CatalogSearchOrchestrator::new(&f.conn, &f.config);

        let filter = engine.provider_filter("BAHCO", Some(Owner::Ferreteria)).unwrap();
        assert!(matches!(filter, ProviderFilter::Id(_, Owner::Ferreteria)));
        let hits = engine.search("llave", filter, OwnerScope::Both);
        assert_eq!(hits.len(), 1);

        assert!(matches!(
            engine.provider_filter("desconocido", Some(Owner::Ricky)).unwrap(),
            ProviderFilter::Text(_)
        ));

        let bogus = CatalogQuery::new("x").with_provider(ProviderFilter::Id(crate::entities::ProviderId(999), Owner::Ricky));
        assert!(matches!(
            engine.search_with_report(&bogus),
            Err(CatalogError::UnknownProvider(_))
        ));
    }
}
