// 🪜 Search Policy - explicit, ordered fallback broadening
//
// When the strict query matches nothing, relax it one step at a time
// (drop term → drop provider → drop owner) until something comes back.
// Steps are cumulative. Every entry found through a relaxed query is
// flagged; broadening never happens silently.

use crate::model::{CatalogEntry, CatalogQuery, MatchKind, OwnerScope, ProviderFilter};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelaxStep {
    /// Forget the search term (and extra filter), keep provider + owner
    DropTerm,
    /// Forget the provider constraint
    DropProvider,
    /// Forget an explicit owner scope. An (id, owner) provider filter keeps
    /// its owner: the id is only meaningful under it.
    DropOwner,
}

impl RelaxStep {
    /// Would this step change the query at all?
    pub fn applies_to(&self, query: &CatalogQuery) -> bool {
        match self {
            RelaxStep::DropTerm => query.has_term(),
            RelaxStep::DropProvider => query.provider.is_specific(),
            RelaxStep::DropOwner => {
                query.owners != OwnerScope::Both && !matches!(query.provider, ProviderFilter::Id(..))
            }
        }
    }

    pub fn apply(&self, query: &CatalogQuery) -> CatalogQuery {
        let mut relaxed = query.clone();
        match self {
            RelaxStep::DropTerm => {
                relaxed.term = None;
                relaxed.extra_filter = None;
                relaxed.exact_code = false;
            }
            RelaxStep::DropProvider => relaxed.provider = ProviderFilter::Any,
            RelaxStep::DropOwner => relaxed.owners = OwnerScope::Both,
        }
        relaxed
    }
}

impl fmt::Display for RelaxStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelaxStep::DropTerm => "drop_term",
            RelaxStep::DropProvider => "drop_provider",
            RelaxStep::DropOwner => "drop_owner",
        };
        f.write_str(name)
    }
}

// ============================================================================
// POLICY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPolicy {
    steps: Vec<RelaxStep>,
}

/// Entries plus the step that produced them (None = strict query)
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutcome {
    pub entries: Vec<CatalogEntry>,
    pub step: Option<RelaxStep>,
}

impl Default for SearchPolicy {
    /// Term-only broadening
    fn default() -> Self {
        SearchPolicy {
            steps: vec![RelaxStep::DropTerm],
        }
    }
}

impl SearchPolicy {
    pub fn new(steps: Vec<RelaxStep>) -> Self {
        SearchPolicy { steps }
    }

    /// drop term → drop provider → drop owner
    pub fn full() -> Self {
        SearchPolicy::new(vec![
            RelaxStep::DropTerm,
            RelaxStep::DropProvider,
            RelaxStep::DropOwner,
        ])
    }

    /// Never broaden
    pub fn strict() -> Self {
        SearchPolicy::new(Vec::new())
    }

    pub fn steps(&self) -> &[RelaxStep] {
        &self.steps
    }

    /// Run the strict query, then each applicable step on the progressively
    /// relaxed query until one returns rows. Relaxed rows are marked with
    /// `MatchKind::Relaxed(step)`.
    pub fn execute<F, E>(&self, query: &CatalogQuery, mut run: F) -> Result<PolicyOutcome, E>
    where
        F: FnMut(&CatalogQuery) -> Result<Vec<CatalogEntry>, E>,
    {
        let entries = run(query)?;
        if !entries.is_empty() {
            return Ok(PolicyOutcome { entries, step: None });
        }

        let mut current = query.clone();
        for step in &self.steps {
            if !step.applies_to(&current) {
                continue;
            }
            current = step.apply(&current);
            tracing::debug!(step = %step, "strict query empty, relaxing");

            let mut entries = run(&current)?;
            if !entries.is_empty() {
                for entry in &mut entries {
                    entry.match_kind = MatchKind::Relaxed(*step);
                }
                return Ok(PolicyOutcome {
                    entries,
                    step: Some(*step),
                });
            }
        }

        Ok(PolicyOutcome {
            entries: Vec::new(),
            step: None,
        })
    }
}

/// Append the low-confidence marker to the name of every relaxed entry
pub fn annotate(entries: &mut [CatalogEntry], marker: &str) {
    for entry in entries.iter_mut().filter(|e| e.is_relaxed()) {
        if !entry.name.ends_with(marker) {
            entry.name.push_str(marker);
        }
    }
}
