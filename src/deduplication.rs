// 🔍 Deduplication Engine - collapse the same product seen through several sources
//
// Identity = (normalized code, normalized name, provider key). The first
// occurrence wins, so source-arrival order (manual first, then spreadsheets
// in configuration order) decides which copy survives.

use crate::model::{CatalogEntry, SourceKind};
use crate::normalize::ProviderKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// DUPLICATE MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    /// Index (in the input) of the entry that was kept
    pub kept_index: usize,

    /// Index (in the input) of the entry that was dropped
    pub dropped_index: usize,

    pub kept_kind: SourceKind,

    pub dropped_kind: SourceKind,

    /// Human-readable reason
    pub reason: String,
}

/// Deduplicated entries plus what was collapsed
#[derive(Debug, Clone, Default)]
pub struct DedupResult {
    pub entries: Vec<CatalogEntry>,
    pub duplicates: Vec<DuplicateMatch>,
}

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct DeduplicationEngine;

impl DeduplicationEngine {
    pub fn new() -> Self {
        DeduplicationEngine
    }

    /// Find every entry that repeats an earlier one
    pub fn find_duplicates(&self, entries: &[CatalogEntry]) -> Vec<DuplicateMatch> {
        let mut first_seen: HashMap<(String, String, ProviderKey), usize> = HashMap::new();
        let mut matches = Vec::new();

        for (i, entry) in entries.iter().enumerate() {
            let key = entry.dedup_key();
            match first_seen.get(&key) {
                Some(&kept) => {
                    let original = &entries[kept];
                    matches.push(DuplicateMatch {
                        kept_index: kept,
                        dropped_index: i,
                        kept_kind: original.source_kind,
                        dropped_kind: entry.source_kind,
                        reason: format!(
                            "same code '{}', name '{}' and provider '{}' as {}",
                            key.0, key.1, key.2, original.source_ref
                        ),
                    });
                }
                None => {
                    first_seen.insert(key, i);
                }
            }
        }

        matches
    }

    /// Keep the first occurrence of every identity, preserving order
    pub fn deduplicate(&self, entries: Vec<CatalogEntry>) -> DedupResult {
        let duplicates = self.find_duplicates(&entries);
        if duplicates.is_empty() {
            return DedupResult { entries, duplicates };
        }

        let mut dropped = vec![false; entries.len()];
        for m in &duplicates {
            dropped[m.dropped_index] = true;
        }

        let kept: Vec<CatalogEntry> = entries
            .into_iter()
            .zip(dropped)
            .filter(|(_, drop)| !drop)
            .map(|(entry, _)| entry)
            .collect();

        let cross = duplicates.iter().filter(|m| m.is_cross_source()).count();
        tracing::debug!(
            dropped = duplicates.len(),
            cross_source = cross,
            "duplicates collapsed"
        );

        DedupResult {
            entries: kept,
            duplicates,
        }
    }
}

impl DuplicateMatch {
    /// A manual entry and a spreadsheet entry collapsed
    pub fn is_cross_source(&self) -> bool {
        self.kept_kind != self.dropped_kind
    }
}

// ============================================================================
// TESTS
// ============================================================================
