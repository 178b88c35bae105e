// 🔤 Text normalization - the identity key for providers and search tokens
//
// "Chiesa", " CHIESA ", "Chiésa" → "chiesa"
//
// Order matters for idempotence: lowercase BEFORE decomposing, so marks
// introduced by case mapping ('İ' → "i̇") are stripped in the same pass.

use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Case-fold, strip diacritics, collapse whitespace, trim.
///
/// `normalize(normalize(x)) == normalize(x)` for every input.
pub fn normalize(s: &str) -> String {
    let folded: String = s
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// PROVIDER KEY
// ============================================================================

/// Normalized provider name. Only constructible through [`normalize`], so two
/// spellings that normalize equal are the same provider everywhere: manual
/// store text, spreadsheet provider keys and visibility records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderKey(String);

impl ProviderKey {
    pub fn new(raw: &str) -> Self {
        ProviderKey(normalize(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Free-text provider filter semantics: normalized containment
    pub fn contains(&self, other: &ProviderKey) -> bool {
        self.0.contains(other.as_str())
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// TOKEN QUERY
// ============================================================================

/// Whitespace-split search term with AND semantics: every token must be a
/// normalized substring of at least one searched field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TokenQuery {
    tokens: Vec<String>,
}

impl TokenQuery {
    pub fn parse(term: &str) -> Self {
        TokenQuery {
            tokens: normalize(term)
                .split(' ')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// An empty query matches everything
    pub fn matches(&self, fields: &[&str]) -> bool {
        if self.tokens.is_empty() {
            return true;
        }
        let normalized: Vec<String> = fields.iter().map(|f| normalize(f)).collect();
        self.tokens
            .iter()
            .all(|token| normalized.iter().any(|field| field.contains(token.as_str())))
    }
}

/// True when the term is a bare numeric code ("044", "70448801")
pub fn is_numeric_code(term: &str) -> bool {
    let trimmed = term.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit())
}
