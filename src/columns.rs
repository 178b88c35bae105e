// 🧭 Column Resolver - heterogeneous header text → canonical roles
//
// Every provider names its columns differently: "Código", "COD. ART",
// "Descripción", "Detalle", "Precio Lista"... Aliases are compared
// normalized, exact match first, substring containment as fallback.

use crate::normalize::normalize;

/// Header words that identify a header row when the configured offset is wrong
pub const HEADER_HINTS: &[&str] = &[
    "codigo",
    "cod",
    "code",
    "articulo",
    "producto",
    "descripcion",
    "description",
    "detalle",
];

/// Resolve a role's column from header cells
///
/// Pass 1: normalized header == normalized alias.
/// Pass 2: normalized alias contained in normalized header.
/// Both passes scan left to right; empty headers and aliases never match.
pub fn resolve<S: AsRef<str>>(headers: &[String], aliases: &[S]) -> Option<usize> {
    let aliases: Vec<String> = aliases
        .iter()
        .map(|a| normalize(a.as_ref()))
        .filter(|a| !a.is_empty())
        .collect();
    if aliases.is_empty() {
        return None;
    }

    let headers: Vec<String> = headers.iter().map(|h| normalize(h)).collect();

    let exact = headers
        .iter()
        .position(|h| !h.is_empty() && aliases.iter().any(|a| h == a));
    if exact.is_some() {
        return exact;
    }

    headers
        .iter()
        .position(|h| !h.is_empty() && aliases.iter().any(|a| h.contains(a.as_str())))
}

// ============================================================================
// COLUMN ROLES
// ============================================================================

/// Resolved column indices for one sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRoles {
    pub code: Option<usize>,
    pub name: Option<usize>,
    pub price: Option<usize>,
}

impl ColumnRoles {
    pub fn resolve<S: AsRef<str>>(
        headers: &[String],
        code_aliases: &[S],
        name_aliases: &[S],
        price_aliases: &[S],
    ) -> Self {
        let code = resolve(headers, code_aliases);
        // The name column must not collapse onto the code column ("cod. descripcion")
        let name = resolve(headers, name_aliases).and_then(|n| {
            if Some(n) == code {
                resolve_excluding(headers, name_aliases, n)
            } else {
                Some(n)
            }
        });
        let price = resolve(headers, price_aliases);

        ColumnRoles { code, name, price }
    }

    /// Both identifying columns found (code + name)
    pub fn is_complete(&self) -> bool {
        self.code.is_some() && self.name.is_some()
    }
}

fn resolve_excluding<S: AsRef<str>>(headers: &[String], aliases: &[S], skip: usize) -> Option<usize> {
    let masked: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| if i == skip { String::new() } else { h.clone() })
        .collect();
    resolve(&masked, aliases)
}

/// Does this row look like a header? True when any cell equals or contains
/// one of the hint words (or a configured alias).
pub fn looks_like_header<S: AsRef<str>>(cells: &[String], extra_hints: &[S]) -> bool {
    let hints: Vec<String> = HEADER_HINTS
        .iter()
        .map(|h| h.to_string())
        .chain(extra_hints.iter().map(|h| normalize(h.as_ref())))
        .filter(|h| !h.is_empty())
        .collect();

    cells.iter().map(|c| normalize(c)).any(|cell| {
        !cell.is_empty()
            && cell
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| hints.iter().any(|h| word == h))
            || hints.iter().any(|h| h.contains(' ') && cell.contains(h.as_str()))
    })
}
