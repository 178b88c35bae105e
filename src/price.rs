// 💲 Price Parser - locale-ambiguous numeric text → canonical decimal
//
// Provider price lists mix "1.234,50" (es-AR) with "1,234.50" (en-US),
// bare "200.000" (thousands) and "200,5" (decimal). Parsing never fails:
// unparseable text becomes 0 and the original text is kept for audit.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Currency markers stripped before parsing. Longest first so "U$S" is not
/// left as "US" after removing "$".
const CURRENCY_MARKERS: &[&str] = &["U$S", "US$", "USD", "ARS", "AR$", "$", "€", "£", "¥"];

// ============================================================================
// RAW PRICE
// ============================================================================

/// Price as it arrives from a source, before interpretation
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RawPrice {
    #[default]
    Empty,
    /// Already numeric (spreadsheet number cell, REAL/INTEGER column)
    Number(f64),
    Text(String),
}

impl From<&str> for RawPrice {
    fn from(s: &str) -> Self {
        RawPrice::Text(s.to_string())
    }
}

impl From<f64> for RawPrice {
    fn from(v: f64) -> Self {
        RawPrice::Number(v)
    }
}

impl From<Option<String>> for RawPrice {
    fn from(v: Option<String>) -> Self {
        match v {
            Some(s) => RawPrice::Text(s),
            None => RawPrice::Empty,
        }
    }
}

// ============================================================================
// PARSED PRICE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPrice {
    pub value: Decimal,
    /// Original text, set only when parsing failed
    pub error_text: Option<String>,
}

impl ParsedPrice {
    fn ok(value: Decimal) -> Self {
        ParsedPrice {
            value,
            error_text: None,
        }
    }

    fn failed(raw: impl Into<String>) -> Self {
        ParsedPrice {
            value: Decimal::ZERO,
            error_text: Some(raw.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_text.is_some()
    }

    /// Catalog prices are non-negative. A negative reading is kept as an
    /// audit failure instead of leaking into results.
    pub fn non_negative(self, raw: &RawPrice) -> Self {
        if self.value.is_sign_negative() && !self.value.is_zero() {
            let text = match raw {
                RawPrice::Text(s) => s.clone(),
                RawPrice::Number(v) => v.to_string(),
                RawPrice::Empty => String::new(),
            };
            return ParsedPrice::failed(text);
        }
        self
    }
}

// ============================================================================
// PARSER
// ============================================================================

/// Parse any raw price. Never panics, never returns an error.
pub fn parse(raw: &RawPrice) -> ParsedPrice {
    match raw {
        RawPrice::Empty => ParsedPrice::ok(Decimal::ZERO),
        RawPrice::Number(v) => match Decimal::from_f64(*v) {
            Some(d) => ParsedPrice::ok(d.normalize()),
            None => ParsedPrice::failed(v.to_string()),
        },
        RawPrice::Text(s) => parse_text(s),
    }
}

/// Parse price text using the separator heuristics
///
/// - `.` and `,` both present: the later one is the decimal separator
/// - only `,`: decimal separator
/// - only `.`: thousands separator when repeated, or when a single dot is
///   followed by exactly 3 digits; otherwise a decimal point
pub fn parse_text(raw: &str) -> ParsedPrice {
    let mut cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return ParsedPrice::ok(Decimal::ZERO);
    }

    let upper = cleaned.to_uppercase();
    for marker in CURRENCY_MARKERS {
        if upper.contains(marker) {
            cleaned = strip_marker(&cleaned, marker);
        }
    }

    let canonical = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        (Some(dot), Some(comma)) if dot > comma => cleaned.replace(',', ""),
        (Some(_), Some(_)) => cleaned.replace('.', "").replace(',', "."),
        (None, Some(_)) => cleaned.replace(',', "."),
        (Some(dot), None) => {
            let dots = cleaned.matches('.').count();
            let trailing = &cleaned[dot + 1..];
            let three_digits = trailing.len() == 3 && trailing.chars().all(|c| c.is_ascii_digit());
            if dots > 1 || three_digits {
                cleaned.replace('.', "")
            } else {
                cleaned
            }
        }
        (None, None) => cleaned,
    };

    match Decimal::from_str(&canonical) {
        Ok(d) => ParsedPrice::ok(d.normalize()),
        Err(_) => ParsedPrice::failed(raw),
    }
}

fn strip_marker(s: &str, marker: &str) -> String {
    // ASCII markers are matched case-insensitively ("u$s", "ars")
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while !rest.is_empty() {
        if rest.len() >= marker.len()
            && rest.is_char_boundary(marker.len())
            && rest[..marker.len()].eq_ignore_ascii_case(marker)
        {
            rest = &rest[marker.len()..];
            continue;
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn text(s: &str) -> ParsedPrice {
        parse(&RawPrice::from(s))
    }

    #[test]
    fn test_single_dot_with_three_digits_is_thousands() {
        assert_eq!(text("200.000"), ParsedPrice::ok(dec("200000")));
    }

    #[test]
    fn test_single_comma_is_decimal() {
        assert_eq!(text("200,50"), ParsedPrice::ok(dec("200.50")));
    }

    #[test]
    fn test_later_separator_wins() {
        assert_eq!(text("200.000,75"), ParsedPrice::ok(dec("200000.75")));
        assert_eq!(text("200,000.75"), ParsedPrice::ok(dec("200000.75")));
        assert_eq!(text("1.234.567,8"), ParsedPrice::ok(dec("1234567.8")));
    }

    #[test]
    fn test_dot_rules() {
        // repeated dots are thousands separators
        assert_eq!(text("1.234.567"), ParsedPrice::ok(dec("1234567")));
        // single dot, not three trailing digits → decimal point
        assert_eq!(text("12.5"), ParsedPrice::ok(dec("12.5")));
        assert_eq!(text("12.50"), ParsedPrice::ok(dec("12.50")));
        assert_eq!(text("0.1234"), ParsedPrice::ok(dec("0.1234")));
    }

    #[test]
    fn test_empty_is_zero_without_error() {
        assert_eq!(text(""), ParsedPrice::ok(Decimal::ZERO));
        assert_eq!(text("   "), ParsedPrice::ok(Decimal::ZERO));
        assert_eq!(parse(&RawPrice::Empty), ParsedPrice::ok(Decimal::ZERO));
    }

    #[test]
    fn test_garbage_keeps_original_text() {
        let parsed = text("abc");
        assert_eq!(parsed.value, Decimal::ZERO);
        assert_eq!(parsed.error_text.as_deref(), Some("abc"));
        assert!(parsed.is_error());

        let parsed = text("consultar");
        assert_eq!(parsed.error_text.as_deref(), Some("consultar"));
    }

    #[test]
    fn test_currency_symbols_and_spaces_are_stripped() {
        assert_eq!(text("$ 1.500,00"), ParsedPrice::ok(dec("1500")));
        assert_eq!(text("U$S 12,5"), ParsedPrice::ok(dec("12.5")));
        assert_eq!(text("ars 3.000"), ParsedPrice::ok(dec("3000")));
        assert_eq!(text("AR$ 1.500"), ParsedPrice::ok(dec("1500")));
        assert_eq!(text("ar$1.250,50"), ParsedPrice::ok(dec("1250.50")));
        assert_eq!(text("€9,99"), ParsedPrice::ok(dec("9.99")));
        assert_eq!(text("1\u{a0}250,00"), ParsedPrice::ok(dec("1250")));
    }

    #[test]
    fn test_numeric_passthrough() {
        assert_eq!(parse(&RawPrice::Number(1520.75)), ParsedPrice::ok(dec("1520.75")));
        assert_eq!(parse(&RawPrice::Number(3.0)), ParsedPrice::ok(dec("3")));
        assert!(parse(&RawPrice::Number(f64::NAN)).is_error());
    }

    #[test]
    fn test_negative_reading_is_an_audit_failure() {
        let raw = RawPrice::from("-15,00");
        let parsed = parse(&raw).non_negative(&raw);
        assert_eq!(parsed.value, Decimal::ZERO);
        assert_eq!(parsed.error_text.as_deref(), Some("-15,00"));

        let raw = RawPrice::from("15,00");
        assert_eq!(parse(&raw).non_negative(&raw), ParsedPrice::ok(dec("15")));
    }
}
