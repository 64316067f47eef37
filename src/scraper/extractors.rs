//! Field extractors: each one recovers a single field from a row's cells.
//!
//! Cells are scanned in order and the first one that parses wins. A cell
//! that does not fit a field is skipped, never an error.

use crate::models::Cell;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Smallest integer accepted as a traded volume; keeps rankings and other
/// small incidental numbers out.
pub const MIN_VOLUME: u64 = 100;

const SYMBOL_SCAN: usize = 2;
const NAME_SCAN: usize = 3;
const NAME_MIN_CHARS: usize = 7;

// ── Symbol ────────────────────────────────────────────────────────────────────

/// 2–6 ASCII letters after trimming and upper-casing.
pub fn parse_symbol(text: &str) -> Option<String> {
    let candidate = text.trim().to_uppercase();
    let ok = (2..=6).contains(&candidate.len())
        && candidate.chars().all(|c| c.is_ascii_uppercase());
    ok.then_some(candidate)
}

/// "AGL" | <a>agl</a> → "AGL". Only the first two cells are considered.
pub fn extract_symbol(cells: &[Cell]) -> Option<String> {
    cells.iter().take(SYMBOL_SCAN).find_map(|cell| {
        parse_symbol(&cell.text).or_else(|| cell.link_text.as_deref().and_then(parse_symbol))
    })
}

// ── Name ──────────────────────────────────────────────────────────────────────

fn is_numeric_noise(text: &str) -> bool {
    text.chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+' | '%' | '$' | 'R'))
}

/// First text among the first three cells that is longer than six
/// characters and is not just digits, punctuation or currency marks.
pub fn extract_name(cells: &[Cell]) -> Option<String> {
    cells.iter().take(NAME_SCAN).find_map(|cell| {
        let text = cell.text.trim();
        (text.chars().count() >= NAME_MIN_CHARS && !is_numeric_noise(text))
            .then(|| text.to_string())
    })
}

// ── Price ─────────────────────────────────────────────────────────────────────

/// Resolve thousands vs decimal separators: when both appear the later one
/// is the decimal point, a lone comma is a decimal comma.
fn normalise_separators(s: &str) -> String {
    match (s.rfind(','), s.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (Some(_), None) => s.replace(',', "."),
        _ => s.to_string(),
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.strip_prefix('+').unwrap_or(s);
    Decimal::from_str(s).ok()
}

/// "R 532.10" → 532.10 | "1,234.56" → 1234.56 | "1.234,56" → 1234.56.
/// Zero, negative and non-numeric text yield `None`.
pub fn parse_price(text: &str) -> Option<Decimal> {
    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
        .collect();
    let value = parse_decimal(&normalise_separators(&kept))?;
    (value > Decimal::ZERO).then_some(value)
}

pub fn extract_price(cells: &[Cell]) -> Option<Decimal> {
    cells.iter().find_map(|cell| parse_price(&cell.text))
}

// ── Change ────────────────────────────────────────────────────────────────────

/// Only signed or percentage cells count as a change: "+1.25%" → 1.25,
/// "-0,40" → -0.40.
pub fn parse_change(text: &str) -> Option<Decimal> {
    let text = text.trim();
    if !(text.contains('%') || text.starts_with('+') || text.starts_with('-')) {
        return None;
    }
    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    parse_decimal(&kept)
}

pub fn extract_change(cells: &[Cell]) -> Option<Decimal> {
    cells.iter().find_map(|cell| parse_change(&cell.text))
}

// ── Volume ────────────────────────────────────────────────────────────────────

/// "1,245,000 shares" → 1245000. Everything but digits and the decimal
/// point is dropped; what remains must be a whole number of at
/// least [`MIN_VOLUME`], so prices such as "532.10" are not volumes.
pub fn parse_volume(text: &str) -> Option<u64> {
    let digits: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let volume: u64 = digits.parse().ok()?;
    (volume >= MIN_VOLUME).then_some(volume)
}

pub fn extract_volume(cells: &[Cell]) -> Option<u64> {
    cells.iter().find_map(|cell| parse_volume(&cell.text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn cells(texts: &[&str]) -> Vec<Cell> {
        texts.iter().map(|t| Cell::new(*t)).collect()
    }

    #[test]
    fn test_parse_symbol() {
        assert_eq!(parse_symbol(" agl "), Some("AGL".into()));
        assert_eq!(parse_symbol("NPN"), Some("NPN".into()));
        assert_eq!(parse_symbol("A"), None);
        assert_eq!(parse_symbol("TOOLONG"), None);
        assert_eq!(parse_symbol("AB1"), None);
        assert_eq!(parse_symbol("Anglo American"), None);
    }

    #[test]
    fn symbol_only_from_first_two_cells() {
        assert_eq!(extract_symbol(&cells(&["1", "SBK", "x"])), Some("SBK".into()));
        assert_eq!(extract_symbol(&cells(&["1", "2", "SBK"])), None);
    }

    #[test]
    fn symbol_from_link_text() {
        let row = vec![Cell::with_link("SOL ▲", "sol"), Cell::new("Sasol Ltd")];
        assert_eq!(extract_symbol(&row), Some("SOL".into()));
    }

    #[test]
    fn test_extract_name() {
        assert_eq!(
            extract_name(&cells(&["AGL", "Anglo American Ltd", "R 532.10"])),
            Some("Anglo American Ltd".into())
        );
        // numeric noise and short strings are rejected
        assert_eq!(extract_name(&cells(&["AGL", "1,234.56", "Sasol"])), None);
        assert_eq!(extract_name(&cells(&["A", "B", "C", "Fourth column name"])), None);
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("1,234.56"), Some(dec!(1234.56)));
        assert_eq!(parse_price("1.234,56"), Some(dec!(1234.56)));
        assert_eq!(parse_price("532,10"), Some(dec!(532.10)));
        assert_eq!(parse_price("R 532.10"), Some(dec!(532.10)));
        assert_eq!(parse_price("N/A"), None);
        assert_eq!(parse_price("0.00"), None);
        assert_eq!(parse_price("-3.50"), None);
        assert_eq!(parse_price("AGL"), None);
    }

    #[test]
    fn price_skips_malformed_cells() {
        assert_eq!(extract_price(&cells(&["ABC", "N/A", "12.5"])), Some(dec!(12.5)));
    }

    #[test]
    fn test_parse_change() {
        assert_eq!(parse_change("+1.25%"), Some(dec!(1.25)));
        assert_eq!(parse_change("-0,40"), Some(dec!(-0.40)));
        assert_eq!(parse_change("2.5%"), Some(dec!(2.5)));
        assert_eq!(parse_change("532.10"), None);
        assert_eq!(parse_change("%"), None);
    }

    #[test]
    fn test_parse_volume() {
        assert_eq!(parse_volume("1,245,000"), Some(1_245_000));
        assert_eq!(parse_volume("12 500"), Some(12_500));
        assert_eq!(parse_volume("99"), None);
        assert_eq!(parse_volume("R 532.10"), None);
        assert_eq!(parse_volume("+1.25%"), None);
        assert_eq!(parse_volume("1,245,000 shares"), Some(1_245_000));
        assert_eq!(parse_volume("12,34"), Some(1_234));
        assert_eq!(parse_volume("3 100.50"), None);
        assert_eq!(parse_volume("Anglo American"), None);
    }

    #[test]
    fn volume_skips_small_numbers() {
        assert_eq!(extract_volume(&cells(&["7", "AGL", "3,400"])), Some(3_400));
        assert_eq!(extract_volume(&cells(&["7", "AGL"])), None);
    }
}
