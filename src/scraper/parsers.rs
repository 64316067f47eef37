use crate::models::{Cell, ScrapedTickerRecord};
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};

use super::extractors::{extract_change, extract_name, extract_price, extract_symbol, extract_volume};

/// Header words that mark a table as a price listing rather than layout
/// or navigation.
pub const HEADER_KEYWORDS: [&str; 5] = ["symbol", "code", "price", "share", "stock"];

/// Provenance and capture time shared by every row of one page.
#[derive(Debug, Clone)]
pub struct RowContext {
    pub source: String,
    pub captured_at: DateTime<Utc>,
}

// ── Row ───────────────────────────────────────────────────────────────────────

/// One table row → one record, or `None` when symbol or price is missing
/// or the change cannot be taken off the price.
pub fn parse_row(cells: &[Cell], ctx: &RowContext) -> Option<ScrapedTickerRecord> {
    let symbol = extract_symbol(cells)?;
    let price = extract_price(cells)?;

    ScrapedTickerRecord::new(
        symbol,
        extract_name(cells),
        price,
        extract_change(cells),
        extract_volume(cells),
        ctx.source.clone(),
        ctx.captured_at,
    )
}

// ── Table ─────────────────────────────────────────────────────────────────────

pub fn is_data_table(header_text: &str) -> bool {
    let header = header_text.to_lowercase();
    HEADER_KEYWORDS.iter().any(|k| header.contains(k))
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn row_cells(tr: ElementRef<'_>, cell_sel: &Selector, link_sel: &Selector) -> Vec<Cell> {
    tr.select(cell_sel)
        .map(|td| Cell {
            text: element_text(td),
            link_text: td.select(link_sel).next().map(element_text),
        })
        .collect()
}

/// Header text of a table: its `<th>` cells, or the first row when the
/// table has none.
fn header_text(table: ElementRef<'_>, th_sel: &Selector, tr_sel: &Selector) -> String {
    let from_th: Vec<String> = table.select(th_sel).map(element_text).collect();
    if !from_th.is_empty() {
        return from_th.join(" ");
    }
    table
        .select(tr_sel)
        .next()
        .map(element_text)
        .unwrap_or_default()
}

/// Every accepted table contributes one record per parseable row; the
/// first row of each table is treated as its header.
pub fn parse_tables(doc: &Html, ctx: &RowContext) -> Vec<ScrapedTickerRecord> {
    let Ok(table_sel) = Selector::parse("table") else { return vec![] };
    let Ok(th_sel) = Selector::parse("th") else { return vec![] };
    let Ok(tr_sel) = Selector::parse("tr") else { return vec![] };
    let Ok(cell_sel) = Selector::parse("td, th") else { return vec![] };
    let Ok(link_sel) = Selector::parse("a") else { return vec![] };

    let mut records = Vec::new();

    for table in doc.select(&table_sel) {
        if !is_data_table(&header_text(table, &th_sel, &tr_sel)) {
            continue;
        }

        records.extend(
            table
                .select(&tr_sel)
                .skip(1)
                .map(|tr| row_cells(tr, &cell_sel, &link_sel))
                .filter_map(|cells| parse_row(&cells, ctx)),
        );
    }

    records
}

pub fn parse_listing_page(html: &str, ctx: &RowContext) -> Vec<ScrapedTickerRecord> {
    let doc = Html::parse_document(html);
    parse_tables(&doc, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ctx() -> RowContext {
        RowContext {
            source: "african-markets/JSE".into(),
            captured_at: DateTime::from_timestamp(1_760_000_000, 0).unwrap(),
        }
    }

    fn cells(texts: &[&str]) -> Vec<Cell> {
        texts.iter().map(|t| Cell::new(*t)).collect()
    }

    #[test]
    fn end_to_end_row() {
        let row = cells(&["AGL", "Anglo American Ltd", "R 532.10", "+1.25%", "1,245,000"]);
        let r = parse_row(&row, &ctx()).unwrap();
        assert_eq!(r.symbol(), "AGL");
        assert_eq!(r.name(), "Anglo American Ltd");
        assert_eq!(r.price(), dec!(532.10));
        assert_eq!(r.previous_close(), dec!(530.85));
        assert_eq!(r.volume(), 1_245_000);
        assert_eq!(r.confidence(), 0.9);
        assert_eq!(r.exchange_code(), "JSE");
    }

    #[test]
    fn row_without_price_is_dropped() {
        let row = cells(&["AGL", "Anglo American Ltd", "N/A", "n/a"]);
        assert!(parse_row(&row, &ctx()).is_none());
    }

    #[test]
    fn row_without_symbol_is_dropped() {
        let row = cells(&["1", "Anglo American Ltd", "532.10"]);
        assert!(parse_row(&row, &ctx()).is_none());
    }

    #[test]
    fn lower_case_symbol_is_normalised() {
        let r = parse_row(&cells(&["npn", "3,100.00"]), &ctx()).unwrap();
        assert_eq!(r.symbol(), "NPN");
        assert_eq!(r.name(), "NPN");
        assert_eq!(r.previous_close(), dec!(3100.00));
        assert_eq!(r.volume(), 0);
    }

    #[test]
    fn test_is_data_table() {
        assert!(is_data_table("Company Symbol Price"));
        assert!(is_data_table("STOCK"));
        assert!(!is_data_table("Home About Contact"));
    }

    const PAGE: &str = r#"
        <html><body>
          <table id="nav">
            <tr><th>Menu</th><th>Links</th></tr>
            <tr><td>ABC</td><td>100.00</td></tr>
          </table>
          <table class="listing">
            <thead><tr><th>Symbol</th><th>Name</th><th>Price</th><th>Change</th><th>Volume</th></tr></thead>
            <tbody>
              <tr><td><a href="/agl">AGL</a></td><td>Anglo American Ltd</td><td>R 532.10</td><td>+1.25%</td><td>1,245,000</td></tr>
              <tr><td>SOL</td><td>Sasol Limited</td><td>N/A</td><td>-</td><td>-</td></tr>
              <tr><td>NPN</td><td>Naspers Limited</td><td>3 100.50</td><td>-2,5%</td><td>86 400</td></tr>
            </tbody>
          </table>
        </body></html>
    "#;

    #[test]
    fn parses_only_sniffed_tables() {
        let records = parse_listing_page(PAGE, &ctx());
        let symbols: Vec<&str> = records.iter().map(|r| r.symbol()).collect();
        assert_eq!(symbols, vec!["AGL", "NPN"]);

        let npn = &records[1];
        assert_eq!(npn.price(), dec!(3100.50));
        assert_eq!(npn.previous_close(), dec!(3103.00));
        assert_eq!(npn.volume(), 86_400);
    }

    #[test]
    fn overflowing_row_is_dropped() {
        let html = r#"<table>
            <tr><th>Symbol</th><th>Price</th><th>Change</th></tr>
            <tr><td>AGL</td><td>532.10</td><td>+1.25%</td></tr>
            <tr><td>BAD</td><td>79228162514264337593543950335</td><td>-79228162514264337593543950335</td></tr>
        </table>"#;
        let records = parse_listing_page(html, &ctx());
        let symbols: Vec<&str> = records.iter().map(|r| r.symbol()).collect();
        assert_eq!(symbols, vec!["AGL"]);
    }

    #[test]
    fn table_without_keywords_contributes_nothing() {
        let html = r#"<table>
            <tr><th>Menu</th></tr>
            <tr><td>AGL</td><td>Anglo American Ltd</td><td>532.10</td></tr>
        </table>"#;
        assert!(parse_listing_page(html, &ctx()).is_empty());
    }

    #[test]
    fn headerless_table_uses_first_row() {
        let html = r#"<table>
            <tr><td>Code</td><td>Price</td></tr>
            <tr><td>ETI</td><td>24.00</td></tr>
        </table>"#;
        let records = parse_listing_page(html, &ctx());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].symbol(), "ETI");
    }
}
