use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Reliability weight for records produced by render-or-fetch + heuristic
/// table parsing. Reserved for reconciling several extraction strategies.
pub const EXTRACTION_CONFIDENCE: f64 = 0.9;

// ── Scraped ticker ────────────────────────────────────────────────────────────

/// One company's price snapshot as recovered from an exchange listing page.
///
/// Built once through [`ScrapedTickerRecord::new`], which applies every
/// default; there is no way to mutate a record afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapedTickerRecord {
    symbol: String,
    name: String,
    price: Decimal,
    previous_close: Decimal,
    day_open: Decimal,
    day_high: Decimal,
    day_low: Decimal,
    volume: u64,
    timestamp: DateTime<Utc>,
    source: String,        // "<site-identifier>/<exchange-code>"
    confidence: f64,
}

impl ScrapedTickerRecord {
    /// Listing pages expose a single current price, so open/high/low all
    /// start out equal to it. `previous_close` is `price - change` when a
    /// change value was found; `None` when that subtraction overflows.
    pub fn new(
        symbol: impl Into<String>,
        name: Option<String>,
        price: Decimal,
        change: Option<Decimal>,
        volume: Option<u64>,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Option<Self> {
        let symbol = symbol.into();
        let previous_close = match change {
            Some(c) => price.checked_sub(c)?,
            None => price,
        };
        Some(Self {
            name: name.unwrap_or_else(|| symbol.clone()),
            symbol,
            price,
            previous_close,
            day_open: price,
            day_high: price,
            day_low: price,
            volume: volume.unwrap_or(0),
            timestamp,
            source: source.into(),
            confidence: EXTRACTION_CONFIDENCE,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn previous_close(&self) -> Decimal {
        self.previous_close
    }

    pub fn day_open(&self) -> Decimal {
        self.day_open
    }

    pub fn day_high(&self) -> Decimal {
        self.day_high
    }

    pub fn day_low(&self) -> Decimal {
        self.day_low
    }

    pub fn volume(&self) -> u64 {
        self.volume
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Exchange code carried in `source`: the segment after the last `/`.
    pub fn exchange_code(&self) -> &str {
        exchange_code_of(&self.source)
    }
}

/// Build the provenance string stamped on every record.
pub fn source_tag(site_id: &str, exchange_code: &str) -> String {
    format!("{}/{}", site_id, exchange_code)
}

pub fn exchange_code_of(source: &str) -> &str {
    source.rsplit('/').next().unwrap_or(source)
}

// ── Exchange registry handle ──────────────────────────────────────────────────

/// Registry entry for a known exchange, as resolved by the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExchangeRef {
    pub id: i64,
    pub code: String,
    pub name: String,
}

// ── Raw table cells ───────────────────────────────────────────────────────────

/// Text of one table cell, plus the text of its first hyperlink if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cell {
    pub text: String,
    pub link_text: Option<String>,
}

impl Cell {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), link_text: None }
    }

    pub fn with_link(text: impl Into<String>, link_text: impl Into<String>) -> Self {
        Self { text: text.into(), link_text: Some(link_text.into()) }
    }
}
