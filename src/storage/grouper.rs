//! Splits a scrape run's records by exchange and persists each group on
//! its own, so one unknown exchange or failed transaction never blocks
//! the rest.

use crate::models::{ExchangeRef, ScrapedTickerRecord};
use anyhow::Result;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// Storage the grouper writes through: an exchange registry plus a
/// transactional upsert keyed by `(symbol, exchange)`.
pub trait TickerStore {
    fn resolve_exchange(&self, code: &str) -> Result<Option<ExchangeRef>>;

    /// Write one exchange's records atomically; returns rows written.
    fn upsert_group(&self, exchange: &ExchangeRef, records: &[&ScrapedTickerRecord]) -> Result<usize>;
}

/// Records keyed by the exchange code in their `source`.
pub fn group_by_exchange(records: &[ScrapedTickerRecord]) -> BTreeMap<&str, Vec<&ScrapedTickerRecord>> {
    let mut groups: BTreeMap<&str, Vec<&ScrapedTickerRecord>> = BTreeMap::new();
    for r in records {
        groups.entry(r.exchange_code()).or_default().push(r);
    }
    groups
}

/// Persist every group whose exchange resolves. Returns records written.
pub fn persist<S: TickerStore + ?Sized>(store: &S, records: &[ScrapedTickerRecord]) -> usize {
    let mut persisted = 0usize;

    for (code, group) in group_by_exchange(records) {
        let exchange = match store.resolve_exchange(code) {
            Ok(Some(exchange)) => exchange,
            Ok(None) => {
                warn!("{}: unknown exchange, {} records skipped", code, group.len());
                continue;
            }
            Err(e) => {
                warn!("{}: exchange lookup failed, {} records skipped: {:#}", code, group.len(), e);
                continue;
            }
        };

        match store.upsert_group(&exchange, &group) {
            Ok(n) => {
                info!("{}: persisted {}/{} records", code, n, group.len());
                persisted += n;
            }
            Err(e) => error!("{}: group rolled back: {:#}", code, e),
        }
    }

    persisted
}
