pub mod grouper;

use crate::config::ExchangeConfig;
use crate::models::{ExchangeRef, ScrapedTickerRecord};
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use duckdb::{Connection, params};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

pub use self::grouper::{TickerStore, persist};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS seq_exchange_id START 1;
CREATE SEQUENCE IF NOT EXISTS seq_scrape_run_id START 1;

CREATE TABLE IF NOT EXISTS exchanges (
    id              BIGINT PRIMARY KEY DEFAULT nextval('seq_exchange_id'),
    code            VARCHAR NOT NULL UNIQUE,
    name            VARCHAR NOT NULL DEFAULT '',
    registered_at   TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS tickers (
    exchange_id     BIGINT   NOT NULL,
    symbol          VARCHAR  NOT NULL,
    name            VARCHAR  NOT NULL,
    price           DECIMAL(18,4) NOT NULL,
    previous_close  DECIMAL(18,4) NOT NULL,
    day_open        DECIMAL(18,4) NOT NULL,
    day_high        DECIMAL(18,4) NOT NULL,
    day_low         DECIMAL(18,4) NOT NULL,
    volume          BIGINT   NOT NULL DEFAULT 0,
    source          VARCHAR  NOT NULL,
    confidence      DOUBLE   NOT NULL,
    scraped_at      TIMESTAMP NOT NULL,
    updated_at      TIMESTAMP NOT NULL,
    PRIMARY KEY (exchange_id, symbol)
);

CREATE TABLE IF NOT EXISTS scrape_runs (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('seq_scrape_run_id'),
    started_at          TIMESTAMP NOT NULL,
    finished_at         TIMESTAMP,
    status              VARCHAR NOT NULL DEFAULT 'running',
    exchange            VARCHAR,
    records_scraped     BIGINT DEFAULT 0,
    records_persisted   BIGINT DEFAULT 0,
    error_msg           VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_tickers_symbol ON tickers (symbol);
"#;

/// DECIMAL(18,4) holds at most 14 integer digits.
fn max_storable() -> Decimal {
    Decimal::new(999_999_999_999_999_999, 4)
}

/// A ticker row as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTicker {
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
    pub previous_close: Decimal,
    pub volume: i64,
    pub scraped_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeRun {
    pub id: i64,
    pub started_at: NaiveDateTime,
    pub status: String,
    pub records_scraped: i64,
    pub records_persisted: i64,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Exchange registry ─────────────────────────────────────────────────────

    pub fn register_exchange(&self, code: &str, name: &str) -> Result<ExchangeRef> {
        let code = code.trim().to_uppercase();
        self.conn
            .execute(
                r#"INSERT INTO exchanges (code, name, registered_at) VALUES (?, ?, ?)
                   ON CONFLICT (code) DO UPDATE SET name = excluded.name"#,
                params![code, name, Utc::now().naive_utc()],
            )
            .with_context(|| format!("register exchange {}", code))?;

        self.find_exchange(&code)?
            .with_context(|| format!("exchange {} missing after insert", code))
    }

    pub fn register_exchanges(&self, exchanges: &[ExchangeConfig]) -> Result<usize> {
        for e in exchanges {
            self.register_exchange(&e.code, &e.name)?;
        }
        Ok(exchanges.len())
    }

    pub fn find_exchange(&self, code: &str) -> Result<Option<ExchangeRef>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, code, name FROM exchanges WHERE code = ?")?;
        let mut rows = stmt.query_map(params![code.trim().to_uppercase()], |r| {
            Ok(ExchangeRef { id: r.get(0)?, code: r.get(1)?, name: r.get(2)? })
        })?;
        Ok(rows.next().transpose()?)
    }

    pub fn exchange_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM exchanges")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    // ── Tickers ───────────────────────────────────────────────────────────────

    /// Upsert one exchange's records in a single transaction. Records the
    /// columns cannot hold are skipped; a repeated symbol keeps its last
    /// occurrence, and a record whose statement fails is left out while the
    /// rest of the group still commits. Returns the number of rows written.
    pub fn upsert_tickers(
        &self,
        exchange: &ExchangeRef,
        records: &[&ScrapedTickerRecord],
    ) -> Result<usize> {
        let mut latest: BTreeMap<&str, &ScrapedTickerRecord> = BTreeMap::new();
        for &r in records {
            latest.insert(r.symbol(), r);
        }
        if latest.len() < records.len() {
            debug!("{}: {} duplicate symbols collapsed", exchange.code, records.len() - latest.len());
        }

        let sql = r#"
            INSERT INTO tickers
                (exchange_id, symbol, name, price, previous_close, day_open, day_high, day_low,
                 volume, source, confidence, scraped_at, updated_at)
            VALUES (?, ?, ?,
                    CAST(? AS DECIMAL(18,4)), CAST(? AS DECIMAL(18,4)), CAST(? AS DECIMAL(18,4)),
                    CAST(? AS DECIMAL(18,4)), CAST(? AS DECIMAL(18,4)),
                    ?, ?, ?, ?, ?)
            ON CONFLICT (exchange_id, symbol) DO UPDATE SET
                price          = excluded.price,
                previous_close = excluded.previous_close,
                day_open       = excluded.day_open,
                day_high       = excluded.day_high,
                day_low        = excluded.day_low,
                volume         = excluded.volume,
                source         = excluded.source,
                confidence     = excluded.confidence,
                scraped_at     = excluded.scraped_at,
                updated_at     = excluded.updated_at
        "#;

        let now = Utc::now().naive_utc();
        let mut rows: Vec<(&ScrapedTickerRecord, i64)> = Vec::with_capacity(latest.len());
        for &r in latest.values() {
            match storable_volume(r) {
                Ok(volume) => rows.push((r, volume)),
                Err(e) => warn!("{}/{}: skipped: {:#}", exchange.code, r.symbol(), e),
            }
        }

        // DuckDB aborts the whole transaction on a failed statement and has
        // no savepoints, so the group is replayed without the failing record.
        loop {
            let tx = self.conn.unchecked_transaction()?;
            let mut failed = None;

            for (i, &(r, volume)) in rows.iter().enumerate() {
                let result = tx.execute(sql, params![
                    exchange.id, r.symbol(), r.name(),
                    r.price().to_string(), r.previous_close().to_string(),
                    r.day_open().to_string(), r.day_high().to_string(), r.day_low().to_string(),
                    volume, r.source(), r.confidence(),
                    r.timestamp().naive_utc(), now,
                ]);
                if let Err(e) = result {
                    warn!("{}/{}: upsert failed, skipped: {}", exchange.code, r.symbol(), e);
                    failed = Some(i);
                    break;
                }
            }

            match failed {
                Some(i) => {
                    tx.rollback()
                        .with_context(|| format!("roll back tickers for {}", exchange.code))?;
                    rows.remove(i);
                }
                None => {
                    tx.commit()
                        .with_context(|| format!("commit tickers for {}", exchange.code))?;
                    return Ok(rows.len());
                }
            }
        }
    }

    pub fn list_tickers(&self, exchange_code: &str) -> Result<Vec<StoredTicker>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT t.symbol, t.name, CAST(t.price AS VARCHAR), CAST(t.previous_close AS VARCHAR),
                      t.volume, t.scraped_at
               FROM tickers t JOIN exchanges e ON e.id = t.exchange_id
               WHERE e.code = ?
               ORDER BY t.symbol"#,
        )?;

        let rows: Vec<(String, String, String, String, i64, NaiveDateTime)> = stmt
            .query_map(params![exchange_code.trim().to_uppercase()], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
            })?
            .collect::<duckdb::Result<_>>()?;

        rows.into_iter()
            .map(|(symbol, name, price, prev, volume, scraped_at)| {
                Ok(StoredTicker {
                    price: Decimal::from_str(&price)
                        .with_context(|| format!("bad stored price for {}: {}", symbol, price))?,
                    previous_close: Decimal::from_str(&prev)
                        .with_context(|| format!("bad stored close for {}: {}", symbol, prev))?,
                    symbol,
                    name,
                    volume,
                    scraped_at,
                })
            })
            .collect()
    }

    pub fn ticker_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM tickers")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self, exchange: Option<&str>) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO scrape_runs (started_at, status, exchange) VALUES (?, 'running', ?) RETURNING id",
            params![Utc::now().naive_utc(), exchange],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(
        &self, run_id: i64, scraped: usize, persisted: usize, error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               records_scraped = ?, records_persisted = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                scraped as i64, persisted as i64, error, run_id,
            ],
        )?;
        Ok(())
    }

    pub fn last_scrape_run(&self) -> Result<Option<ScrapeRun>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT id, started_at, status, records_scraped, records_persisted
               FROM scrape_runs ORDER BY id DESC LIMIT 1"#,
        )?;
        let mut rows = stmt.query_map([], |r| {
            Ok(ScrapeRun {
                id: r.get(0)?,
                started_at: r.get(1)?,
                status: r.get(2)?,
                records_scraped: r.get(3)?,
                records_persisted: r.get(4)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }
}

fn storable_volume(r: &ScrapedTickerRecord) -> Result<i64> {
    let max = max_storable();
    for (field, value) in [
        ("price", r.price()),
        ("previous_close", r.previous_close()),
        ("day_high", r.day_high()),
    ] {
        if value.abs() > max {
            anyhow::bail!("{} {} exceeds DECIMAL(18,4)", field, value);
        }
    }
    i64::try_from(r.volume()).with_context(|| format!("volume {} exceeds BIGINT", r.volume()))
}

impl TickerStore for Repository {
    fn resolve_exchange(&self, code: &str) -> Result<Option<ExchangeRef>> {
        self.find_exchange(code)
    }

    fn upsert_group(&self, exchange: &ExchangeRef, records: &[&ScrapedTickerRecord]) -> Result<usize> {
        self.upsert_tickers(exchange, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use rust_decimal_macros::dec;

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn record(symbol: &str, price: Decimal, change: Option<Decimal>, volume: u64) -> ScrapedTickerRecord {
        ScrapedTickerRecord::new(
            symbol,
            None,
            price,
            change,
            Some(volume),
            "african-markets/JSE",
            DateTime::from_timestamp(1_760_000_000, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn migrations_are_idempotent() {
        let repo = repo();
        repo.run_migrations().unwrap();
        assert_eq!(repo.ticker_count().unwrap(), 0);
    }

    #[test]
    fn registry_lookup() {
        let repo = repo();
        let jse = repo.register_exchange("jse", "Johannesburg").unwrap();
        assert_eq!(jse.code, "JSE");
        assert_eq!(repo.find_exchange("JSE").unwrap(), Some(jse.clone()));
        assert_eq!(repo.find_exchange("zse").unwrap(), None);

        // re-registering keeps the id
        let again = repo.register_exchange("JSE", "Johannesburg Stock Exchange").unwrap();
        assert_eq!(again.id, jse.id);
        assert_eq!(repo.exchange_count().unwrap(), 1);
    }

    #[test]
    fn upsert_updates_in_place() {
        let repo = repo();
        let jse = repo.register_exchange("JSE", "Johannesburg").unwrap();

        let first = record("AGL", dec!(532.10), Some(dec!(1.25)), 1_245_000);
        assert_eq!(repo.upsert_tickers(&jse, &[&first]).unwrap(), 1);

        let second = record("AGL", dec!(540.00), None, 2_000);
        assert_eq!(repo.upsert_tickers(&jse, &[&second]).unwrap(), 1);

        let stored = repo.list_tickers("jse").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].price, dec!(540.00));
        assert_eq!(stored[0].previous_close, dec!(540.00));
        assert_eq!(stored[0].volume, 2_000);
    }

    #[test]
    fn unstorable_record_is_skipped() {
        let repo = repo();
        let jse = repo.register_exchange("JSE", "Johannesburg").unwrap();
        let ok = record("AGL", dec!(532.10), None, 100);
        let huge = record("BIG", dec!(1000000000000000), None, 100);

        assert_eq!(repo.upsert_tickers(&jse, &[&ok, &huge]).unwrap(), 1);
        assert_eq!(repo.ticker_count().unwrap(), 1);
    }

    #[test]
    fn failed_statement_skips_only_that_record() {
        let repo = repo();
        let jse = repo.register_exchange("JSE", "Johannesburg").unwrap();
        repo.conn
            .execute_batch("DROP INDEX IF EXISTS idx_tickers_symbol; DROP TABLE tickers;")
            .unwrap();
        repo.conn
            .execute_batch(&DDL.replace(
                "PRIMARY KEY (exchange_id, symbol)",
                "PRIMARY KEY (exchange_id, symbol),\n    CHECK (symbol <> 'BAD')",
            ))
            .unwrap();

        let sol = record("SOL", dec!(100), None, 100);
        assert_eq!(repo.upsert_tickers(&jse, &[&sol]).unwrap(), 1);

        let agl = record("AGL", dec!(532.10), None, 100);
        let bad = record("BAD", dec!(1), None, 100);
        let npn = record("NPN", dec!(3100.50), None, 100);
        assert_eq!(repo.upsert_tickers(&jse, &[&agl, &bad, &npn]).unwrap(), 2);

        let stored: Vec<String> = repo.list_tickers("JSE").unwrap().into_iter().map(|t| t.symbol).collect();
        assert_eq!(stored, vec!["AGL", "NPN", "SOL"]);
    }

    #[test]
    fn duplicate_symbols_keep_last() {
        let repo = repo();
        let jse = repo.register_exchange("JSE", "Johannesburg").unwrap();
        let a = record("SOL", dec!(100), None, 100);
        let b = record("SOL", dec!(101), None, 100);

        assert_eq!(repo.upsert_tickers(&jse, &[&a, &b]).unwrap(), 1);
        assert_eq!(repo.list_tickers("JSE").unwrap()[0].price, dec!(101));
    }

    #[test]
    fn scrape_run_log() {
        let repo = repo();
        let id = repo.begin_scrape_run(None).unwrap();
        repo.finish_scrape_run(id, 12, 10, None).unwrap();

        let run = repo.last_scrape_run().unwrap().unwrap();
        assert_eq!(run.id, id);
        assert_eq!(run.status, "success");
        assert_eq!(run.records_persisted, 10);
    }
}
