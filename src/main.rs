use afx_ingest::config::AppConfig;
use afx_ingest::pipeline::{Pipeline, resolve_targets};
use afx_ingest::storage::Repository;
use afx_ingest::utils::{self, Timer};
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "afx-ingest", about = "African exchange price listing scraper", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape listing pages and persist ticker snapshots
    Scrape {
        /// Exchange code (e.g. JSE); all configured exchanges when omitted
        #[arg(short, long, env = "AFX_EXCHANGE")]
        exchange: Option<String>,

        /// Scrape only, do not write to the database
        #[arg(long)]
        dry_run: bool,

        /// Print scraped records as JSON (implies --dry-run)
        #[arg(long)]
        json: bool,
    },

    /// List configured exchanges and their listing URLs
    Exchanges,

    /// Show stored tickers for one exchange
    Tickers {
        #[arg(short, long)]
        exchange: String,
    },

    /// Show database statistics
    Stats,

    /// Apply schema migrations and register configured exchanges
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "afx_ingest=info,warn",
        1 => "afx_ingest=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Scrape { exchange, dry_run, json } => {
            let _t = Timer::start("Scrape");
            let pipeline = Pipeline::new(config);

            if dry_run || json {
                let records = pipeline.scrape(exchange.as_deref()).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                } else {
                    info!("Dry run: {} records scraped", records.len());
                }
            } else {
                let stats = pipeline.run(exchange.as_deref()).await?;
                info!(
                    "Done: {} exchanges, {} scraped, {} persisted",
                    stats.exchanges, stats.records_scraped, stats.records_persisted
                );
            }
        }

        Command::Exchanges => {
            let targets = resolve_targets(&config.scraper.base_url, &config.exchanges)?;
            for t in &targets {
                println!("  {:<5} {:<40} {}", t.code, utils::fit(&t.name, 40), t.url);
            }
        }

        Command::Tickers { exchange } => {
            let repo = Repository::open(&config.storage.db_path)?;
            let tickers = repo.list_tickers(&exchange)?;
            if tickers.is_empty() {
                println!("No tickers for {} — run `afx-ingest scrape` first.", exchange);
            } else {
                println!("{} tickers on {}:", tickers.len(), exchange.to_uppercase());
                for t in &tickers {
                    println!(
                        "  {:<6} {:<32} {:>14} {:>14} {:>16}",
                        t.symbol,
                        utils::fit(&t.name, 32),
                        t.price,
                        t.previous_close,
                        utils::fmt_number(t.volume),
                    );
                }
            }
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let exchanges = repo.exchange_count()?;
            let tickers = repo.ticker_count()?;
            let last = repo.last_scrape_run()?;
            println!("─────────────────────────────────");
            println!("  AFX ingest — Database Stats");
            println!("─────────────────────────────────");
            println!("  Exchanges : {}", utils::fmt_number(exchanges));
            println!("  Tickers   : {}", utils::fmt_number(tickers));
            match last {
                Some(run) => {
                    println!("  Last run  : {} ({})", run.started_at, run.status);
                    println!("  Persisted : {} / {}",
                        utils::fmt_number(run.records_persisted),
                        utils::fmt_number(run.records_scraped));
                }
                None => println!("  Last run  : —"),
            }
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;
            let n = repo.register_exchanges(&config.exchanges)?;
            println!("Migrations applied, {} exchanges registered.", n);
        }
    }

    Ok(())
}
