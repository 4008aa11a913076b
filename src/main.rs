mod config;
mod factors;
mod loader;
mod market;
mod models;
mod pipeline;
mod report;
mod scraper;
mod storage;
mod utils;
mod valuation;

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{AppConfig, load_universe, normalise_ticker};
use crate::loader::{discover_csv_files, load_csv};
use crate::market::YahooClient;
use crate::pipeline::{Pacing, Pipeline};
use crate::report::{Email, Mailer};
use crate::scraper::{ChromeRenderer, ForwardPeScraper};
use crate::storage::{Repository, Table};

#[derive(Parser)]
#[command(name = "valuation", about = "Equity valuation ETL and email reports", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Factor report over the daily price bundle for END_DATE (YYYY-MM-DD)
    DailyReport {
        end_date: NaiveDate,
    },

    /// Email latest forward-price bands against live quotes
    ForwardReport {
        /// Add growth, PEG and the analyst-EPS price band
        #[arg(long)]
        extended: bool,
    },

    /// Fetch EPS and valuation inputs for the universe into stock_financial_data
    IngestEps {
        /// Create the table and exit
        #[arg(long)]
        create_table: bool,
    },

    /// Scrape quarterly forward P/E history into stock_forward_pe_history
    ScrapeForwardPe {
        /// Single ticker; defaults to the configured universe
        ticker: Option<String>,

        /// Create the table and exit
        #[arg(long)]
        create_table: bool,
    },

    /// Bulk-load daily OHLCV CSV files into the price bundle
    LoadCsv {
        /// Directory containing CSV files
        #[arg(short, long, default_value = "data")]
        dir: PathBuf,
    },

    /// Show database statistics
    Stats,
}

/// Sending is best effort: a failure is logged and the run still succeeds.
async fn deliver(mailer: &Mailer, email: &Email) {
    if let Err(e) = mailer.send(email).await {
        error!("Error sending email: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "valuation=info,warn",
        1 => "valuation=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;
    let today = Local::now().date_naive();

    match cli.command {
        Command::DailyReport { end_date } => {
            let _t = utils::Timer::start("Daily factor report");
            let repo = Repository::open(&config.store.db_path)?;
            repo.create_price_bundle_table()?;

            let from = end_date - Duration::days(factors::HISTORY_LOOKBACK_DAYS);
            let bars = repo.bars_between(from, end_date)?;
            info!("Loaded {} bars from {} to {}", bars.len(), from, end_date);

            let table = factors::evaluate(&bars, end_date, &config.report)
                .context("Factor evaluation failed")?;
            let rows = report::end_of_day(table, end_date);
            info!("{} assets on {}", rows.len(), end_date);

            report::snapshot::write_parquet(&rows, &config.report.snapshot_path)?;
            deliver(&Mailer::new(&config.email), &report::daily_email(&rows, end_date)).await;
        }

        Command::ForwardReport { extended } => {
            let _t = utils::Timer::start("Forward price report");
            let repo = Repository::open(&config.store.db_path)?;
            repo.create_financial_data_table()?;
            let yahoo = YahooClient::new(&config.yahoo).context("Failed to build Yahoo client")?;

            let email = if extended {
                let estimates = repo.latest_extended_estimates()?;
                if estimates.is_empty() {
                    info!("No data found in stock_financial_data. Exiting.");
                    return Ok(());
                }
                let rows = report::quote_extended(&yahoo, estimates).await;
                report::extended_email(&rows, today)
            } else {
                let estimates = repo.latest_forward_price_estimates()?;
                if estimates.is_empty() {
                    info!("No data found in stock_financial_data. Exiting.");
                    return Ok(());
                }
                let rows = report::quote_estimates(&yahoo, estimates).await;
                report::forward_email(&rows, today)
            };

            deliver(&Mailer::new(&config.email), &email).await;
        }

        Command::IngestEps { create_table } => {
            let repo = Repository::open(&config.store.db_path)?;
            repo.create_financial_data_table()?;
            if create_table {
                return Ok(());
            }
            repo.create_forward_pe_history_table()?;

            let _t = utils::Timer::start("EPS ingestion");
            let tickers = load_universe(&config.universe)?;
            let yahoo = YahooClient::new(&config.yahoo).context("Failed to build Yahoo client")?;

            let stats = Pipeline::new(&repo)
                .ingest_eps(&yahoo, &tickers, &config.yahoo.pe_lookback, today)
                .await?;
            info!(
                "Done: {} tickers, {} rows, {} errors",
                stats.tickers_processed, stats.rows_written, stats.errors
            );
        }

        Command::ScrapeForwardPe { ticker, create_table } => {
            let repo = Repository::open(&config.store.db_path)?;
            repo.create_forward_pe_history_table()?;
            if create_table {
                return Ok(());
            }

            let _t = utils::Timer::start("Forward P/E scrape");
            let tickers = match ticker {
                Some(t) => vec![normalise_ticker(&t)],
                None => load_universe(&config.universe)?,
            };
            if tickers.is_empty() {
                warn!("No tickers to scrape");
                return Ok(());
            }

            let scraper = ForwardPeScraper::new(ChromeRenderer::new(&config.scraper), &config.scraper);
            let pacing = Pacing {
                min_ms: config.scraper.between_tickers_min_ms,
                max_ms: config.scraper.between_tickers_max_ms,
            };
            let stats = Pipeline::new(&repo)
                .scrape_forward_pe(&scraper, &tickers, pacing)
                .await?;
            info!(
                "Done: {} tickers, {} rows, {} errors",
                stats.tickers_processed, stats.rows_written, stats.errors
            );
        }

        Command::LoadCsv { dir } => {
            let _t = utils::Timer::start("CSV bulk load");
            let repo = Repository::open(&config.store.db_path)?;
            repo.create_price_bundle_table()?;

            let files = discover_csv_files(&dir)?;
            info!("Found {} CSV files in {:?}", files.len(), dir);

            let mut total_bars = 0usize;
            let mut errors = 0usize;

            for path in &files {
                match load_csv(path) {
                    Ok((symbol, bars)) => {
                        total_bars += repo
                            .upsert_daily_bars(&bars)
                            .with_context(|| format!("Failed to store bars for {}", symbol))?;
                    }
                    Err(e) => {
                        warn!("Error loading {:?}: {:#}", path, e);
                        errors += 1;
                    }
                }
            }

            info!("Done: {} bars upserted, {} errors", total_bars, errors);
        }

        Command::Stats => {
            let repo = Repository::open(&config.store.db_path)?;
            repo.create_price_bundle_table()?;
            repo.create_financial_data_table()?;
            repo.create_forward_pe_history_table()?;

            println!("─────────────────────────────────────────────");
            println!("  Valuation store: {:?}", config.store.db_path);
            println!("─────────────────────────────────────────────");
            for table in Table::ALL {
                let rows = repo.row_count(table)?;
                let (min, max) = repo.date_range(table)?;
                println!(
                    "  {:<26} {:>10} rows  {} → {}",
                    table.name(),
                    utils::fmt_number(rows),
                    min.map(|d| d.to_string()).unwrap_or("—".into()),
                    max.map(|d| d.to_string()).unwrap_or("—".into()),
                );
            }
            println!("─────────────────────────────────────────────");
        }
    }

    Ok(())
}
