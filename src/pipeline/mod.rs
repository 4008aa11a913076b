//! ETL phases that write to the store.
//!
//! ## Phases
//!
//! `ingest_eps()`: one valuation snapshot per ticker for today's date.
//!   Tickers are processed one at a time. A ticker whose key statistics cannot
//!   be fetched is dropped; every other missing input becomes a NULL column.
//!   The batch replaces whatever was stored for today (delete, then insert).
//!
//! `scrape_forward_pe()`: quarterly forward P/E history per ticker, appended
//!   to the history table and compacted once at the end so the latest scrape
//!   of each (ticker, month) wins.

use crate::market::{FetchError, FundamentalsSource, PriceSource};
use crate::models::{KeyStats, ValuationSnapshot};
use crate::scraper::{ForwardPeScraper, PageRenderer};
use crate::storage::Repository;
use crate::utils::jittered;
use crate::valuation::{estimated_price, finite, forward_pe_band, historical_pe_range};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Inter-ticker pause bounds for the page scraper.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub min_ms: u64,
    pub max_ms: u64,
}

pub struct Pipeline<'a> {
    repo: &'a Repository,
}

impl<'a> Pipeline<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    /// Build and store today's valuation snapshots.
    pub async fn ingest_eps<S>(
        &self,
        source: &S,
        tickers: &[String],
        pe_lookback: &str,
        today: NaiveDate,
    ) -> Result<PipelineStats>
    where
        S: FundamentalsSource + PriceSource + ?Sized,
    {
        let mut batch = Vec::with_capacity(tickers.len());
        let mut errors = 0usize;

        for ticker in tickers {
            info!("--- Fetching data for {} ---", ticker);
            match self.snapshot(source, ticker, pe_lookback, today).await {
                Ok(row) => batch.push(row),
                Err(e) => {
                    warn!("Could not retrieve data for {}: {}", ticker, e);
                    errors += 1;
                }
            }
        }

        let mut stats = PipelineStats {
            tickers_processed: tickers.len(),
            rows_written: 0,
            errors,
        };

        if batch.is_empty() {
            info!("No snapshots collected, nothing written");
            return Ok(stats);
        }

        let deleted = self
            .repo
            .delete_financial_data_for_date(today)
            .context("Failed to clear today's snapshots")?;
        debug!("Deleted {} existing rows for {}", deleted, today);

        stats.rows_written = self
            .repo
            .insert_financial_data(&batch)
            .context("Failed to insert snapshots")?;

        info!("Stored {} snapshots for {}", stats.rows_written, today);
        Ok(stats)
    }

    async fn snapshot<S>(
        &self,
        source: &S,
        ticker: &str,
        pe_lookback: &str,
        today: NaiveDate,
    ) -> Result<ValuationSnapshot, FetchError>
    where
        S: FundamentalsSource + PriceSource + ?Sized,
    {
        let summary = source.summary(ticker).await?;
        let stats = summary.stats;

        let pe_range = match source.quarterly_financials(ticker).await {
            Ok(financials) => match source.daily_closes(ticker, pe_lookback).await {
                Ok(prices) => match historical_pe_range(&financials, &prices) {
                    Ok(range) => Some(range),
                    Err(reason) => {
                        info!("{}: P/E range unavailable ({})", ticker, reason);
                        None
                    }
                },
                Err(e) => {
                    warn!("{}: price history fetch failed: {}", ticker, e);
                    None
                }
            },
            Err(e) => {
                warn!("{}: statement fetch failed: {}", ticker, e);
                None
            }
        };

        let band = match self.repo.forward_pe_history(ticker) {
            Ok(history) => forward_pe_band(&history),
            Err(e) => {
                warn!("Error querying historical forward P/E for {}: {:#}", ticker, e);
                None
            }
        };
        let (p25, p75) = (band.map(|b| b.0), band.map(|b| b.1));

        let peg_ratio = source.trailing_peg_ratio(ticker).await.unwrap_or_else(|e| {
            warn!("{}: trailing PEG fetch failed: {}", ticker, e);
            None
        });

        let mut analyst = summary.analyst;
        for range in [
            &mut analyst.current_quarter,
            &mut analyst.next_quarter,
            &mut analyst.current_year,
            &mut analyst.next_year,
        ] {
            range.low = finite(range.low);
            range.high = finite(range.high);
            range.avg = finite(range.avg);
        }

        Ok(ValuationSnapshot {
            ticker: ticker.to_string(),
            date: today,
            stats: KeyStats {
                trailing_eps: finite(stats.trailing_eps),
                forward_eps: finite(stats.forward_eps),
                trailing_pe: finite(stats.trailing_pe),
                forward_pe: finite(stats.forward_pe),
            },
            pe_range_low_5y: finite(pe_range.map(|r| r.low)),
            pe_range_high_5y: finite(pe_range.map(|r| r.high)),
            analyst,
            forward_pe_perc_25: finite(p25),
            forward_pe_perc_75: finite(p75),
            estimated_forward_price_low: finite(estimated_price(stats.forward_eps, p25)),
            estimated_forward_price_high: finite(estimated_price(stats.forward_eps, p75)),
            peg_ratio: finite(peg_ratio),
        })
    }

    /// Scrape each ticker in order, then compact the history table once.
    pub async fn scrape_forward_pe<R: PageRenderer>(
        &self,
        scraper: &ForwardPeScraper<R>,
        tickers: &[String],
        pacing: Pacing,
    ) -> Result<PipelineStats> {
        let mut stats = PipelineStats {
            tickers_processed: tickers.len(),
            rows_written: 0,
            errors: 0,
        };

        for (i, ticker) in tickers.iter().enumerate() {
            if i > 0 {
                let pause = jittered(pacing.min_ms, pacing.max_ms);
                debug!("Pausing {:?} before {}", pause, ticker);
                sleep(pause).await;
            }

            let points = match scraper.fetch(ticker).await {
                Ok(points) => points,
                Err(e) => {
                    warn!("{}: {}", ticker, e);
                    stats.errors += 1;
                    continue;
                }
            };

            match self.repo.insert_forward_pe_history(&points) {
                Ok(n) => {
                    info!("Inserted {} forward P/E records for {}", n, ticker);
                    stats.rows_written += n;
                }
                Err(e) => {
                    error!("{}: insert failed: {:#}", ticker, e);
                    stats.errors += 1;
                }
            }
        }

        let removed = self
            .repo
            .compact_forward_pe_history()
            .context("Failed to compact forward P/E history")?;
        info!("Compaction removed {} superseded rows", removed);

        Ok(stats)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub tickers_processed: usize,
    pub rows_written: usize,
    pub errors: usize,
}
