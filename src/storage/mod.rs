use crate::models::{
    DailyBar, ExtendedEstimate, ForwardPePoint, ForwardPriceEstimate, ValuationSnapshot,
};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use duckdb::{Connection, Row, params};
use std::path::Path;
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DAILY_BARS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS daily_bars (
    symbol      VARCHAR  NOT NULL,
    date        DATE     NOT NULL,
    open        DOUBLE,
    high        DOUBLE,
    low         DOUBLE,
    close       DOUBLE   NOT NULL,
    volume      BIGINT,
    loaded_at   TIMESTAMP NOT NULL,
    PRIMARY KEY (symbol, date)
);
CREATE INDEX IF NOT EXISTS idx_bars_date ON daily_bars (date);
"#;

// No key constraint: one row per (ticker, date) is kept by delete-then-insert.
const FINANCIAL_DATA_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS stock_financial_data (
    ticker                          VARCHAR NOT NULL,
    date                            DATE    NOT NULL,
    trailing_eps                    DOUBLE,
    forward_eps                     DOUBLE,
    trailing_pe                     DOUBLE,
    forward_pe                      DOUBLE,
    pe_range_low_5y                 DOUBLE,
    pe_range_high_5y                DOUBLE,
    analyst_eps_range_low_0q        DOUBLE,
    analyst_eps_range_high_0q       DOUBLE,
    analyst_eps_range_avg_0q        DOUBLE,
    analyst_eps_range_low_p1q       DOUBLE,
    analyst_eps_range_high_p1q      DOUBLE,
    analyst_eps_range_avg_p1q       DOUBLE,
    analyst_eps_range_low_0y        DOUBLE,
    analyst_eps_range_high_0y       DOUBLE,
    analyst_eps_range_avg_0y        DOUBLE,
    analyst_eps_range_low_p1y       DOUBLE,
    analyst_eps_range_high_p1y      DOUBLE,
    analyst_eps_range_avg_p1y       DOUBLE,
    forward_pe_perc_25              DOUBLE,
    forward_pe_perc_75              DOUBLE,
    estimated_forward_price_low     DOUBLE,
    estimated_forward_price_high    DOUBLE,
    peg_ratio                       DOUBLE
);
"#;

// Duplicate (ticker, date) rows are allowed until `compact_forward_pe_history`
// keeps the highest version of each.
const FORWARD_PE_HISTORY_DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS forward_pe_version_seq;
CREATE TABLE IF NOT EXISTS stock_forward_pe_history (
    ticker      VARCHAR NOT NULL,
    date        DATE    NOT NULL,
    forward_pe  DOUBLE  NOT NULL,
    version     BIGINT  NOT NULL DEFAULT nextval('forward_pe_version_seq')
);
"#;

/// Tables reported by `stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    DailyBars,
    FinancialData,
    ForwardPeHistory,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::DailyBars, Table::FinancialData, Table::ForwardPeHistory];

    pub fn name(self) -> &'static str {
        match self {
            Table::DailyBars => "daily_bars",
            Table::FinancialData => "stock_financial_data",
            Table::ForwardPeHistory => "stock_forward_pe_history",
        }
    }
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

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn create_price_bundle_table(&self) -> Result<()> {
        self.conn.execute_batch(DAILY_BARS_DDL).context("daily_bars DDL failed")?;
        Ok(())
    }

    pub fn create_financial_data_table(&self) -> Result<()> {
        self.conn
            .execute_batch(FINANCIAL_DATA_DDL)
            .context("stock_financial_data DDL failed")?;
        info!("Ensured table stock_financial_data exists");
        Ok(())
    }

    pub fn create_forward_pe_history_table(&self) -> Result<()> {
        self.conn
            .execute_batch(FORWARD_PE_HISTORY_DDL)
            .context("stock_forward_pe_history DDL failed")?;
        info!("Ensured table stock_forward_pe_history exists");
        Ok(())
    }

    // ── Price bundle ──────────────────────────────────────────────────────────

    /// Upsert bars — idempotent, safe to re-run on same data.
    pub fn upsert_daily_bars(&self, bars: &[DailyBar]) -> Result<usize> {
        if bars.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO daily_bars (symbol, date, open, high, low, close, volume, loaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (symbol, date) DO UPDATE SET
                open      = COALESCE(excluded.open,   daily_bars.open),
                high      = COALESCE(excluded.high,   daily_bars.high),
                low       = COALESCE(excluded.low,    daily_bars.low),
                close     = excluded.close,
                volume    = COALESCE(excluded.volume, daily_bars.volume),
                loaded_at = excluded.loaded_at
        "#;

        for bar in bars {
            tx.execute(
                sql,
                params![
                    bar.symbol,
                    bar.date,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.loaded_at,
                ],
            )
            .with_context(|| format!("insert bar {} {}", bar.symbol, bar.date))?;
        }

        tx.commit()?;
        Ok(bars.len())
    }

    /// Bars with `from <= date <= to`, ordered by symbol then date.
    pub fn bars_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyBar>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT symbol, date, open, high, low, close, volume, loaded_at
               FROM daily_bars
               WHERE date BETWEEN ? AND ?
               ORDER BY symbol, date"#,
        )?;
        let bars = stmt
            .query_map(params![from, to], |r| {
                Ok(DailyBar {
                    symbol: r.get(0)?,
                    date: r.get(1)?,
                    open: r.get(2)?,
                    high: r.get(3)?,
                    low: r.get(4)?,
                    close: r.get(5)?,
                    volume: r.get(6)?,
                    loaded_at: r.get(7)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(bars)
    }

    // ── stock_financial_data ──────────────────────────────────────────────────

    pub fn delete_financial_data_for_date(&self, date: NaiveDate) -> Result<usize> {
        let n = self
            .conn
            .execute("DELETE FROM stock_financial_data WHERE date = ?", params![date])
            .with_context(|| format!("delete stock_financial_data for {}", date))?;
        Ok(n)
    }

    pub fn insert_financial_data(&self, rows: &[ValuationSnapshot]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO stock_financial_data VALUES (
                ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            )
        "#;

        for row in rows {
            let a = &row.analyst;
            tx.execute(
                sql,
                params![
                    row.ticker,
                    row.date,
                    row.stats.trailing_eps,
                    row.stats.forward_eps,
                    row.stats.trailing_pe,
                    row.stats.forward_pe,
                    row.pe_range_low_5y,
                    row.pe_range_high_5y,
                    a.current_quarter.low,
                    a.current_quarter.high,
                    a.current_quarter.avg,
                    a.next_quarter.low,
                    a.next_quarter.high,
                    a.next_quarter.avg,
                    a.current_year.low,
                    a.current_year.high,
                    a.current_year.avg,
                    a.next_year.low,
                    a.next_year.high,
                    a.next_year.avg,
                    row.forward_pe_perc_25,
                    row.forward_pe_perc_75,
                    row.estimated_forward_price_low,
                    row.estimated_forward_price_high,
                    row.peg_ratio,
                ],
            )
            .with_context(|| format!("insert financial data {} {}", row.ticker, row.date))?;
        }

        tx.commit()?;
        Ok(rows.len())
    }

    /// Per ticker, the bounds from the most recent row that has both, with
    /// `latest_date` taken over all of the ticker's rows. Tickers that never
    /// had both bounds are left out.
    pub fn latest_forward_price_estimates(&self) -> Result<Vec<ForwardPriceEstimate>> {
        let mut stmt = self.conn.prepare(
            r#"WITH latest AS (
                   SELECT ticker, max(date) AS latest_date
                   FROM stock_financial_data
                   GROUP BY ticker
               ),
               bounded AS (
                   SELECT ticker, max(date) AS bound_date
                   FROM stock_financial_data
                   WHERE estimated_forward_price_low IS NOT NULL
                     AND estimated_forward_price_high IS NOT NULL
                   GROUP BY ticker
               )
               SELECT f.ticker, f.estimated_forward_price_low, f.estimated_forward_price_high,
                      l.latest_date
               FROM stock_financial_data f
               JOIN bounded b ON f.ticker = b.ticker AND f.date = b.bound_date
               JOIN latest l ON f.ticker = l.ticker
               ORDER BY f.ticker"#,
        )?;
        let rows = stmt
            .query_map([], read_estimate)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Like `latest_forward_price_estimates`, carrying the fields the extended
    /// report derives from. Those come from the same bounded row, which must
    /// have positive trailing EPS.
    pub fn latest_extended_estimates(&self) -> Result<Vec<ExtendedEstimate>> {
        let mut stmt = self.conn.prepare(
            r#"WITH latest AS (
                   SELECT ticker, max(date) AS latest_date
                   FROM stock_financial_data
                   GROUP BY ticker
               ),
               bounded AS (
                   SELECT ticker, max(date) AS bound_date
                   FROM stock_financial_data
                   WHERE estimated_forward_price_low IS NOT NULL
                     AND estimated_forward_price_high IS NOT NULL
                   GROUP BY ticker
               )
               SELECT f.ticker, f.estimated_forward_price_low, f.estimated_forward_price_high,
                      l.latest_date,
                      f.forward_eps, f.trailing_eps, f.forward_pe,
                      f.forward_pe_perc_25, f.forward_pe_perc_75,
                      f.analyst_eps_range_avg_p1y, f.peg_ratio
               FROM stock_financial_data f
               JOIN bounded b ON f.ticker = b.ticker AND f.date = b.bound_date
               JOIN latest l ON f.ticker = l.ticker
               WHERE f.trailing_eps > 0
               ORDER BY f.ticker"#,
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(ExtendedEstimate {
                    base: read_estimate(r)?,
                    forward_eps: r.get(4)?,
                    trailing_eps: r.get(5)?,
                    forward_pe: r.get(6)?,
                    forward_pe_perc_25: r.get(7)?,
                    forward_pe_perc_75: r.get(8)?,
                    analyst_eps_avg_next_year: r.get(9)?,
                    peg_ratio: r.get(10)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── stock_forward_pe_history ──────────────────────────────────────────────

    pub fn insert_forward_pe_history(&self, points: &[ForwardPePoint]) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }

        // One statement per row so versions follow insertion order
        let tx = self.conn.unchecked_transaction()?;
        for p in points {
            tx.execute(
                "INSERT INTO stock_forward_pe_history (ticker, date, forward_pe) VALUES (?, ?, ?)",
                params![p.ticker, p.date, p.forward_pe],
            )
            .with_context(|| format!("insert forward P/E {} {}", p.ticker, p.date))?;
        }
        tx.commit()?;
        Ok(points.len())
    }

    /// All stored forward P/E values for a ticker, compacted or not.
    pub fn forward_pe_history(&self, ticker: &str) -> Result<Vec<f64>> {
        let mut stmt = self.conn.prepare(
            "SELECT forward_pe FROM stock_forward_pe_history \
             WHERE ticker = ? AND forward_pe IS NOT NULL ORDER BY date",
        )?;
        let values = stmt
            .query_map(params![ticker], |r| r.get(0))?
            .collect::<duckdb::Result<Vec<f64>>>()?;
        Ok(values)
    }

    /// Keep only the last inserted row per (ticker, date). Returns rows removed.
    pub fn compact_forward_pe_history(&self) -> Result<usize> {
        let removed = self
            .conn
            .execute(
                r#"DELETE FROM stock_forward_pe_history
                   WHERE version NOT IN (
                       SELECT max(version) FROM stock_forward_pe_history GROUP BY ticker, date
                   )"#,
                [],
            )
            .context("forward P/E history compaction failed")?;
        Ok(removed)
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn row_count(&self, table: Table) -> Result<i64> {
        let mut s = self
            .conn
            .prepare(&format!("SELECT COUNT(*) FROM {}", table.name()))?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn date_range(&self, table: Table) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let mut s = self
            .conn
            .prepare(&format!("SELECT MIN(date), MAX(date) FROM {}", table.name()))?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }
}

fn read_estimate(r: &Row<'_>) -> duckdb::Result<ForwardPriceEstimate> {
    Ok(ForwardPriceEstimate {
        ticker: r.get(0)?,
        estimated_forward_price_low: r.get(1)?,
        estimated_forward_price_high: r.get(2)?,
        latest_date: r.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalystEstimates, EpsRange, KeyStats};
    use chrono::Utc;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.create_price_bundle_table().unwrap();
        repo.create_financial_data_table().unwrap();
        repo.create_forward_pe_history_table().unwrap();
        repo
    }

    fn snapshot(ticker: &str, date: NaiveDate, band: Option<(f64, f64)>) -> ValuationSnapshot {
        ValuationSnapshot {
            ticker: ticker.to_string(),
            date,
            stats: KeyStats {
                trailing_eps: Some(4.0),
                forward_eps: Some(5.0),
                trailing_pe: Some(25.0),
                forward_pe: Some(20.0),
            },
            analyst: AnalystEstimates {
                next_year: EpsRange { low: Some(5.5), high: Some(6.5), avg: Some(6.0) },
                ..Default::default()
            },
            forward_pe_perc_25: Some(18.0),
            forward_pe_perc_75: Some(24.0),
            estimated_forward_price_low: band.map(|b| b.0),
            estimated_forward_price_high: band.map(|b| b.1),
            ..Default::default()
        }
    }

    fn point(ticker: &str, date: NaiveDate, pe: f64) -> ForwardPePoint {
        ForwardPePoint { ticker: ticker.to_string(), date, forward_pe: pe }
    }

    #[test]
    fn test_compaction_keeps_last_inserted() {
        let repo = repo();
        let date = d(2024, 3, 31);
        repo.insert_forward_pe_history(&[point("AAPL", date, 25.0)]).unwrap();
        repo.insert_forward_pe_history(&[point("AAPL", date, 27.5), point("AAPL", d(2024, 6, 30), 28.0)])
            .unwrap();
        assert_eq!(repo.row_count(Table::ForwardPeHistory).unwrap(), 3);

        let removed = repo.compact_forward_pe_history().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(repo.row_count(Table::ForwardPeHistory).unwrap(), 2);
        assert_eq!(repo.forward_pe_history("AAPL").unwrap(), vec![27.5, 28.0]);

        // Second compaction is a no-op
        assert_eq!(repo.compact_forward_pe_history().unwrap(), 0);
    }

    #[test]
    fn test_duplicates_visible_before_compaction() {
        let repo = repo();
        let date = d(2024, 3, 31);
        repo.insert_forward_pe_history(&[point("MSFT", date, 30.0), point("MSFT", date, 31.0)])
            .unwrap();
        assert_eq!(repo.forward_pe_history("MSFT").unwrap().len(), 2);
        repo.compact_forward_pe_history().unwrap();
        assert_eq!(repo.forward_pe_history("MSFT").unwrap(), vec![31.0]);
        assert!(repo.forward_pe_history("NVDA").unwrap().is_empty());
    }

    #[test]
    fn test_delete_then_insert_is_idempotent_per_date() {
        let repo = repo();
        let today = d(2024, 5, 1);
        let batch = vec![snapshot("AAPL", today, Some((90.0, 120.0))), snapshot("MSFT", today, None)];

        for _ in 0..2 {
            repo.delete_financial_data_for_date(today).unwrap();
            repo.insert_financial_data(&batch).unwrap();
        }
        assert_eq!(repo.row_count(Table::FinancialData).unwrap(), 2);

        // Other dates are untouched
        repo.insert_financial_data(&[snapshot("AAPL", d(2024, 4, 30), Some((1.0, 2.0)))])
            .unwrap();
        assert_eq!(repo.delete_financial_data_for_date(today).unwrap(), 2);
        assert_eq!(repo.row_count(Table::FinancialData).unwrap(), 1);
    }

    #[test]
    fn test_latest_estimates_use_latest_date_and_skip_nulls() {
        let repo = repo();
        repo.insert_financial_data(&[
            snapshot("AAPL", d(2024, 4, 30), Some((80.0, 100.0))),
            snapshot("AAPL", d(2024, 5, 1), Some((90.0, 120.0))),
            snapshot("MSFT", d(2024, 5, 1), None),
            snapshot("AMZN", d(2024, 5, 1), Some((150.0, 190.0))),
        ])
        .unwrap();

        let rows = repo.latest_forward_price_estimates().unwrap();
        let tickers: Vec<&str> = rows.iter().map(|r| r.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["AAPL", "AMZN"]);
        assert_eq!(rows[0].estimated_forward_price_low, 90.0);
        assert_eq!(rows[0].latest_date, d(2024, 5, 1));
    }

    #[test]
    fn test_latest_estimates_fall_back_to_last_bounded_row() {
        let repo = repo();
        repo.insert_financial_data(&[
            snapshot("AAPL", d(2024, 5, 1), Some((90.0, 120.0))),
            snapshot("AAPL", d(2024, 5, 2), None),
        ])
        .unwrap();

        let rows = repo.latest_forward_price_estimates().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ticker, "AAPL");
        assert_eq!(
            (rows[0].estimated_forward_price_low, rows[0].estimated_forward_price_high),
            (90.0, 120.0)
        );
        assert_eq!(rows[0].latest_date, d(2024, 5, 2));

        let extended = repo.latest_extended_estimates().unwrap();
        assert_eq!(extended.len(), 1);
        assert_eq!(extended[0].base.estimated_forward_price_high, 120.0);
        assert_eq!(extended[0].base.latest_date, d(2024, 5, 2));
    }

    #[test]
    fn test_extended_estimates_require_positive_trailing_eps() {
        let repo = repo();
        let mut loss_maker = snapshot("RIVN", d(2024, 5, 1), Some((10.0, 20.0)));
        loss_maker.stats.trailing_eps = Some(-1.2);
        repo.insert_financial_data(&[snapshot("AAPL", d(2024, 5, 1), Some((90.0, 120.0))), loss_maker])
            .unwrap();

        let rows = repo.latest_extended_estimates().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].base.ticker, "AAPL");
        assert_eq!(rows[0].analyst_eps_avg_next_year, Some(6.0));
        assert_eq!(rows[0].forward_pe_perc_75, Some(24.0));
    }

    #[test]
    fn test_bars_between_and_stats() {
        let repo = repo();
        let now = Utc::now().naive_utc();
        let bar = |symbol: &str, date: NaiveDate, close: f64| DailyBar {
            symbol: symbol.to_string(),
            date,
            open: None,
            high: None,
            low: None,
            close,
            volume: Some(1_000),
            loaded_at: now,
        };
        repo.upsert_daily_bars(&[
            bar("MSFT", d(2024, 3, 1), 415.0),
            bar("AAPL", d(2024, 3, 1), 180.0),
            bar("AAPL", d(2024, 3, 4), 175.0),
        ])
        .unwrap();
        // Re-load overwrites close
        repo.upsert_daily_bars(&[bar("AAPL", d(2024, 3, 4), 176.0)]).unwrap();

        let bars = repo.bars_between(d(2024, 3, 1), d(2024, 3, 4)).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].symbol, "AAPL");
        assert_eq!(bars[1].close, 176.0);

        assert_eq!(repo.row_count(Table::DailyBars).unwrap(), 3);
        assert_eq!(
            repo.date_range(Table::DailyBars).unwrap(),
            (Some(d(2024, 3, 1)), Some(d(2024, 3, 4)))
        );
    }
}
