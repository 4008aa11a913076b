use anyhow::{Context, Result};
use duckdb::{Connection, params};
use std::path::Path;
use tracing::info;

use crate::factors::FactorRow;

const SNAPSHOT_DDL: &str = r#"
CREATE TABLE snapshot (
    date             DATE    NOT NULL,
    asset            VARCHAR NOT NULL,
    dollar_volume    DOUBLE,
    daily_return     DOUBLE,
    rsi              DOUBLE,
    macd             DOUBLE,
    macd_signal      DOUBLE,
    close            DOUBLE,
    bollinger_lower  DOUBLE,
    bollinger_middle DOUBLE,
    bollinger_upper  DOUBLE,
    shorts           BOOLEAN NOT NULL
);
"#;

/// Write report rows to a Parquet file with a fixed schema, replacing any
/// existing file.
pub fn write_parquet(rows: &[FactorRow], path: &Path) -> Result<()> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SNAPSHOT_DDL)?;

    {
        let mut appender = conn.appender("snapshot")?;
        for r in rows {
            let bands = r.bollinger;
            appender.append_row(params![
                r.date,
                r.asset,
                r.dollar_volume,
                r.daily_return,
                r.rsi,
                r.macd,
                r.macd_signal,
                r.close,
                bands.map(|b| b.lower),
                bands.map(|b| b.middle),
                bands.map(|b| b.upper),
                r.shorts,
            ])?;
        }
        appender.flush()?;
    }

    let target = path.to_string_lossy().replace('\'', "''");
    conn.execute_batch(&format!(
        "COPY (SELECT * FROM snapshot ORDER BY rsi NULLS LAST) TO '{target}' (FORMAT PARQUET)"
    ))
    .with_context(|| format!("Failed to write snapshot {:?}", path))?;

    info!("Wrote {} rows to {:?}", rows.len(), path);
    Ok(())
}
