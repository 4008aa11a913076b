use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub yahoo: YahooConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub universe: UniverseConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

/// Analytics store (DuckDB file)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

/// Yahoo Finance endpoints and request pacing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct YahooConfig {
    #[serde(default = "default_query1_url")]
    pub query1_url: String,

    #[serde(default = "default_query2_url")]
    pub query2_url: String,

    /// Visited once to obtain the consent cookie before asking for a crumb.
    #[serde(default = "default_cookie_url")]
    pub cookie_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Lookback for the historical P/E range, in Yahoo range notation.
    #[serde(default = "default_pe_lookback")]
    pub pe_lookback: String,
}

/// Forward P/E page scraper (headless Chromium)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_scraper_base_url")]
    pub base_url: String,

    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    #[serde(default = "default_settle_min_ms")]
    pub settle_min_ms: u64,

    #[serde(default = "default_settle_max_ms")]
    pub settle_max_ms: u64,

    #[serde(default = "default_between_min_ms")]
    pub between_tickers_min_ms: u64,

    #[serde(default = "default_between_max_ms")]
    pub between_tickers_max_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Explicit Chrome/Chromium binary; auto-detected when unset.
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,
}

/// Outbound report email
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailConfig {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default = "default_from")]
    pub from: String,

    #[serde(default = "default_to")]
    pub to: String,

    /// Filled from `EMAIL_PASS` when not configured.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

/// Where the ticker universe lives
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UniverseConfig {
    #[serde(default = "default_universe_path")]
    pub path: PathBuf,

    #[serde(default = "default_universe_key")]
    pub key: String,
}

/// Daily factor report
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    #[serde(default = "default_window_days")]
    pub window_days: i64,

    #[serde(default = "default_universe_size")]
    pub universe_size: usize,

    #[serde(default = "default_shorts_count")]
    pub shorts_count: usize,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_db_path() -> PathBuf {
    PathBuf::from("data/valuation.duckdb")
}
fn default_query1_url() -> String {
    "https://query1.finance.yahoo.com".to_string()
}
fn default_query2_url() -> String {
    "https://query2.finance.yahoo.com".to_string()
}
fn default_cookie_url() -> String {
    "https://fc.yahoo.com".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    250
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36".to_string()
}
fn default_pe_lookback() -> String {
    "5y".to_string()
}
fn default_scraper_base_url() -> String {
    "https://www.gurufocus.com/term/forward-pe-ratio".to_string()
}
fn default_navigation_timeout_secs() -> u64 {
    60
}
fn default_settle_min_ms() -> u64 {
    3000
}
fn default_settle_max_ms() -> u64 {
    5000
}
fn default_between_min_ms() -> u64 {
    5000
}
fn default_between_max_ms() -> u64 {
    10000
}
fn default_window_width() -> u32 {
    1920
}
fn default_window_height() -> u32 {
    1080
}
fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}
fn default_smtp_port() -> u16 {
    465
}
fn default_from() -> String {
    "reports@example.com".to_string()
}
fn default_to() -> String {
    "inbox@example.com".to_string()
}
fn default_universe_path() -> PathBuf {
    PathBuf::from("zipline.yaml")
}
fn default_universe_key() -> String {
    "alpaca.custom_asset_list".to_string()
}
fn default_snapshot_path() -> PathBuf {
    PathBuf::from("daily.parquet")
}
fn default_window_days() -> i64 {
    14
}
fn default_universe_size() -> usize {
    10
}
fn default_shorts_count() -> usize {
    2
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

impl Default for YahooConfig {
    fn default() -> Self {
        Self {
            query1_url: default_query1_url(),
            query2_url: default_query2_url(),
            cookie_url: default_cookie_url(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            user_agent: default_user_agent(),
            pe_lookback: default_pe_lookback(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_scraper_base_url(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            settle_min_ms: default_settle_min_ms(),
            settle_max_ms: default_settle_max_ms(),
            between_tickers_min_ms: default_between_min_ms(),
            between_tickers_max_ms: default_between_max_ms(),
            user_agent: default_user_agent(),
            window_width: default_window_width(),
            window_height: default_window_height(),
            chrome_executable: None,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            from: default_from(),
            to: default_to(),
            password: None,
        }
    }
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            path: default_universe_path(),
            key: default_universe_key(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            window_days: default_window_days(),
            universe_size: default_universe_size(),
            shorts_count: default_shorts_count(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("VALUATION").separator("__"))
            .build()
            .context("Failed to assemble configuration")?;

        let mut app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;

        if app_cfg.email.password.is_none() {
            app_cfg.email.password = std::env::var("EMAIL_PASS").ok();
        }

        Ok(app_cfg)
    }
}

// ── Ticker universe ──────────────────────────────────────────────────────────

/// Read the comma-separated ticker list stored under `key` in a YAML file.
pub fn load_universe(universe: &UniverseConfig) -> Result<Vec<String>> {
    let path = universe.path.to_string_lossy();
    let cfg = config::Config::builder()
        .add_source(config::File::new(&path, config::FileFormat::Yaml))
        .build()
        .with_context(|| format!("Failed to read universe file {:?}", universe.path))?;

    let raw = cfg
        .get_string(&universe.key)
        .with_context(|| format!("Missing `{}` in {:?}", universe.key, universe.path))?;

    Ok(parse_ticker_list(&raw))
}

/// "aapl, MSFT ,,nvda" → ["AAPL", "MSFT", "NVDA"]
pub fn parse_ticker_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(normalise_ticker)
        .filter(|t| !t.is_empty())
        .collect()
}

pub fn normalise_ticker(s: &str) -> String {
    s.trim().to_uppercase()
}
