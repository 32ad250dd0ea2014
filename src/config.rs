use clap::Parser;

use crate::engine::TradingParams;

/// Event-driven prediction-market trading bot
#[derive(Parser, Debug, Clone)]
#[command(name = "newstrader", version, about)]
pub struct Config {
    /// Place real orders on Polymarket (default is paper trading)
    #[arg(long, env = "LIVE", default_value = "false")]
    pub live: bool,

    /// Initial simulated balance for paper mode (USD)
    #[arg(long, env = "INITIAL_BALANCE", default_value = "10000.0")]
    pub initial_balance: f64,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "newstrader.db")]
    pub database_path: String,

    /// Polymarket API base URL
    #[arg(
        long,
        env = "POLYMARKET_API_URL",
        default_value = "https://gamma-api.polymarket.com"
    )]
    pub polymarket_api_url: String,

    /// Polymarket CLOB (Central Limit Order Book) URL
    #[arg(
        long,
        env = "POLYMARKET_CLOB_URL",
        default_value = "https://clob.polymarket.com"
    )]
    pub polymarket_clob_url: String,

    /// Polymarket API key (required for live trading)
    #[arg(long, env = "POLYMARKET_API_KEY")]
    pub polymarket_api_key: Option<String>,

    /// Minimum edge required to open a position (e.g. 0.05 = 5 points)
    #[arg(long, env = "MIN_EDGE", default_value = "0.05")]
    pub min_edge: f64,

    /// Minimum event confidence required to act
    #[arg(long, env = "MIN_CONFIDENCE", default_value = "0.6")]
    pub min_confidence: f64,

    /// Fraction of equity risked per trade
    #[arg(long, env = "RISK_PER_TRADE_PCT", default_value = "0.02")]
    pub risk_per_trade_pct: f64,

    /// Cap on a single position as a fraction of equity
    #[arg(long, env = "MAX_POSITION_PCT", default_value = "0.30")]
    pub max_position_pct: f64,

    /// Stop-loss distance as a fraction of entry price
    #[arg(long, env = "STOP_LOSS_PCT", default_value = "0.15")]
    pub stop_loss_pct: f64,

    /// Take-profit distance as a fraction of entry price
    #[arg(long, env = "TAKE_PROFIT_PCT", default_value = "0.30")]
    pub take_profit_pct: f64,

    /// Gain at which the stop is raised to breakeven
    #[arg(long, env = "BREAKEVEN_TRIGGER_PCT", default_value = "0.10")]
    pub breakeven_trigger_pct: f64,

    /// Trailing-stop distance below the highest price seen
    #[arg(long, env = "TRAILING_STOP_PCT", default_value = "0.10")]
    pub trailing_stop_pct: f64,

    /// Enable the trailing stop once breakeven arms
    #[arg(
        long,
        env = "USE_TRAILING_STOP",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub use_trailing_stop: bool,

    /// Daily realized-loss limit as a fraction of equity
    #[arg(long, env = "MAX_DAILY_LOSS_PCT", default_value = "0.10")]
    pub max_daily_loss_pct: f64,

    /// Maximum number of simultaneously open positions
    #[arg(long, env = "MAX_CONCURRENT_POSITIONS", default_value = "10")]
    pub max_concurrent_positions: usize,

    /// Per-market cooldown after a trade, in seconds
    #[arg(long, env = "COOLDOWN_SECS", default_value = "14400")]
    pub cooldown_secs: u64,

    /// Position-monitor sweep interval in seconds
    #[arg(long, env = "MONITOR_INTERVAL_SECS", default_value = "30")]
    pub monitor_interval_secs: u64,

    /// Minimum trade size in USD
    #[arg(long, env = "MIN_TRADE_USD", default_value = "10.0")]
    pub min_trade_usd: f64,

    /// Per-quote timeout during monitor sweeps, in seconds
    #[arg(long, env = "PRICE_TIMEOUT_SECS", default_value = "5")]
    pub price_timeout_secs: u64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.live && self.polymarket_api_key.is_none() {
            anyhow::bail!(
                "POLYMARKET_API_KEY is required in live trading mode. Omit --live for paper trading."
            );
        }
        if self.initial_balance <= 0.0 {
            anyhow::bail!("initial_balance must be positive");
        }
        if !(0.0..=1.0).contains(&self.min_edge) {
            anyhow::bail!("min_edge must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            anyhow::bail!("min_confidence must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.risk_per_trade_pct) {
            anyhow::bail!("risk_per_trade_pct must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.max_position_pct) {
            anyhow::bail!("max_position_pct must be between 0.0 and 1.0");
        }
        if self.stop_loss_pct <= 0.0 || self.stop_loss_pct >= 1.0 {
            anyhow::bail!("stop_loss_pct must be strictly between 0.0 and 1.0");
        }
        if self.take_profit_pct <= 0.0 {
            anyhow::bail!("take_profit_pct must be positive");
        }
        if !(0.0..=1.0).contains(&self.trailing_stop_pct) {
            anyhow::bail!("trailing_stop_pct must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.max_daily_loss_pct) {
            anyhow::bail!("max_daily_loss_pct must be between 0.0 and 1.0");
        }
        if self.max_concurrent_positions == 0 {
            anyhow::bail!("max_concurrent_positions must be at least 1");
        }
        if self.min_trade_usd <= 0.0 {
            anyhow::bail!("min_trade_usd must be positive");
        }
        Ok(())
    }

    /// Build the engine's parameter block from the parsed CLI surface.
    pub fn trading_params(&self) -> TradingParams {
        TradingParams {
            min_edge: self.min_edge,
            min_confidence: self.min_confidence,
            risk_per_trade_pct: self.risk_per_trade_pct,
            max_position_pct: self.max_position_pct,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
            breakeven_trigger_pct: self.breakeven_trigger_pct,
            trailing_stop_pct: self.trailing_stop_pct,
            use_trailing_stop: self.use_trailing_stop,
            max_daily_loss_pct: self.max_daily_loss_pct,
            max_concurrent_positions: self.max_concurrent_positions,
            cooldown_secs: self.cooldown_secs,
            min_trade_usd: self.min_trade_usd,
            price_timeout_secs: self.price_timeout_secs,
            initial_balance: self.initial_balance,
            paper: !self.live,
        }
    }
}
