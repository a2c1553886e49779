use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "hubwallet")]
#[command(about = "LndHub wallet service with public invoice pages")]
#[command(version)]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://hubwallet.db?mode=rwc")]
    pub database_url: String,

    /// Exchange rate ticker (blockchain.info format)
    #[arg(long, env = "RATE_SOURCE_URL", default_value = "https://blockchain.info/ticker")]
    pub rate_source_url: String,

    /// Seconds a rate table is served without refreshing
    #[arg(long, env = "RATES_TTL_SECS", default_value = "10")]
    pub rates_ttl_secs: u64,

    /// Seconds a stale rate table may still be served while it refreshes
    #[arg(long, env = "RATES_SOFT_TTL_SECS", default_value = "600")]
    pub rates_soft_ttl_secs: u64,

    /// Rate limiter window in seconds
    #[arg(long, env = "RL_WINDOW_SECS", default_value = "60")]
    pub rl_window_secs: u64,

    /// Points allowed per rate limiter window
    #[arg(long, env = "RL_MAX_POINTS", default_value = "30")]
    pub rl_max_points: u32,

    /// Multiplier applied to amounts shown in fiat currencies
    #[arg(long, env = "FIAT_MULT", default_value = "1.0")]
    pub fiat_mult: f64,

    /// Timeout for a single hub request in seconds
    #[arg(long, env = "HUB_TIMEOUT_SECS", default_value = "30")]
    pub hub_timeout_secs: u64,
}

impl Config {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rates_ttl(&self) -> Duration {
        Duration::from_secs(self.rates_ttl_secs)
    }

    pub fn rates_soft_ttl(&self) -> Duration {
        Duration::from_secs(self.rates_soft_ttl_secs)
    }

    pub fn rl_window(&self) -> Duration {
        Duration::from_secs(self.rl_window_secs)
    }

    pub fn hub_timeout(&self) -> Duration {
        Duration::from_secs(self.hub_timeout_secs)
    }
}
