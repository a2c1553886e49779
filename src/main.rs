use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hubwallet::{
    app_state::AppState,
    config::Config,
    currency::{BlockchainInfo, CurrencyService},
    db::init_pool,
    handlers::router,
    hub::{HubTransport, ReqwestHub},
    rate_limit::RateLimiter,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hubwallet=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse configuration
    let config = Arc::new(Config::parse());

    // Initialize database
    let pool = init_pool(&config.database_url).await?;

    let hub: Arc<dyn HubTransport> = Arc::new(ReqwestHub::new(config.hub_timeout())?);
    let rates = BlockchainInfo::new(reqwest::Client::new(), config.rate_source_url.clone());
    let currencies = CurrencyService::new(
        Arc::new(rates),
        config.rates_ttl(),
        config.rates_soft_ttl(),
    );
    let limiter = Arc::new(RateLimiter::new(config.rl_window(), config.rl_max_points));

    // Create shared state
    let state = AppState {
        pool,
        config: config.clone(),
        hub,
        currencies,
        limiter,
    };

    let app = router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.socket_addr()).await?;

    tracing::info!("Server running on {}", config.socket_addr());
    tracing::info!("Exchange rates from {}", config.rate_source_url);

    axum::serve(listener, app).await?;

    Ok(())
}
