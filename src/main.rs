// =============================================================================
// Market-State Reconciliation Engine — Main Entry Point
// =============================================================================
//
// Wires the library's components into a running process: load configuration,
// build the real REST and websocket adapters, run the C7 startup load, then
// hand the feed to `SessionController::run` in a reconnect loop. A dropped
// connection or feed error is never fatal here — spec §7 treats a
// reconnected session as a potential restart, left to the next heartbeat's
// `run_id` check to confirm.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use meridian_market_state::config::Config;
use meridian_market_state::feed::TungsteniteFeed;
use meridian_market_state::rest::HttpRestClient;
use meridian_market_state::session::SessionController;
use meridian_market_state::state::{EngineHandle, MarketState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("market-state reconciliation engine starting");

    let config = Config::load();

    let rest = Arc::new(HttpRestClient::new(
        config.api_base.clone(),
        config.legacy_api_base.clone(),
        config.api_key.as_deref(),
        config.default_limit,
        config.delay_seconds,
    ));

    let handle = EngineHandle::new(MarketState::new(config.clone()));
    let controller = SessionController::new(rest, handle);

    info!("running initial market load");
    if let Err(e) = controller.load_market().await {
        error!(error = %e, "initial load_market failed, retrying once after a short delay");
        tokio::time::sleep(Duration::from_secs(5)).await;
        controller.load_market().await?;
    }

    loop {
        match TungsteniteFeed::connect(&config.websocket_base, config.api_key.as_deref()).await {
            Ok(mut feed) => {
                info!("websocket feed connected, entering run loop");
                if let Err(e) = controller.run(&mut feed).await {
                    warn!(error = %e, "session run loop ended with error, reconnecting in 5s");
                }
            }
            Err(e) => {
                warn!(error = %e, "websocket connect failed, retrying in 5s");
            }
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}
