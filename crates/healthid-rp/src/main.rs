//! Relying Party Server Binary
//!
//! Serves the relying party's entity configuration and login endpoints.

use std::env;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use healthid_core::P256Jose;
use healthid_federation::{HttpStatementFetcher, StatementCache};
use healthid_rp::{
    create_router, AppState, HttpOpenIdClient, PendingLogins, RelyingParty, ServerConfig,
    DEFAULT_PENDING_CAPACITY,
};

#[tokio::main]
async fn main() {
    // Initialize logging
    let log_level = env::var("HEALTHID_LOG_LEVEL")
        .unwrap_or_else(|_| "info".into())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    // Configuration
    let config = ServerConfig::from_env().expect("Invalid relying party configuration");
    let federation = config.federation.clone();

    let fetcher = HttpStatementFetcher::new(config.http_timeout)
        .expect("Failed to build statement fetcher");
    let client = HttpOpenIdClient::new(config.http_timeout)
        .expect("Failed to build token client");

    let login_timeout = federation
        .login_timeout()
        .to_std()
        .expect("Login timeout must be positive");

    info!(
        iss = %federation.iss(),
        trust_anchor = %federation.trust_anchor().entity_id(),
        signing_kid = %federation.keys().signing_kid(),
        max_chain_depth = federation.max_chain_depth(),
        port = config.port,
        "Starting relying party"
    );

    let relying_party = RelyingParty::new(
        federation,
        Arc::new(fetcher),
        Arc::new(client),
        Arc::new(P256Jose::new()),
    )
    .with_cache(StatementCache::new(config.cache_capacity));

    // Create application state
    let state = Arc::new(AppState {
        relying_party,
        pending: PendingLogins::new(DEFAULT_PENDING_CAPACITY, login_timeout),
    });

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!(addr = %addr, "Relying party listening");

    axum::serve(listener, app).await.expect("Server error");
}
