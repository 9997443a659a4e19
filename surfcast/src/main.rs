use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use surfcast::api::server::{ApiServer, ApiServerConfig, AppState};
use surfcast::config::AppConfig;
use surfcast::messaging::bridge::BridgeClientFactory;
use surfcast::messaging::session::{SessionConfig, SessionManager};
use surfcast::notifier::{NotifierConfig, NotifierService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "surfcast=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env_or_default();
    let api_config = ApiServerConfig::from_env_or_default();

    let factory = Arc::new(BridgeClientFactory::new(config.bridge.clone()));
    let session = Arc::new(SessionManager::new(
        factory,
        config.target.clone(),
        SessionConfig::default(),
    ));
    let notifier = Arc::new(NotifierService::start(
        Arc::clone(&session),
        NotifierConfig::default(),
    ));

    let state = AppState::new(Arc::clone(&session), Arc::clone(&notifier));
    let server = ApiServer::new(api_config, state);

    // Bring the messaging session up in the background; the HTTP surface
    // answers (and reports not-ready) while this runs.
    {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.initialize().await });
    }

    let cancel_token = server.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            cancel_token.cancel();
        }
    });

    server.run().await?;

    notifier.shutdown().await;
    session.teardown().await;

    Ok(())
}
