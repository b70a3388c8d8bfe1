use std::sync::Arc;

use device_farm::api::{AppState, farm_routes};
use device_farm::config::FarmConfig;
use device_farm::fleet::FleetRegistry;
use device_farm::jobs::{JobDispatcher, ResultAggregator, StatusReporter};
use device_farm::queue::DeviceMailbox;
use device_farm::store::{FarmStore, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = FarmConfig::from_env()?;

    eprintln!("📡 Device Farm v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://{}/api", config.bind_addr);
    eprintln!("   Database: {}", config.db_path);
    eprintln!(
        "   Device timeout: {}s, message lease: {}s",
        config.device_timeout.as_secs(),
        config.message_lease.as_secs()
    );

    // ── Store ────────────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let store: Arc<dyn FarmStore> = Arc::new(LibSqlBackend::new_local(db_path).await?);

    // ── Components ───────────────────────────────────────────────────────
    let registry = Arc::new(FleetRegistry::new(
        Arc::clone(&store),
        config.device_timeout,
    ));
    let dispatcher = Arc::new(JobDispatcher::new(
        Arc::clone(&store),
        Arc::clone(&registry),
    ));
    let aggregator = Arc::new(ResultAggregator::new(
        Arc::clone(&store),
        Arc::clone(&registry),
    ));
    let reporter = Arc::new(StatusReporter::new(
        Arc::clone(&store),
        Arc::clone(&registry),
    ));
    let mailbox = Arc::new(DeviceMailbox::new(
        Arc::clone(&store),
        config.message_lease,
    ));

    let state = AppState {
        registry,
        dispatcher,
        aggregator,
        reporter,
        mailbox,
    };

    // ── Serve ────────────────────────────────────────────────────────────
    let app = farm_routes(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Coordinator listening");
    axum::serve(listener, app).await?;

    Ok(())
}
