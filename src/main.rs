use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{router, spawn_expiry_sweep, state_from_env};
use api_shared::HealthService;

/// Main entry point for the LifeTag consent engine
///
/// Starts the REST server and the background expiry sweep, and stops both on Ctrl-C.
/// Every REST route except `/health` requires the `x-api-key` header and an acting identity.
///
/// # Environment Variables
/// - `LIFETAG_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `LIFETAG_DATA_DIR`: Directory for the consent journal and record indexes (default: "lifetag_data")
/// - `LIFETAG_POLICY_FILE`: Consent policy YAML file (optional)
/// - `LIFETAG_IDENTITIES_FILE`: Identity seed YAML file (default: `identities.yaml` in the data directory)
/// - `API_KEY`: API key required on every authenticated request
///
/// # Returns
/// * `Ok(())` - If the server starts and shuts down cleanly
/// * `Err(anyhow::Error)` - If startup or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lifetag_run=info".parse()?)
                .add_directive("lifetag_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("LIFETAG_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let state = state_from_env()?;
    tracing::info!(
        "++ {} (data dir {})",
        HealthService::check_health().message,
        state.cfg.data_dir().display()
    );
    tracing::info!("++ Starting LifeTag REST on {}", rest_addr);

    let sweep = spawn_expiry_sweep(state.service.clone(), state.cfg.sweep_interval());

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {e}");
            }
        })
        .await?;

    sweep.abort();
    tracing::info!("-- LifeTag stopped");

    Ok(())
}
