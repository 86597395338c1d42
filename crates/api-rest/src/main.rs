//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own, with the expiry sweep alongside it.
//!
//! ## Intended use
//! Useful for development and debugging when you want the REST server (with OpenAPI/Swagger
//! UI) without the workspace runner. The workspace's main `lifetag-run` binary does the same
//! and is what deployments use.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the LifeTag REST API server.
///
/// # Environment Variables
/// - `LIFETAG_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - everything read by [`api_rest::state_from_env`]
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the engine state cannot be built from the environment,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("LIFETAG_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    tracing::info!("-- Starting LifeTag REST API on {}", addr);

    let state = api_rest::state_from_env()?;
    let _sweep = api_rest::spawn_expiry_sweep(state.service.clone(), state.cfg.sweep_interval());

    let app = api_rest::router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
