use std::net::SocketAddr;
use std::process::ExitCode;

use modellink_app::{AppState, build_router, config::AppConfig};
use modellink_observability::init_observability;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let _observability = init_observability("modellink-app");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(event = "app.exit", error = %err);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), String> {
    let config = AppConfig::from_env().map_err(|err| err.to_string())?;
    let state = AppState::from_config(&config).map_err(|err| err.to_string())?;
    let app = build_router(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|err| format!("invalid listen address: {err}"))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| format!("failed to bind {addr}: {err}"))?;
    info!(event = "app.listening", addr = %addr, upstream = %config.upstream_base_url);
    axum::serve(listener, app).await.map_err(|err| format!("server error: {err}"))
}
