//! `meridian serve` — runs the Operational API, grounded in `orbit-web`'s
//! `start_server`.

use std::sync::Arc;

use tracing::info;

use crate::engine::facade::Engine;
use crate::error::{MeridianError, Result};

#[cfg(feature = "api")]
pub async fn run(engine: Arc<Engine>, port: u16) -> Result<()> {
    let app = crate::api::router(engine);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "starting operational API");
    println!("listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| MeridianError::Config(format!("failed to bind {addr}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| MeridianError::Other(format!("server error: {e}")))
}

#[cfg(not(feature = "api"))]
pub async fn run(_engine: Arc<Engine>, _port: u16) -> Result<()> {
    Err(MeridianError::Unsupported {
        provider: "api".to_string(),
        operation: "serve".to_string(),
    })
}
