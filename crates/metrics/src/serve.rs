use std::io;
use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::SharedRegistry;

/// Serves the global registry on `/metrics` until the listener fails.
#[tracing::instrument(name = "metrics", skip_all)]
pub async fn serve_metrics(listen_addr: SocketAddr) -> io::Result<()> {
    let app = Router::new().route("/metrics", get(get_metrics));
    let listener = TcpListener::bind(listen_addr).await?;
    let address = listener.local_addr()?;

    async fn get_metrics() -> String {
        let mut buf = String::new();
        if let Err(e) = SharedRegistry::global().export(&mut buf) {
            warn!("Failed to encode metrics: {e}");
        }
        buf
    }

    info!(%address, "Serving metrics");
    axum::serve(listener, app).await
}
