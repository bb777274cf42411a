//! The `serve` command: run the HTTP resolution service.

use std::net::SocketAddr;
use std::sync::Arc;

use miette::{IntoDiagnostic, Result};
use sprig_core::{RegistryClient, Resolver};
use tracing::info;

use sprig_cli::server;

/// Run the service on the given port until interrupted.
pub fn run(port: u16, registry: Option<&str>) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(serve(port, registry))
}

async fn serve(port: u16, registry: Option<&str>) -> Result<()> {
    let client = match registry {
        Some(url) => RegistryClient::new(url),
        None => RegistryClient::from_env(),
    }
    .into_diagnostic()?;

    info!(registry = %client.base_url(), "using registry");

    let resolver = Arc::new(Resolver::new(client));
    let app = server::router(resolver);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    info!(%addr, "sprig service listening");

    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}
