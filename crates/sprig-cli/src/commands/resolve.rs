//! The `resolve` command: one-shot resolution printed as JSON.

use std::sync::Arc;

use miette::{IntoDiagnostic, Result};
use sprig_core::{RegistryClient, Resolver};
use tracing::debug;

/// Resolve a single package and print the result to stdout.
pub fn run(
    name: &str,
    range: &str,
    sequential: bool,
    flat: bool,
    registry: Option<&str>,
) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(resolve(name, range, sequential, flat, registry))
}

async fn resolve(
    name: &str,
    range: &str,
    sequential: bool,
    flat: bool,
    registry: Option<&str>,
) -> Result<()> {
    let client = match registry {
        Some(url) => RegistryClient::new(url),
        None => RegistryClient::from_env(),
    }
    .into_diagnostic()?;

    debug!(registry = %client.base_url(), package = %name, range = %range, "resolving");

    let resolver = Arc::new(Resolver::new(client));
    let tree = if sequential {
        resolver.resolve(name, range).await
    } else {
        resolver.resolve_concurrent(name, range).await
    }
    .into_diagnostic()?;

    let output = if flat {
        serde_json::to_string_pretty(&tree.flatten())
    } else {
        serde_json::to_string_pretty(&tree)
    }
    .into_diagnostic()?;

    println!("{output}");
    Ok(())
}
