//! HTTP service exposing the dependency resolver.
//!
//! One real route: `GET /package/{name}/{version}` where `{version}` is a
//! version range expression. Everything else is answered with 400 before any
//! registry call is made. Resolution failures collapse to 500 at this edge;
//! the error taxonomy stays distinguishable inside `sprig-core`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use sprig_core::{ResolvedNode, Resolver};
use tracing::{error, info};

/// Message returned for any path that is not the resolve route.
pub const INVALID_PATH_MESSAGE: &str =
    "Invalid request path. Expected format: /package/{name}/{version}";

#[derive(Debug, Default, Deserialize)]
pub struct ResolveQuery {
    /// Return the flattened name-to-version projection instead of the tree.
    #[serde(default)]
    flat: bool,
}

/// Build the service router around a shared resolver.
pub fn router(resolver: Arc<Resolver>) -> Router {
    Router::new()
        .route("/package/:name/:version", get(resolve_package))
        .fallback(invalid_path)
        .with_state(resolver)
}

async fn resolve_package(
    State(resolver): State<Arc<Resolver>>,
    Path((name, range)): Path<(String, String)>,
    Query(query): Query<ResolveQuery>,
) -> Response {
    info!(package = %name, range = %range, "resolving dependency tree");

    match resolver.resolve_concurrent(&name, &range).await {
        Ok(tree) => {
            if query.flat {
                Json(flat_view(&tree)).into_response()
            } else {
                Json(tree).into_response()
            }
        }
        Err(err) => {
            error!(package = %name, range = %range, %err, "resolution failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// The flattened projection: the root plus a name-to-version map of
/// everything below it. The nested tree is the source of truth.
fn flat_view(tree: &ResolvedNode) -> serde_json::Value {
    let mut flat = tree.flatten();
    flat.remove(&tree.name);
    serde_json::json!({
        "name": tree.name,
        "version": tree.version,
        "dependencies": flat,
    })
}

async fn invalid_path() -> (StatusCode, &'static str) {
    (StatusCode::BAD_REQUEST, INVALID_PATH_MESSAGE)
}
