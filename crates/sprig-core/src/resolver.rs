//! Transitive dependency resolution.
//!
//! Two variants over the same registry client and version selector:
//! - [`Resolver::resolve`] — depth-first on the calling task, no dedup:
//!   every occurrence of a name re-resolves.
//! - [`Resolver::resolve_concurrent`] — fan-out per manifest into a
//!   [`JoinSet`], sharing a [`ResolutionState`] so each package name is
//!   resolved at most once per request.
//!
//! Both variants fail fast (no partial tree), detect cycles along the
//! ancestor path, and bound concurrent registry calls with a semaphore that
//! is held only across a fetch, never across recursion.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use semver::Version;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::ResolveError;
use crate::registry::{Manifest, Packument, RegistryClient};
use crate::state::{Claim, ResolutionState};
use crate::version::{range_allows, select_highest};

/// Default cap on concurrent registry fetches, applied across the whole
/// resolution rather than per tree level.
pub const MAX_CONCURRENT_FETCHES: usize = 32;

/// One resolved package and its resolved children.
///
/// The canonical output schema is this nested tree; a flattened
/// name-to-version map is derived from it with [`ResolvedNode::flatten`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedNode {
    pub name: String,
    pub version: Version,
    pub dependencies: BTreeMap<String, ResolvedNode>,
}

impl ResolvedNode {
    fn leaf(name: String, version: Version) -> Self {
        Self {
            name,
            version,
            dependencies: BTreeMap::new(),
        }
    }

    /// Flatten the tree to a name-to-version map.
    ///
    /// The first occurrence of a name wins; the nested tree remains the
    /// source of truth when the same name appears more than once.
    #[must_use]
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut flat = BTreeMap::new();
        self.flatten_into(&mut flat);
        flat
    }

    fn flatten_into(&self, flat: &mut BTreeMap<String, String>) {
        flat.entry(self.name.clone())
            .or_insert_with(|| self.version.to_string());
        for child in self.dependencies.values() {
            child.flatten_into(flat);
        }
    }
}

/// Dependency resolver over a registry client.
#[derive(Debug)]
pub struct Resolver {
    registry: RegistryClient,
    fetch_permits: Arc<Semaphore>,
}

impl Resolver {
    #[must_use]
    pub fn new(registry: RegistryClient) -> Self {
        Self::with_concurrency(registry, MAX_CONCURRENT_FETCHES)
    }

    /// Create a resolver with a custom registry fetch budget.
    #[must_use]
    pub fn with_concurrency(registry: RegistryClient, max_fetches: usize) -> Self {
        Self {
            registry,
            fetch_permits: Arc::new(Semaphore::new(max_fetches.max(1))),
        }
    }

    /// Resolve `(name, range)` depth-first on the calling task.
    ///
    /// No dedup: a name appearing in several branches is re-resolved in each.
    /// A dependency pointing back to an ancestor fails with `CycleDetected`.
    pub async fn resolve(&self, name: &str, range: &str) -> Result<ResolvedNode, ResolveError> {
        self.resolve_sequential(name.to_string(), range.to_string(), Vec::new())
            .await
    }

    /// Resolve `(name, range)` with per-manifest fan-out and shared dedup
    /// state scoped to this call.
    pub async fn resolve_concurrent(
        self: &Arc<Self>,
        name: &str,
        range: &str,
    ) -> Result<ResolvedNode, ResolveError> {
        let state = Arc::new(ResolutionState::new());
        Arc::clone(self)
            .resolve_shared(name.to_string(), range.to_string(), state, Vec::new())
            .await
    }

    fn resolve_sequential(
        &self,
        name: String,
        range: String,
        ancestors: Vec<String>,
    ) -> BoxFuture<'_, Result<ResolvedNode, ResolveError>> {
        async move {
            if ancestors.contains(&name) {
                return Err(cycle_error(&ancestors, &name));
            }

            let (version, manifest) = self.resolve_version(&name, &range).await?;

            let mut path = ancestors;
            path.push(name.clone());

            let mut dependencies = BTreeMap::new();
            for (dep_name, dep_range) in manifest.dependencies {
                let child = self
                    .resolve_sequential(dep_name.clone(), dep_range, path.clone())
                    .await?;
                dependencies.insert(dep_name, child);
            }

            Ok(ResolvedNode {
                name,
                version,
                dependencies,
            })
        }
        .boxed()
    }

    fn resolve_shared(
        self: Arc<Self>,
        name: String,
        range: String,
        state: Arc<ResolutionState>,
        ancestors: Vec<String>,
    ) -> BoxFuture<'static, Result<ResolvedNode, ResolveError>> {
        async move {
            // Dedup hit: reuse the claimed version if this branch's range
            // still allows it, otherwise the constraints conflict.
            if let Some(claimed) = state.resolved(&name) {
                return reuse_claimed(&name, &range, claimed);
            }

            if ancestors.contains(&name) {
                return Err(cycle_error(&ancestors, &name));
            }

            let packument = self.fetch_packument(&name).await?;
            let selected = select_highest(&name, &range, &packument)?;

            // Check-and-claim is one atomic operation. Losing the race means
            // another branch picked this name up while we were fetching; our
            // selection is discarded and the claimed version reused instead,
            // so a subtree is never resolved twice.
            let version = match state.claim(&name, selected.clone()) {
                Claim::Won => selected,
                Claim::Lost(existing) => return reuse_claimed(&name, &range, existing),
            };

            let manifest = self.fetch_manifest(&name, &version.to_string()).await?;

            let mut path = ancestors;
            path.push(name.clone());

            let mut tasks = JoinSet::new();
            for (dep_name, dep_range) in manifest.dependencies {
                tasks.spawn(Arc::clone(&self).resolve_shared(
                    dep_name,
                    dep_range,
                    Arc::clone(&state),
                    path.clone(),
                ));
            }

            // Drain every child task before returning. The first error wins;
            // siblings run to completion but their results are discarded.
            let mut dependencies = BTreeMap::new();
            let mut first_err: Option<ResolveError> = None;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(child)) => {
                        dependencies.insert(child.name.clone(), child);
                    }
                    Ok(Err(err)) => {
                        if first_err.is_none() {
                            first_err = Some(err);
                        }
                    }
                    Err(join_err) => {
                        if first_err.is_none() {
                            first_err = Some(ResolveError::internal(format!(
                                "resolver task failed: {join_err}"
                            )));
                        }
                    }
                }
            }
            if let Some(err) = first_err {
                return Err(err);
            }

            Ok(ResolvedNode {
                name,
                version,
                dependencies,
            })
        }
        .boxed()
    }

    /// Fetch metadata, pick the version, and fetch that version's manifest.
    async fn resolve_version(
        &self,
        name: &str,
        range: &str,
    ) -> Result<(Version, Manifest), ResolveError> {
        let packument = self.fetch_packument(name).await?;
        let version = select_highest(name, range, &packument)?;
        let manifest = self.fetch_manifest(name, &version.to_string()).await?;
        Ok((version, manifest))
    }

    async fn fetch_packument(&self, name: &str) -> Result<Packument, ResolveError> {
        let _permit = self
            .fetch_permits
            .acquire()
            .await
            .map_err(|_| ResolveError::internal("fetch semaphore closed"))?;
        self.registry.fetch_packument(name).await
    }

    async fn fetch_manifest(&self, name: &str, version: &str) -> Result<Manifest, ResolveError> {
        let _permit = self
            .fetch_permits
            .acquire()
            .await
            .map_err(|_| ResolveError::internal("fetch semaphore closed"))?;
        self.registry.fetch_manifest(name, version).await
    }
}

fn reuse_claimed(
    name: &str,
    range: &str,
    claimed: Version,
) -> Result<ResolvedNode, ResolveError> {
    if range_allows(name, range, &claimed)? {
        Ok(ResolvedNode::leaf(name.to_string(), claimed))
    } else {
        Err(ResolveError::ConflictingConstraints {
            name: name.to_string(),
            claimed,
            range: range.to_string(),
        })
    }
}

fn cycle_error(ancestors: &[String], name: &str) -> ResolveError {
    let mut path = ancestors.join(" -> ");
    if !path.is_empty() {
        path.push_str(" -> ");
    }
    path.push_str(name);
    ResolveError::CycleDetected { path }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-process mock registry serving canned packuments, counting fetches.
    #[derive(Default)]
    struct MockRegistry {
        packages: HashMap<String, serde_json::Value>,
        packument_hits: Mutex<HashMap<String, usize>>,
        manifest_hits: Mutex<HashMap<String, usize>>,
    }

    impl MockRegistry {
        fn packument_hits(&self, name: &str) -> usize {
            *self.packument_hits.lock().unwrap().get(name).unwrap_or(&0)
        }

        fn manifest_hits(&self, name: &str, version: &str) -> usize {
            *self
                .manifest_hits
                .lock()
                .unwrap()
                .get(&format!("{name}/{version}"))
                .unwrap_or(&0)
        }

        fn total_hits(&self) -> usize {
            self.packument_hits.lock().unwrap().values().sum::<usize>()
                + self.manifest_hits.lock().unwrap().values().sum::<usize>()
        }
    }

    /// Build a packument fixture: each entry is (version, direct deps).
    fn packument_json(name: &str, versions: &[(&str, &[(&str, &str)])]) -> serde_json::Value {
        let versions_obj: serde_json::Map<String, serde_json::Value> = versions
            .iter()
            .map(|(version, deps)| {
                let deps_obj: serde_json::Map<String, serde_json::Value> = deps
                    .iter()
                    .map(|(dep, range)| ((*dep).to_string(), serde_json::json!(range)))
                    .collect();
                (
                    (*version).to_string(),
                    serde_json::json!({
                        "name": name,
                        "version": version,
                        "dependencies": deps_obj,
                    }),
                )
            })
            .collect();
        serde_json::json!({ "versions": versions_obj })
    }

    async fn serve_packument(
        State(reg): State<Arc<MockRegistry>>,
        Path(name): Path<String>,
    ) -> axum::response::Response {
        *reg.packument_hits.lock().unwrap().entry(name.clone()).or_insert(0) += 1;
        match reg.packages.get(&name) {
            Some(packument) => Json(packument.clone()).into_response(),
            None => (StatusCode::NOT_FOUND, "Not found").into_response(),
        }
    }

    async fn serve_manifest(
        State(reg): State<Arc<MockRegistry>>,
        Path((name, version)): Path<(String, String)>,
    ) -> axum::response::Response {
        *reg.manifest_hits
            .lock()
            .unwrap()
            .entry(format!("{name}/{version}"))
            .or_insert(0) += 1;
        let manifest = reg
            .packages
            .get(&name)
            .and_then(|p| p.get("versions"))
            .and_then(|v| v.get(&version));
        match manifest {
            Some(manifest) => Json(manifest.clone()).into_response(),
            None => (StatusCode::NOT_FOUND, "Not found").into_response(),
        }
    }

    async fn spawn_mock(reg: Arc<MockRegistry>) -> String {
        let app = Router::new()
            .route("/:name", get(serve_packument))
            .route("/:name/:version", get(serve_manifest))
            .with_state(reg);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    async fn resolver_for(reg: &Arc<MockRegistry>) -> Arc<Resolver> {
        let base = spawn_mock(Arc::clone(reg)).await;
        Arc::new(Resolver::new(RegistryClient::new(&base).unwrap()))
    }

    fn registry_with(packages: Vec<serde_json::Value>) -> Arc<MockRegistry> {
        let packages = packages
            .into_iter()
            .map(|p| {
                let name = p["versions"]
                    .as_object()
                    .unwrap()
                    .values()
                    .next()
                    .unwrap()["name"]
                    .as_str()
                    .unwrap()
                    .to_string();
                (name, p)
            })
            .collect();
        Arc::new(MockRegistry {
            packages,
            ..MockRegistry::default()
        })
    }

    #[tokio::test]
    async fn sequential_resolves_transitive_chain() {
        let reg = registry_with(vec![
            packument_json("root", &[("1.0.0", &[("a", "^1.0.0")])]),
            packument_json("a", &[("1.2.0", &[("b", "~2.0.0")])]),
            packument_json("b", &[("2.0.3", &[]), ("2.1.0", &[])]),
        ]);
        let resolver = resolver_for(&reg).await;

        let tree = resolver.resolve("root", "^1.0.0").await.unwrap();
        assert_eq!(tree.version.to_string(), "1.0.0");
        let a = &tree.dependencies["a"];
        assert_eq!(a.version.to_string(), "1.2.0");
        let b = &a.dependencies["b"];
        assert_eq!(b.version.to_string(), "2.0.3");
        assert!(b.dependencies.is_empty());
    }

    #[tokio::test]
    async fn sequential_re_resolves_repeated_names() {
        let reg = registry_with(vec![
            packument_json("root", &[("1.0.0", &[("a", "^1.0.0"), ("b", "^1.0.0")])]),
            packument_json("a", &[("1.0.0", &[("c", "^1.0.0")])]),
            packument_json("b", &[("1.0.0", &[("c", "^1.0.0")])]),
            packument_json("c", &[("1.3.0", &[])]),
        ]);
        let resolver = resolver_for(&reg).await;

        let tree = resolver.resolve("root", "1.0.0").await.unwrap();
        assert_eq!(
            tree.dependencies["a"].dependencies["c"].version.to_string(),
            "1.3.0"
        );
        assert_eq!(
            tree.dependencies["b"].dependencies["c"].version.to_string(),
            "1.3.0"
        );
        // No dedup in the sequential variant: c was fetched once per branch
        assert_eq!(reg.packument_hits("c"), 2);
        assert_eq!(reg.manifest_hits("c", "1.3.0"), 2);
    }

    #[tokio::test]
    async fn sequential_cycle_is_detected() {
        let reg = registry_with(vec![
            packument_json("a", &[("1.0.0", &[("b", "^1.0.0")])]),
            packument_json("b", &[("1.0.0", &[("a", "^1.0.0")])]),
        ]);
        let resolver = resolver_for(&reg).await;

        let err = resolver.resolve("a", "^1.0.0").await.unwrap_err();
        match err {
            ResolveError::CycleDetected { path } => {
                assert_eq!(path, "a -> b -> a");
            }
            other => panic!("expected CycleDetected, got {other}"),
        }
    }

    #[tokio::test]
    async fn concurrent_diamond_resolves_shared_dep_once() {
        let reg = registry_with(vec![
            packument_json("root", &[("1.0.0", &[("a", "^1.0.0"), ("b", "^1.0.0")])]),
            packument_json("a", &[("1.0.0", &[("c", "^1.0.0")])]),
            packument_json("b", &[("1.0.0", &[("c", "^1.0.0")])]),
            packument_json("c", &[("1.0.0", &[]), ("1.3.0", &[]), ("2.0.0", &[])]),
        ]);
        let resolver = resolver_for(&reg).await;

        let tree = resolver.resolve_concurrent("root", "^1.0.0").await.unwrap();

        // Same version under both branches
        let under_a = &tree.dependencies["a"].dependencies["c"];
        let under_b = &tree.dependencies["b"].dependencies["c"];
        assert_eq!(under_a.version.to_string(), "1.3.0");
        assert_eq!(under_b.version, under_a.version);

        // Only the claim winner fetched c's manifest and recursed
        assert_eq!(reg.manifest_hits("c", "1.3.0"), 1);
    }

    #[tokio::test]
    async fn concurrent_conflicting_ranges_fail() {
        let reg = registry_with(vec![
            packument_json("root", &[("1.0.0", &[("a", "^1.0.0"), ("b", "^1.0.0")])]),
            packument_json("a", &[("1.0.0", &[("c", "^1.0.0")])]),
            packument_json("b", &[("1.0.0", &[("c", "^2.0.0")])]),
            packument_json("c", &[("1.3.0", &[]), ("2.0.0", &[])]),
        ]);
        let resolver = resolver_for(&reg).await;

        let err = resolver.resolve_concurrent("root", "^1.0.0").await.unwrap_err();
        assert!(
            matches!(err, ResolveError::ConflictingConstraints { ref name, .. } if name == "c"),
            "expected ConflictingConstraints for c, got {err}"
        );
    }

    #[tokio::test]
    async fn concurrent_cycle_terminates_via_dedup_reuse() {
        let reg = registry_with(vec![
            packument_json("a", &[("1.0.0", &[("b", "^1.0.0")])]),
            packument_json("b", &[("1.0.0", &[("a", "^1.0.0")])]),
        ]);
        let resolver = resolver_for(&reg).await;

        let tree = resolver.resolve_concurrent("a", "^1.0.0").await.unwrap();
        let b = &tree.dependencies["b"];
        // The back-edge reuses a's claimed version as a leaf
        let back = &b.dependencies["a"];
        assert_eq!(back.version, tree.version);
        assert!(back.dependencies.is_empty());
    }

    #[tokio::test]
    async fn no_compatible_version_fails_whole_resolution() {
        let reg = registry_with(vec![
            packument_json("root", &[("1.0.0", &[("a", "^1.0.0")])]),
            packument_json("a", &[("0.9.0", &[])]),
        ]);
        let resolver = resolver_for(&reg).await;

        for result in [
            resolver.resolve("root", "^1.0.0").await,
            resolver.resolve_concurrent("root", "^1.0.0").await,
        ] {
            let err = result.unwrap_err();
            assert!(
                matches!(err, ResolveError::NoCompatibleVersion { ref name, .. } if name == "a"),
                "expected NoCompatibleVersion for a, got {err}"
            );
        }
    }

    #[tokio::test]
    async fn unknown_package_is_not_found() {
        let reg = registry_with(vec![packument_json(
            "root",
            &[("1.0.0", &[("ghost", "^1.0.0")])],
        )]);
        let resolver = resolver_for(&reg).await;

        let err = resolver.resolve_concurrent("root", "^1.0.0").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(ref name) if name == "ghost"));
    }

    #[tokio::test]
    async fn concurrency_limit_of_one_still_resolves() {
        let reg = registry_with(vec![
            packument_json("root", &[("1.0.0", &[("a", "^1.0.0"), ("b", "^1.0.0")])]),
            packument_json("a", &[("1.0.0", &[])]),
            packument_json("b", &[("1.0.0", &[])]),
        ]);
        let base = spawn_mock(Arc::clone(&reg)).await;
        let resolver = Arc::new(Resolver::with_concurrency(
            RegistryClient::new(&base).unwrap(),
            1,
        ));

        let tree = resolver.resolve_concurrent("root", "^1.0.0").await.unwrap();
        assert_eq!(tree.dependencies.len(), 2);
        assert!(reg.total_hits() > 0);
    }

    #[tokio::test]
    async fn flatten_projects_name_to_version() {
        let reg = registry_with(vec![
            packument_json("root", &[("1.0.0", &[("a", "^1.0.0"), ("b", "^1.0.0")])]),
            packument_json("a", &[("1.0.0", &[("c", "^1.0.0")])]),
            packument_json("b", &[("1.0.0", &[("c", "^1.0.0")])]),
            packument_json("c", &[("1.3.0", &[])]),
        ]);
        let resolver = resolver_for(&reg).await;

        let tree = resolver.resolve_concurrent("root", "^1.0.0").await.unwrap();
        let flat = tree.flatten();
        assert_eq!(flat["root"], "1.0.0");
        assert_eq!(flat["a"], "1.0.0");
        assert_eq!(flat["b"], "1.0.0");
        assert_eq!(flat["c"], "1.3.0");
        assert_eq!(flat.len(), 4);
    }

    #[test]
    fn tree_serializes_nested() {
        let mut deps = BTreeMap::new();
        deps.insert(
            "a".to_string(),
            ResolvedNode::leaf("a".to_string(), Version::new(1, 2, 0)),
        );
        let tree = ResolvedNode {
            name: "root".to_string(),
            version: Version::new(1, 0, 0),
            dependencies: deps,
        };
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["name"], "root");
        assert_eq!(json["version"], "1.0.0");
        assert_eq!(json["dependencies"]["a"]["version"], "1.2.0");
    }
}
