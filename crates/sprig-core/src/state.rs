//! Shared per-request resolution state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use semver::Version;

/// Outcome of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// This branch claimed the name; it owns resolving the subtree.
    Won,
    /// Another branch claimed the name first, at this version.
    Lost(Version),
}

/// Record of packages already resolved within one top-level request.
///
/// At most one version per package name; the first branch to claim a name
/// wins. The check and the write happen under a single lock, so two branches
/// can never both see a name as unclaimed.
#[derive(Debug, Default)]
pub struct ResolutionState {
    inner: Mutex<HashMap<String, Version>>,
}

impl ResolutionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The version already claimed for `name`, if any.
    #[must_use]
    pub fn resolved(&self, name: &str) -> Option<Version> {
        self.inner.lock().expect("resolution state poisoned").get(name).cloned()
    }

    /// Atomically claim `name` at `version` unless it is already claimed.
    pub fn claim(&self, name: &str, version: Version) -> Claim {
        let mut inner = self.inner.lock().expect("resolution state poisoned");
        match inner.get(name) {
            Some(existing) => Claim::Lost(existing.clone()),
            None => {
                inner.insert(name.to_string(), version);
                Claim::Won
            }
        }
    }

    /// Sorted snapshot of everything claimed so far.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Version> {
        self.inner
            .lock()
            .expect("resolution state poisoned")
            .iter()
            .map(|(name, version)| (name.clone(), version.clone()))
            .collect()
    }
}
