//! Resolution error types.

use thiserror::Error;

/// Error type for registry access and dependency resolution.
///
/// Every failure mode stays distinguishable here even though the HTTP edge
/// collapses most of them to a single status code.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("invalid version constraint '{range}' for {name}: {reason}")]
    InvalidConstraint {
        name: String,
        range: String,
        reason: String,
    },

    #[error("package not found: {0}")]
    NotFound(String),

    #[error("no version of {name} satisfies range '{range}'")]
    NoCompatibleVersion { name: String, range: String },

    #[error("registry request failed: {0}")]
    Network(String),

    #[error("malformed registry response for {name}: {reason}")]
    Parse { name: String, reason: String },

    #[error("dependency cycle detected: {path}")]
    CycleDetected { path: String },

    #[error("conflicting constraints for {name}: {claimed} already selected, but '{range}' is required")]
    ConflictingConstraints {
        name: String,
        claimed: semver::Version,
        range: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResolveError {
    pub fn invalid_constraint(
        name: impl Into<String>,
        range: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidConstraint {
            name: name.into(),
            range: range.into(),
            reason: reason.into(),
        }
    }

    pub fn no_compatible_version(name: impl Into<String>, range: impl Into<String>) -> Self {
        Self::NoCompatibleVersion {
            name: name.into(),
            range: range.into(),
        }
    }

    pub fn parse(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Network(format!("request timed out: {e}"))
        } else if e.is_connect() {
            Self::Network(format!("connection failed: {e}"))
        } else if e.is_decode() {
            Self::Parse {
                name: e
                    .url()
                    .map(|u| u.path().trim_start_matches('/').to_string())
                    .unwrap_or_else(|| "<unknown>".to_string()),
                reason: e.to_string(),
            }
        } else {
            Self::Network(e.to_string())
        }
    }
}
