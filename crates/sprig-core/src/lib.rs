#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

//! Dependency resolution engine: npm registry client, highest-satisfying
//! version selection, and sequential/concurrent transitive resolution.

pub mod error;
pub mod registry;
pub mod resolver;
pub mod state;
pub mod version;

pub use error::ResolveError;
pub use registry::{Manifest, Packument, RegistryClient, DEFAULT_REGISTRY, REGISTRY_ENV};
pub use resolver::{ResolvedNode, Resolver, MAX_CONCURRENT_FETCHES};
pub use state::{Claim, ResolutionState};
pub use version::{parse_range, range_allows, select_highest, RangeSet};
