//! Version range parsing and highest-satisfying-version selection.
//!
//! npm range syntax is wider than what `semver::VersionReq` accepts, so
//! ranges are normalized first:
//! - OR ranges: `^1.0.0 || ^2.0.0`
//! - hyphen ranges: `1.0.0 - 2.0.0`
//! - x-ranges: `1.x`, `1.2.x`, `*`
//! - space-separated comparators: `>= 2.1.2 < 3.0.0` (AND)
//! - bare full versions: `1.2.3` means exactly `1.2.3`

use semver::{Version, VersionReq};

use crate::error::ResolveError;
use crate::registry::Packument;

/// A parsed range: one or more OR-ed `VersionReq` alternatives.
#[derive(Debug, Clone)]
pub struct RangeSet {
    reqs: Vec<VersionReq>,
}

impl RangeSet {
    /// True if `version` satisfies any alternative.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.reqs.iter().any(|req| req.matches(version))
    }
}

/// Parse an npm range expression.
///
/// An OR range is invalid only if no alternative parses.
pub fn parse_range(name: &str, range: &str) -> Result<RangeSet, ResolveError> {
    let alternatives: Vec<&str> = range.split("||").map(str::trim).collect();

    let mut reqs = Vec::new();
    let mut last_reason = String::new();
    for alt in &alternatives {
        match parse_single(alt) {
            Ok(req) => reqs.push(req),
            Err(reason) => last_reason = reason,
        }
    }

    if reqs.is_empty() {
        return Err(ResolveError::invalid_constraint(name, range, last_reason));
    }

    Ok(RangeSet { reqs })
}

/// Check whether an already-resolved version still satisfies a range.
///
/// Used to validate dedup reuse across branches.
pub fn range_allows(name: &str, range: &str, version: &Version) -> Result<bool, ResolveError> {
    Ok(parse_range(name, range)?.matches(version))
}

/// Select the highest published version satisfying `range`.
///
/// Version keys that are not valid semver are skipped silently; they never
/// match and never fail the call by themselves. Fails with
/// `NoCompatibleVersion` when nothing satisfies the range.
pub fn select_highest(
    name: &str,
    range: &str,
    packument: &Packument,
) -> Result<Version, ResolveError> {
    let set = parse_range(name, range)?;

    let best = packument
        .versions
        .keys()
        .filter_map(|key| Version::parse(key).ok())
        .filter(|v| set.matches(v))
        .max();

    best.ok_or_else(|| ResolveError::no_compatible_version(name, range))
}

/// Parse one non-OR alternative, normalizing npm-specific syntax.
fn parse_single(range: &str) -> Result<VersionReq, String> {
    let range = range.trim();

    // Empty range means "any version"
    if range.is_empty() {
        return Ok(VersionReq::STAR);
    }

    // Hyphen range: "1.0.0 - 2.0.0" -> ">=1.0.0, <=2.0.0"
    if let Some((start, end)) = range.split_once(" - ") {
        let converted = format!(">={}, <={}", start.trim(), end.trim());
        return VersionReq::parse(&converted).map_err(|e| e.to_string());
    }

    // x-range: "1.x" / "1.2.x" / "*"
    if is_x_range(range) {
        return VersionReq::parse(&convert_x_range(range)).map_err(|e| e.to_string());
    }

    // A bare full version means exactly that version, not a caret range
    if let Ok(exact) = Version::parse(range) {
        return VersionReq::parse(&format!("={exact}")).map_err(|e| e.to_string());
    }

    // npm allows space-separated comparators as AND; semver wants commas
    let converted = join_comparators(range);
    VersionReq::parse(&converted).map_err(|e| e.to_string())
}

/// True when the range is built only of digits, dots, and x/* wildcards.
fn is_x_range(range: &str) -> bool {
    (range.contains(['x', 'X', '*']))
        && range
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'x' | 'X' | '*'))
}

/// Convert an x-range to comparator form.
fn convert_x_range(range: &str) -> String {
    if matches!(range, "*" | "x" | "X") {
        return ">=0.0.0".to_string();
    }

    let parts: Vec<&str> = range.split('.').collect();
    match parts.as_slice() {
        [major, "x" | "X" | "*"] => {
            if let Ok(m) = major.parse::<u64>() {
                return format!(">={m}.0.0, <{}.0.0", m + 1);
            }
        }
        [major, minor, "x" | "X" | "*"] => {
            if let (Ok(m), Ok(n)) = (major.parse::<u64>(), minor.parse::<u64>()) {
                return format!(">={m}.{n}.0, <{m}.{}.0", n + 1);
            }
        }
        _ => {}
    }

    // Fallback: treat wildcards as zeros
    range.replace(['x', 'X', '*'], "0")
}

/// Join whitespace-separated comparators with commas.
///
/// A token made only of operator characters attaches to the token after it,
/// so `>= 2.1.2 < 3.0.0` and `>=2.1.2 <3.0.0` both become `>=2.1.2, <3.0.0`.
fn join_comparators(range: &str) -> String {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op: Option<String> = None;

    for token in range.split_whitespace() {
        let is_bare_op = token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^'));
        if is_bare_op {
            pending_op = Some(token.to_string());
        } else if let Some(op) = pending_op.take() {
            comparators.push(format!("{op}{token}"));
        } else {
            comparators.push(token.to_string());
        }
    }
    if let Some(op) = pending_op {
        comparators.push(op);
    }

    comparators.join(", ")
}
