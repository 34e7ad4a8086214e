// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Pravega version parsing and comparison.
//!
//! Pravega image tags are mostly plain semantic versions (`0.11.0`), but short forms
//! (`0.7`), `v`-prefixed tags and build suffixes (`0.6.0-2385.abc`) show up in the wild.
//! Anything that still fails to parse (for example `latest`) is treated as "not below"
//! any boundary, so it never selects a legacy layout.

use crate::constants::SEGMENT_STORE_LAYOUT_VERSION;
use semver::Version;

/// Parse a version tag into a [`Version`], normalizing short and suffixed forms.
///
/// # Example
///
/// ```rust
/// use pravega_operator::version::parse_version;
///
/// assert_eq!(parse_version("0.7").unwrap().to_string(), "0.7.0");
/// assert_eq!(parse_version("v0.6.1-2385.abc").unwrap().to_string(), "0.6.1");
/// assert!(parse_version("latest").is_none());
/// ```
#[must_use]
pub fn parse_version(tag: &str) -> Option<Version> {
    let trimmed = tag.trim().trim_start_matches('v');
    let version_part = trimmed.split('-').next().unwrap_or(trimmed);

    let normalized = match version_part.matches('.').count() {
        0 => format!("{version_part}.0.0"),
        1 => format!("{version_part}.0"),
        _ => version_part.to_string(),
    };

    Version::parse(&normalized).ok()
}

/// Returns `true` when `version` is strictly lower than `boundary`.
///
/// Unparsable versions are never below anything.
#[must_use]
pub fn is_version_below(version: &str, boundary: &str) -> bool {
    match (parse_version(version), parse_version(boundary)) {
        (Some(version), Some(boundary)) => version < boundary,
        _ => false,
    }
}

/// Returns `true` when `version` runs the pre-0.7.0 segment store layout.
#[must_use]
pub fn uses_legacy_layout(version: &str) -> bool {
    is_version_below(version, SEGMENT_STORE_LAYOUT_VERSION)
}

/// Returns `true` when moving from `from` to `to` changes the segment store layout,
/// which requires the one-time statefulset migration.
#[must_use]
pub fn crosses_layout_boundary(from: &str, to: &str) -> bool {
    uses_legacy_layout(from) != uses_legacy_layout(to)
}
