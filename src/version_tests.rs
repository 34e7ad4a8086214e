// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `version.rs`

#[cfg(test)]
mod tests {
    use crate::version::{
        crosses_layout_boundary, is_version_below, parse_version, uses_legacy_layout,
    };

    #[test]
    fn test_parse_version_forms() {
        assert_eq!(parse_version("0.11.0").unwrap().to_string(), "0.11.0");
        assert_eq!(parse_version("0.9").unwrap().to_string(), "0.9.0");
        assert_eq!(parse_version("1").unwrap().to_string(), "1.0.0");
        assert_eq!(parse_version("0.6.2-2385.1a2b3c").unwrap().to_string(), "0.6.2");
        assert!(parse_version("latest").is_none());
        assert!(parse_version("").is_none());
    }

    #[test]
    fn test_is_version_below_compares_numerically() {
        assert!(is_version_below("0.6.1", "0.7.0"));
        assert!(is_version_below("0.9.0", "0.11.0"));
        assert!(!is_version_below("0.7.0", "0.7.0"));
        assert!(!is_version_below("0.10.0", "0.7.0"));
    }

    #[test]
    fn test_unparsable_versions_are_not_below() {
        assert!(!is_version_below("latest", "0.7.0"));
        assert!(!uses_legacy_layout("latest"));
    }

    #[test]
    fn test_layout_boundary() {
        assert!(uses_legacy_layout("0.6.1"));
        assert!(!uses_legacy_layout("0.7.0"));

        assert!(crosses_layout_boundary("0.6.1", "0.7.0"));
        assert!(crosses_layout_boundary("0.7.0", "0.6.1"));
        assert!(!crosses_layout_boundary("0.5.0", "0.6.0"));
        assert!(!crosses_layout_boundary("0.8.0", "0.11.0"));
    }
}
