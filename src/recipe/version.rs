// src/recipe/version.rs

//! Recipe version strings
//!
//! Versions are dot-separated non-negative integers compared as tuples, so
//! `1.10 > 1.9` and `1.2.0 > 1.2`.

use crate::error::{Error, Result};

/// Parse `N(.N)*` into its components; the empty string is version `0`
pub fn parse_version(version: &str) -> Result<Vec<u32>> {
    let version = version.trim();
    if version.is_empty() {
        return Ok(vec![0]);
    }
    version
        .split('.')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::InvalidVersion(version.to_string()));
            }
            part.parse::<u32>()
                .map_err(|_| Error::InvalidVersion(version.to_string()))
        })
        .collect()
}

pub fn format_version(version: &[u32]) -> String {
    version
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("1.2.3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_version("10").unwrap(), vec![10]);
        assert_eq!(parse_version("").unwrap(), vec![0]);
    }

    #[test]
    fn test_invalid_versions() {
        for bad in ["1..2", "1.a", "v1", "1.2.", "-1", "1.+2", "99999999999"] {
            assert!(
                matches!(parse_version(bad), Err(Error::InvalidVersion(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_tuple_ordering() {
        let v = |s| parse_version(s).unwrap();
        assert!(v("1.10") > v("1.9"));
        assert!(v("1.2.0") > v("1.2"));
        assert!(v("2") > v("1.99.99"));
        assert_eq!(format_version(&v("1.2.3")), "1.2.3");
    }
}
