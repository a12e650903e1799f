//! Semantic version helpers for Kubernetes release strings (`v1.15.3`).

use semver::Version;

use crate::error::ConfigError;

/// Strips a leading `v` from a release string.
#[must_use]
pub fn strip_prefix(version: &str) -> &str {
    let version = version.trim();
    version.strip_prefix('v').unwrap_or(version)
}

/// Parses a release string, with or without the leading `v`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if the string is not a semantic version.
pub fn parse(version: &str) -> Result<Version, ConfigError> {
    Version::parse(strip_prefix(version)).map_err(|e| ConfigError::InvalidValue {
        field: String::from("version"),
        value: format!("{version} ({e})"),
    })
}

/// Returns true if `a` is strictly lower than `b`.
///
/// # Errors
///
/// Returns an error if either side does not parse.
pub fn less_than(a: &str, b: &str) -> Result<bool, ConfigError> {
    Ok(parse(a)? < parse(b)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_less_than() {
        assert!(less_than("v1.15.3", "v1.16.0").expect("valid versions"));
        assert!(!less_than("v1.16.0", "v1.16.0").expect("valid versions"));
        assert!(!less_than("1.17.0", "v1.16.0").expect("valid versions"));
    }

    #[test]
    fn test_invalid_version() {
        assert!(less_than("latest", "v1.16.0").is_err());
        assert!(parse("v1.15").is_err());
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("v1.15.3"), "1.15.3");
        assert_eq!(strip_prefix("1.15.3"), "1.15.3");
    }
}
