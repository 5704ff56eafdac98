//! Validation of store-relative artifact paths.
//!
//! Artifact paths are recorded in the cache index and read back later (by the
//! enrichment job, or by anyone poking at the index by hand). They must never
//! be able to point outside the content root.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates and normalizes a store-relative path.
///
/// Redundant separators and `.` components are dropped, `..` is resolved as
/// long as it never climbs above the root. Null bytes, drive prefixes, and
/// paths that normalize to nothing are rejected with
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use ocache_storage::validate_path;
///
/// assert!(validate_path("n/n242n_sysm.xml").is_ok());
/// assert!(validate_path("../cache.sqdb").is_err());
/// assert_eq!(validate_path("n//./n242n_sysm.xml").unwrap(), Path::new("n/n242n_sysm.xml"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(path.to_path_buf());
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes survive Path::components() on Unix but truncate
                // the path once it reaches a syscall.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(invalid()),
        false => Ok(components.into_iter().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("n/n242n_sysm.xml", "n/n242n_sysm.xml")]
    #[case("n//n242n_sysm.xml", "n/n242n_sysm.xml")]
    #[case("./n/./n242n_content.xml", "n/n242n_content.xml")]
    #[case("n/other/../n242n_sysm.xml", "n/n242n_sysm.xml")]
    #[case("/n/n242n_sysm.xml", "n/n242n_sysm.xml")]
    #[case("n/", "n")]
    fn test_valid_paths(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(input).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("//")]
    #[case("..")]
    #[case("../cache.sqdb")]
    #[case("n/../../cache.sqdb")]
    #[case("n\0n242n_sysm.xml")]
    fn test_invalid_paths(#[case] input: &str) {
        let err = validate(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }
}
