//! Backend-selecting connection strings.

use recserve_common::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

const MEMORY_SCHEME: &str = "memory://";
const REDB_SCHEME: &str = "redb://";

/// Parsed storage endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreUrl {
    /// Process-local, lost on exit
    Memory,
    /// Single redb file
    Redb(PathBuf),
}

impl FromStr for StoreUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.strip_prefix(MEMORY_SCHEME).is_some() {
            return Ok(Self::Memory);
        }
        if let Some(path) = s.strip_prefix(REDB_SCHEME) {
            if path.is_empty() {
                return Err(Error::configuration(format!("missing path in {s:?}")));
            }
            return Ok(Self::Redb(PathBuf::from(path)));
        }
        Err(Error::configuration(format!(
            "unsupported storage endpoint {s:?} (expected {MEMORY_SCHEME} or {REDB_SCHEME}<path>)"
        )))
    }
}

impl fmt::Display for StoreUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str(MEMORY_SCHEME),
            Self::Redb(path) => write!(f, "{REDB_SCHEME}{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_store_url() {
        assert_eq!("memory://".parse::<StoreUrl>().unwrap(), StoreUrl::Memory);
        assert_eq!(
            "redb:///tmp/cache.redb".parse::<StoreUrl>().unwrap(),
            StoreUrl::Redb(PathBuf::from("/tmp/cache.redb"))
        );
        assert!(matches!(
            "redb://".parse::<StoreUrl>(),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            "mysql://root@localhost/recserve".parse::<StoreUrl>(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_display_roundtrip() {
        let url = StoreUrl::Redb(PathBuf::from("data/meta.redb"));
        assert_eq!(url.to_string(), "redb://data/meta.redb");
    }
}
