//! Security origins and their storage identifiers

use std::fmt;

use url::Url;

use crate::{Result, StorageError};

/// Web origin that owns a storage area
///
/// `port` is `None` when the URL uses its scheme's default port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecurityOrigin {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl SecurityOrigin {
    /// Create new origin
    pub fn new(scheme: &str, host: &str, port: Option<u16>) -> Self {
        Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        }
    }

    /// Origin of a parsed URL
    ///
    /// `file:` URLs share one origin with an empty host. Other URLs must
    /// have a host.
    pub fn from_url(url: &Url) -> Result<Self> {
        if url.scheme() == "file" {
            return Ok(Self::new("file", "", None));
        }
        let host = url
            .host_str()
            .ok_or_else(|| StorageError::InvalidOrigin(format!("{url} has no host")))?;
        Ok(Self::new(url.scheme(), host, url.port()))
    }

    /// Parse from URL string
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|e| StorageError::InvalidOrigin(format!("{input}: {e}")))?;
        Self::from_url(&url)
    }

    /// Inverse of [`database_identifier`](Self::database_identifier)
    pub fn from_database_identifier(identifier: &str) -> Result<Self> {
        let invalid = || StorageError::InvalidOrigin(identifier.to_string());
        // Schemes never contain '_', hosts may
        let (scheme, rest) = identifier.split_once('_').ok_or_else(invalid)?;
        let (host, port) = rest.rsplit_once('_').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if scheme.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(scheme, host, (port != 0).then_some(port)))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Stable `scheme_host_port` name used for backing files and tracker rows.
    /// The port is 0 when it is the scheme default.
    pub fn database_identifier(&self) -> String {
        format!("{}_{}_{}", self.scheme, self.host, self.port.unwrap_or(0))
    }
}

impl fmt::Display for SecurityOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_default_port() {
        let origin = SecurityOrigin::parse("https://Example.com/path?q=1").unwrap();
        assert_eq!(origin.host(), "example.com");
        assert_eq!(origin.port(), None);
        assert_eq!(origin.database_identifier(), "https_example.com_0");
        assert_eq!(origin.to_string(), "https://example.com");
    }

    #[test]
    fn test_identifier_explicit_port() {
        let origin = SecurityOrigin::parse("http://localhost:8080/").unwrap();
        assert_eq!(origin.database_identifier(), "http_localhost_8080");

        // Default port spelled out is still the default
        let origin = SecurityOrigin::parse("https://example.com:443/").unwrap();
        assert_eq!(origin.database_identifier(), "https_example.com_0");
    }

    #[test]
    fn test_identifier_roundtrip_with_underscore_host() {
        let origin = SecurityOrigin::new("http", "my_host", Some(81));
        let parsed = SecurityOrigin::from_database_identifier(&origin.database_identifier()).unwrap();
        assert_eq!(parsed, origin);
    }

    #[test]
    fn test_file_origin() {
        let origin = SecurityOrigin::parse("file:///home/user/index.html").unwrap();
        assert_eq!(origin.database_identifier(), "file__0");
        let parsed = SecurityOrigin::from_database_identifier("file__0").unwrap();
        assert_eq!(parsed, origin);
    }

    #[test]
    fn test_invalid_origins() {
        assert!(matches!(SecurityOrigin::parse("not a url"), Err(StorageError::InvalidOrigin(_))));
        assert!(SecurityOrigin::parse("data:text/plain,hi").is_err());
        assert!(SecurityOrigin::from_database_identifier("https_example.com").is_err());
        assert!(SecurityOrigin::from_database_identifier("https_example.com_http").is_err());
    }
}
