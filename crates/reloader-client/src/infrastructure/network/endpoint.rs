//! Server endpoint parsing.
//!
//! The client can be pointed at the monitor in two ways:
//!
//! | Form          | Example                              |
//! |---------------|--------------------------------------|
//! | host + port   | `192.168.1.10:5500`, `[fe80::1]:5500` |
//! | absolute URL  | `tcp://devbox:5500`, `http://10.0.0.2:5500/reload` |
//!
//! For URLs only the authority is used.  `tcp` URLs must carry a port;
//! `http` URLs default to port 80 like any HTTP URL.  The path, query and
//! fragment are ignored.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Default port of the monitor.
pub const DEFAULT_PORT: u16 = 5500;

/// Error type for endpoint parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("endpoint is empty")]
    Empty,
    #[error("endpoint {0:?} has no host")]
    MissingHost(String),
    #[error("endpoint {0:?} has no port")]
    MissingPort(String),
    #[error("invalid port in endpoint {0:?}")]
    InvalidPort(String),
    #[error("unsupported URL scheme {0:?} (expected tcp or http)")]
    UnsupportedScheme(String),
}

/// Host and port of the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint from a host name or IP literal and a port.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Empty`] for a blank host.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, EndpointError> {
        let host = host.into();
        let host = host.trim().trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(EndpointError::Empty);
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Parses an absolute `tcp://` or `http://` URL.
    ///
    /// # Errors
    ///
    /// Returns an [`EndpointError`] describing the first problem found.
    pub fn from_url(url: &str) -> Result<Self, EndpointError> {
        let url = url.trim();
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| EndpointError::UnsupportedScheme(String::new()))?;
        let default_port = match scheme.to_ascii_lowercase().as_str() {
            "tcp" => None,
            "http" => Some(80),
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        };

        let authority = rest
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default();
        // Drop any `user:password@` prefix.
        let authority = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);

        parse_authority(authority, default_port, url)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    /// Accepts either `host:port` or an absolute URL.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EndpointError::Empty);
        }
        if s.contains("://") {
            Self::from_url(s)
        } else {
            parse_authority(s, None, s)
        }
    }
}

/// Splits `host[:port]` / `[v6][:port]`.  `original` is only used in errors.
fn parse_authority(
    authority: &str,
    default_port: Option<u16>,
    original: &str,
) -> Result<Endpoint, EndpointError> {
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| EndpointError::MissingHost(original.to_string()))?;
        let port = match after.strip_prefix(':') {
            Some(port) => Some(port),
            None if after.is_empty() => None,
            None => return Err(EndpointError::InvalidPort(original.to_string())),
        };
        (host, port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.trim().is_empty() {
        return Err(EndpointError::MissingHost(original.to_string()));
    }

    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| EndpointError::InvalidPort(original.to_string()))?,
        None => default_port.ok_or_else(|| EndpointError::MissingPort(original.to_string()))?,
    };

    Endpoint::new(host, port)
}
