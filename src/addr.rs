//! Server addressing scheme: `tcp://host:port/path`, `ssl://host:port/path`
//! and `local:///path/to/socket`.
//!
//! TLS addresses parse so that configuration can carry them, but the
//! encrypted transport itself is an external provider; connecting or binding
//! one reports an unsupported-transport error.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A parsed server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAddress {
    /// Plain stream socket.
    Tcp { host: String, port: u16, path: String },
    /// Encrypted stream socket (recognized, not implemented here).
    Tls { host: String, port: u16, path: String },
    /// Local (Unix domain) socket; the URL path is the filesystem path.
    Local { socket_path: PathBuf },
}

#[derive(Debug)]
pub enum AddressError {
    Parse(url::ParseError),
    UnknownScheme(String),
    MissingHost,
    MissingPort,
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "invalid address: {e}"),
            Self::UnknownScheme(s) => write!(f, "unknown scheme: {s}"),
            Self::MissingHost => write!(f, "address has no host"),
            Self::MissingPort => write!(f, "address has no port"),
        }
    }
}

impl std::error::Error for AddressError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<url::ParseError> for AddressError {
    fn from(e: url::ParseError) -> Self {
        Self::Parse(e)
    }
}

impl ServerAddress {
    /// The HTTP path prefix this address points at; always starts with `/`.
    pub fn base_path(&self) -> &str {
        match self {
            Self::Tcp { path, .. } | Self::Tls { path, .. } => path,
            Self::Local { .. } => "/",
        }
    }

    /// Same address with a different port; used to report the actual port
    /// after binding port 0.
    pub fn with_port(&self, new_port: u16) -> Self {
        match self {
            Self::Tcp { host, path, .. } => Self::Tcp {
                host: host.clone(),
                port: new_port,
                path: path.clone(),
            },
            Self::Tls { host, path, .. } => Self::Tls {
                host: host.clone(),
                port: new_port,
                path: path.clone(),
            },
            Self::Local { socket_path } => Self::Local {
                socket_path: socket_path.clone(),
            },
        }
    }
}

impl FromStr for ServerAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = url::Url::parse(s)?;
        let path = if url.path().is_empty() {
            "/".to_string()
        } else {
            url.path().to_string()
        };
        match url.scheme() {
            "tcp" => Ok(Self::Tcp {
                host: url.host_str().ok_or(AddressError::MissingHost)?.to_string(),
                port: url.port().ok_or(AddressError::MissingPort)?,
                path,
            }),
            "ssl" => Ok(Self::Tls {
                host: url.host_str().ok_or(AddressError::MissingHost)?.to_string(),
                port: url.port().ok_or(AddressError::MissingPort)?,
                path,
            }),
            "local" => Ok(Self::Local {
                socket_path: PathBuf::from(url.path()),
            }),
            other => Err(AddressError::UnknownScheme(other.to_string())),
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port, path } => write!(f, "tcp://{host}:{port}{path}"),
            Self::Tls { host, port, path } => write!(f, "ssl://{host}:{port}{path}"),
            Self::Local { socket_path } => write!(f, "local://{}", socket_path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_with_path() {
        let addr: ServerAddress = "tcp://127.0.0.1:3142/obj".parse().unwrap();
        assert_eq!(
            addr,
            ServerAddress::Tcp {
                host: "127.0.0.1".into(),
                port: 3142,
                path: "/obj".into(),
            }
        );
        assert_eq!(addr.base_path(), "/obj");
    }

    #[test]
    fn parses_local_socket_path() {
        let addr: ServerAddress = "local:///tmp/gate.sock".parse().unwrap();
        match addr {
            ServerAddress::Local { socket_path } => {
                assert_eq!(socket_path, PathBuf::from("/tmp/gate.sock"))
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!("ftp://example.com:21/".parse::<ServerAddress>().is_err());
    }

    #[test]
    fn missing_port_is_an_error() {
        assert!("tcp://example.com/".parse::<ServerAddress>().is_err());
    }
}
