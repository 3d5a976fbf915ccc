//! Transport dialing.
//!
//! The session runs over any tokio `AsyncRead + AsyncWrite` stream; this
//! module opens the plain TCP one from a broker address. Accepted forms:
//!
//! - `host:port`
//! - `host` (port 1883)
//! - `mqtt://host[:port]`, `tcp://host[:port]`

use tokio::net::TcpStream;
use tracing::debug;
use url::{Host, Url};

use crate::error::{Error, Result};

/// Transport type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// Plain TCP connection.
    Tcp,
}

impl TransportType {
    /// Parse transport type from URL scheme.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_lowercase().as_str() {
            "tcp" | "mqtt" | "" => Some(TransportType::Tcp),
            _ => None,
        }
    }

    /// Get default port for this transport type.
    pub fn default_port(&self) -> u16 {
        match self {
            TransportType::Tcp => 1883,
        }
    }
}

/// Broker endpoint resolved from an address string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub transport: TransportType,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse `addr` into an endpoint.
    pub fn parse(addr: &str) -> Result<Self> {
        let addr = addr.trim();
        if addr.is_empty() {
            return Err(Error::InvalidConfig("empty broker address".to_string()));
        }

        let url = if addr.contains("://") {
            Url::parse(addr)
        } else {
            Url::parse(&format!("mqtt://{}", addr))
        }
        .map_err(|e| Error::InvalidConfig(format!("invalid broker address {:?}: {}", addr, e)))?;

        let transport = TransportType::from_scheme(url.scheme()).ok_or_else(|| {
            Error::InvalidConfig(format!("unsupported transport scheme {:?}", url.scheme()))
        })?;

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => return Err(Error::InvalidConfig(format!("broker address {:?} has no host", addr))),
        };
        let port = url.port().unwrap_or_else(|| transport.default_port());

        Ok(Self { transport, host, port })
    }
}

/// Open a TCP connection to the broker at `addr`.
pub async fn dial(addr: &str) -> Result<TcpStream> {
    let endpoint = Endpoint::parse(addr)?;
    debug!("Dialing {}:{} ({:?})", endpoint.host, endpoint.port, endpoint.transport);

    let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let ep = Endpoint::parse("127.0.0.1:1884").unwrap();
        assert_eq!(ep.transport, TransportType::Tcp);
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 1884);
    }

    #[test]
    fn test_parse_default_port() {
        assert_eq!(Endpoint::parse("broker.local").unwrap().port, 1883);
        assert_eq!(Endpoint::parse("mqtt://broker.local").unwrap().port, 1883);
        assert_eq!(Endpoint::parse("tcp://broker.local:2000").unwrap().port, 2000);
    }

    #[test]
    fn test_parse_ipv6() {
        let ep = Endpoint::parse("mqtt://[::1]:1883").unwrap();
        assert_eq!(ep.host, "::1");
    }

    #[test]
    fn test_parse_rejects() {
        assert!(matches!(Endpoint::parse(""), Err(Error::InvalidConfig(_))));
        assert!(matches!(Endpoint::parse("wss://broker:443"), Err(Error::InvalidConfig(_))));
        assert!(matches!(Endpoint::parse("mqtt://:1883"), Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(matches!(dial(&addr.to_string()).await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_dial_connects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("mqtt://{}", listener.local_addr().unwrap());

        let (accepted, dialed) = tokio::join!(listener.accept(), dial(&addr));
        assert!(accepted.is_ok());
        assert!(dialed.is_ok());
    }
}
