//! Port validation and host resolution.

use std::net::{IpAddr, SocketAddr};

use tokio::net::lookup_host;
use tracing::debug;

use crate::error::{TcpError, TcpResult};

/// Check that `port` fits in `0..=65535`.
///
/// Accepts any integer so that out-of-range input from callers is reported as
/// [`TcpError::OutOfRange`] rather than being truncated.
pub fn validate_port(port: impl Into<i64>) -> TcpResult<u16> {
    let port = port.into();
    u16::try_from(port).map_err(|_| TcpError::OutOfRange(port))
}

/// Resolve `host` and pair the first address with an already validated port.
pub(crate) async fn resolve(host: &str, port: u16) -> TcpResult<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let mut addrs = lookup_host((host, port))
        .await
        .map_err(|e| TcpError::InvalidAddress(format!("{host}: {e}")))?;

    let addr = addrs
        .next()
        .ok_or_else(|| TcpError::InvalidAddress(format!("{host}: no addresses found")))?;
    debug!(%host, %addr, "Resolved host");
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_port_bounds() {
        assert_eq!(validate_port(0).unwrap(), 0);
        assert_eq!(validate_port(65535).unwrap(), 65535);
        assert!(matches!(validate_port(-1), Err(TcpError::OutOfRange(-1))));
        assert!(matches!(
            validate_port(65536),
            Err(TcpError::OutOfRange(65536))
        ));
        assert!(matches!(
            validate_port(i64::MAX),
            Err(TcpError::OutOfRange(i64::MAX))
        ));
    }

    #[tokio::test]
    async fn test_resolve_literal_ip() {
        let addr = resolve("127.0.0.1", 9000).await.unwrap();
        assert_eq!(addr, "127.0.0.1:9000".parse().unwrap());

        let addr = resolve("::1", 9000).await.unwrap();
        assert_eq!(addr, "[::1]:9000".parse().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve("localhost", 80).await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 80);
    }

    #[tokio::test]
    async fn test_resolve_garbage_host() {
        let result = resolve("no such host.invalid", 80).await;
        assert!(matches!(result, Err(TcpError::InvalidAddress(_))));
    }
}
