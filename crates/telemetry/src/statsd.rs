//! Fire-and-forget statsd gauges over UDP.

use crate::Gauge;
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

/// Host name that turns the client into a no-op.
pub const DISABLED_HOST: &str = "null";

/// Sends gauges to a statsd daemon as `<prefix>.<name>:<value>|g`.
///
/// The socket is non-blocking and the endpoint is resolved once, up front;
/// a gauge that cannot be sent right away is dropped.
///
/// ```
/// use ocache_telemetry::{Gauge, StatsdClient};
///
/// let statsd = StatsdClient::new("null", 8125, "d1cache").unwrap();
/// assert!(!statsd.is_enabled());
/// statsd.gauge("QSize", 12.0);
/// ```
#[derive(Debug)]
pub struct StatsdClient {
    prefix: String,
    target: Option<(UdpSocket, SocketAddr)>,
}
impl StatsdClient {
    pub fn new(host: &str, port: u16, prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if host.is_empty() || host.eq_ignore_ascii_case(DISABLED_HOST) {
            tracing::debug!("Statsd disabled");
            return Ok(Self { prefix, target: None });
        }
        let invalid = || ErrorKind::InvalidEndpoint(format!("{host}:{port}"));
        let address = (host, port).to_socket_addrs().or_raise(invalid)?.next().ok_or_raise(invalid)?;
        let local: SocketAddr = match address {
            SocketAddr::V4(_) => ([0, 0, 0, 0], 0).into(),
            SocketAddr::V6(_) => ([0u16; 8], 0).into(),
        };
        let socket = UdpSocket::bind(local).map_err(ErrorKind::Io)?;
        socket.set_nonblocking(true).map_err(ErrorKind::Io)?;
        tracing::debug!(%address, prefix = %prefix, "Statsd enabled");
        Ok(Self { prefix, target: Some((socket, address)) })
    }

    /// A client that sends nothing.
    pub fn disabled(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), target: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    fn message(&self, name: &str, value: f64) -> String {
        format!("{}.{name}:{value}|g", self.prefix)
    }
}
impl Gauge for StatsdClient {
    fn gauge(&self, name: &str, value: f64) {
        let Some((socket, address)) = &self.target else {
            return;
        };
        if let Err(err) = socket.send_to(self.message(name, value).as_bytes(), address) {
            tracing::debug!(name, error = %err, "Dropped statsd gauge");
        }
    }
}
