use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::socket::route::Route;
use crate::socket::stream::BoxedSocket;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::net::TcpStream;

/// Upgrades a connected TCP socket to TLS.
///
/// The handshake itself lives outside this crate; plug an implementation
/// in through the client builder to enable `https` routes.
pub trait TlsUpgrade: Send + Sync + 'static {
    fn upgrade<'a>(
        &'a self,
        host: &'a str,
        socket: BoxedSocket,
    ) -> BoxFuture<'a, Result<BoxedSocket, NetError>>;
}

/// Manages the connection process: DNS -> TCP -> (TLS).
/// Roughly equivalent to net::ConnectJob.
#[derive(Clone, Default)]
pub struct ConnectJob {
    tls: Option<Arc<dyn TlsUpgrade>>,
}

impl ConnectJob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tls(tls: Arc<dyn TlsUpgrade>) -> Self {
        Self { tls: Some(tls) }
    }

    pub async fn connect(&self, route: &Route) -> Result<BoxedSocket, NetError> {
        if route.is_secure() && self.tls.is_none() {
            tracing::debug!(route = %route, "no TLS upgrader configured");
            return Err(NetError::UnknownUrlScheme);
        }

        // 1. DNS Resolution
        let addr_str = format!("{}:{}", route.host(), route.port());
        let addrs: Vec<_> = tokio::net::lookup_host(&addr_str)
            .await
            .map_err(|_| NetError::NameNotResolved)?
            .collect();

        // 2. TCP Connect, first address that answers wins
        let mut last_err = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }

        let stream = match (stream, last_err) {
            (Some(s), _) => s,
            (None, Some(e)) => return Err(e).connection_context(route.host(), route.port()),
            (None, None) => return Err(NetError::NameNotResolved),
        };
        // Best effort; a failure here only affects latency.
        let _ = stream.set_nodelay(true);

        tracing::debug!(route = %route, "TCP connection established");
        let socket = BoxedSocket::new(stream);

        // 3. TLS Handshake (if https)
        match &self.tls {
            Some(tls) if route.is_secure() => tls.upgrade(route.host(), socket).await,
            _ => Ok(socket),
        }
    }
}
