use crate::base::neterror::NetError;
use crate::http::requestbody::HyperBody;
use crate::socket::connectjob::ConnectJob;
use crate::socket::pool::{Connector, Lease, Poolable};
use crate::socket::route::Route;
use http::{Request, Response};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::future::Future;
use tokio::spawn;

/// A pooled HTTP/1.1 connection lease.
pub type ConnectionLease = Lease<HttpStreamFactory>;

/// Wraps the underlying HTTP/1.1 protocol stream.
/// Equivalent to net::HttpStream.
pub struct HttpStream {
    sender: http1::SendRequest<HyperBody>,
}

impl std::fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStream").field("closed", &self.sender.is_closed()).finish()
    }
}

impl HttpStream {
    pub async fn send_request(&mut self, req: Request<HyperBody>) -> Result<Response<Incoming>, NetError> {
        // The previous response on a reused connection may still be settling
        self.sender.ready().await.map_err(|e| {
            tracing::debug!(error = %e, "connection not ready");
            NetError::ConnectionClosed
        })?;
        self.sender.send_request(req).await.map_err(|e| {
            tracing::debug!(error = %e, "request failed");
            classify_hyper_error(&e)
        })
    }
}

impl Poolable for HttpStream {
    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

fn classify_hyper_error(e: &hyper::Error) -> NetError {
    if e.is_timeout() {
        NetError::ConnectionTimedOut
    } else if e.is_parse() || e.is_parse_status() {
        NetError::InvalidResponse
    } else if e.is_incomplete_message() {
        NetError::EmptyResponse
    } else if e.is_user() {
        NetError::HttpBodyError
    } else {
        NetError::ConnectionClosed
    }
}

/// Opens HTTP/1.1 connections for the pool: TCP (and TLS) through the
/// connect job, then the hyper handshake.
#[derive(Clone, Default)]
pub struct HttpStreamFactory {
    connect_job: ConnectJob,
}

impl HttpStreamFactory {
    pub fn new(connect_job: ConnectJob) -> Self {
        Self { connect_job }
    }
}

impl Connector for HttpStreamFactory {
    type Connection = HttpStream;

    fn connect(&self, route: &Route) -> impl Future<Output = Result<HttpStream, NetError>> + Send {
        let job = self.connect_job.clone();
        let route = route.clone();
        async move {
            // 1. Get raw socket
            let socket = job.connect(&route).await?;

            // 2. Handshake
            let io = TokioIo::new(socket);
            let (sender, conn) = http1::handshake(io).await.map_err(|e| {
                tracing::debug!(route = %route, error = %e, "HTTP/1.1 handshake failed");
                NetError::ConnectionFailed
            })?;

            // 3. Spawn the connection driver
            spawn(async move {
                if let Err(e) = conn.await {
                    tracing::debug!(error = %e, "connection driver exited with error");
                }
            });

            Ok(HttpStream { sender })
        }
    }
}
