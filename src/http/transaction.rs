//! Drives one [`Exchange`] to completion: lease a connection, write the
//! request, read the head, let the auth interceptor answer challenges.
//! Roughly equivalent to net::HttpNetworkTransaction.

use crate::base::loadstate::{ChannelState, ExchangeState};
use crate::base::neterror::NetError;
use crate::config::ClientConfig;
use crate::http::auth::interceptor::{AuthAction, AuthInterceptor};
use crate::http::auth::realm::{AuthScheme, Realm};
use crate::http::exchange::Exchange;
use crate::http::request::HttpRequest;
use crate::http::requestbody::{HyperBody, MultipartHandle};
use crate::http::response::HttpResponse;
use crate::http::responsebody::ResponseBody;
use crate::http::streamfactory::HttpStreamFactory;
use crate::socket::pool::{ConnectionPool, Poolable};
use http::header::{
    HeaderName, HeaderValue, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST,
    PROXY_AUTHORIZATION,
};
use http::{HeaderMap, Method, Request, StatusCode};
use hyper::body::Incoming;

/// Internal state machine states for a single write/read round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    CreateStream,
    SendRequest,
    ReadHeaders,
    Done,
}

/// Sends exchanges over pooled HTTP/1.1 connections.
pub struct HttpSender {
    pool: ConnectionPool<HttpStreamFactory>,
    config: ClientConfig,
    interceptor: AuthInterceptor,
}

impl HttpSender {
    pub fn new(pool: ConnectionPool<HttpStreamFactory>, config: ClientConfig, interceptor: AuthInterceptor) -> Self {
        Self { pool, config, interceptor }
    }

    pub fn pool(&self) -> &ConnectionPool<HttpStreamFactory> {
        &self.pool
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run `request` in a fresh exchange.
    pub async fn send(
        &self,
        request: HttpRequest,
        realm: Option<Realm>,
        proxy_realm: Option<Realm>,
    ) -> Result<HttpResponse, NetError> {
        let mut exchange = Exchange::new(request);
        if let Some(realm) = realm {
            exchange = exchange.with_realm(realm);
        }
        if let Some(realm) = proxy_realm {
            exchange = exchange.with_proxy_realm(realm);
        }
        self.execute(&mut exchange).await
    }

    /// Run `exchange` until a final response or a failure. On failure the
    /// exchange is terminated: its connection is closed, its multipart body
    /// released, and the first cause recorded.
    pub async fn execute(&self, exchange: &mut Exchange) -> Result<HttpResponse, NetError> {
        let abort = exchange.abort_handle();
        if abort.is_aborted() {
            return Err(exchange.terminate(NetError::Aborted));
        }

        let outcome = {
            let run = async {
                match self.config.request_timeout {
                    Some(deadline) => match tokio::time::timeout(deadline, self.run(exchange)).await {
                        Ok(res) => res,
                        Err(_) => Err(NetError::TimedOut),
                    },
                    None => self.run(exchange).await,
                }
            };
            tokio::select! {
                biased;
                _ = abort.aborted() => Err(NetError::Aborted),
                res = run => res,
            }
        };

        outcome.map_err(|e| {
            tracing::debug!(exchange = exchange.id(), error = %e, "exchange failed");
            self.abort(exchange, e)
        })
    }

    /// Fail `exchange` with `cause`.
    pub fn abort(&self, exchange: &mut Exchange, cause: NetError) -> NetError {
        exchange.terminate(cause)
    }

    async fn run(&self, exchange: &mut Exchange) -> Result<HttpResponse, NetError> {
        loop {
            let mut response = self.round_trip(exchange).await?;

            let status = response.status();
            if status != StatusCode::UNAUTHORIZED && status != StatusCode::PROXY_AUTHENTICATION_REQUIRED {
                return Ok(self.complete(exchange, response));
            }

            exchange.advance(ExchangeState::Challenged);
            match self.interceptor.intercept(exchange, &response)? {
                AuthAction::Decline => return Ok(self.complete(exchange, response)),
                AuthAction::Resend { request, reuse_connection } => {
                    if reuse_connection {
                        self.drain_and_execute_next_request(exchange, &mut response).await;
                    } else {
                        self.send_next_request(exchange);
                    }
                    exchange.set_current_request(request);
                    exchange.advance(ExchangeState::Rewritten);
                }
            }
        }
    }

    /// Keep the connection for the rewritten request once the challenge
    /// body has been read off it.
    async fn drain_and_execute_next_request(&self, exchange: &mut Exchange, response: &mut HttpResponse) {
        let drained = match response.body_mut() {
            Some(body) => body.drain().await,
            None => Ok(0),
        };
        match drained {
            Ok(skipped) => {
                tracing::trace!(exchange = exchange.id(), skipped, "drained challenge body");
                exchange.set_reuse_connection(true);
            }
            Err(e) => {
                tracing::debug!(exchange = exchange.id(), error = %e, "drain failed, switching connection");
                self.send_next_request(exchange);
            }
        }
    }

    /// Drop the current connection; the rewritten request gets a new one.
    fn send_next_request(&self, exchange: &mut Exchange) {
        exchange.set_reuse_connection(false);
        exchange.close_connection();
    }

    /// One write/read round for the current request.
    async fn round_trip(&self, exchange: &mut Exchange) -> Result<HttpResponse, NetError> {
        let request = exchange.current_request().clone();
        let mut state = State::CreateStream;
        let mut replayed = false;
        let mut response: Option<http::Response<Incoming>> = None;

        loop {
            tracing::trace!(exchange = exchange.id(), state = ?state, "round trip");
            match state {
                State::CreateStream => {
                    let reusable = exchange.reuse_connection()
                        && exchange.connection().is_some_and(|conn| conn.is_open());
                    exchange.set_reuse_connection(false);
                    if reusable {
                        exchange.set_channel_state(ChannelState::Pooled);
                    } else {
                        exchange.close_connection();
                        let route = request.route()?;
                        let lease = self.pool.lease(&route).await?;
                        tracing::debug!(
                            exchange = exchange.id(),
                            connection = lease.id(),
                            reused = lease.is_reused(),
                            route = %route,
                            "connection leased"
                        );
                        exchange.attach_connection(lease);
                    }
                    state = State::SendRequest;
                }
                State::SendRequest => {
                    let (req, multipart) = self.build_request(exchange, &request)?;
                    exchange.set_multipart(multipart);
                    exchange.mark_sent();

                    let conn = exchange.connection_mut().ok_or(NetError::ConnectionClosed)?;
                    let pooled = conn.is_reused();
                    let sent = conn.send_request(req).await;
                    match sent {
                        Ok(resp) => {
                            response = Some(resp);
                            state = State::ReadHeaders;
                        }
                        Err(e) if self.should_replay(&e, pooled, replayed) => {
                            tracing::warn!(
                                exchange = exchange.id(),
                                error = %e,
                                "pooled connection was stale, retrying with a fresh one"
                            );
                            replayed = true;
                            exchange.close_connection();
                            state = State::CreateStream;
                        }
                        Err(e) => return Err(e),
                    }
                }
                State::ReadHeaders => {
                    exchange.advance(ExchangeState::AwaitingResponse);
                    state = State::Done;
                }
                State::Done => {
                    let resp = response.take().ok_or(NetError::EmptyResponse)?;
                    let (parts, body) = resp.into_parts();
                    let response = HttpResponse::new(
                        parts.status,
                        parts.version,
                        parts.headers,
                        ResponseBody::from_incoming(body, None, false),
                    );
                    exchange.set_keep_alive(self.config.keep_alive && response.is_keep_alive());
                    tracing::debug!(
                        exchange = exchange.id(),
                        status = %response.status(),
                        keep_alive = exchange.is_keep_alive(),
                        "response headers received"
                    );
                    return Ok(response);
                }
            }
        }
    }

    fn should_replay(&self, error: &NetError, pooled: bool, replayed: bool) -> bool {
        self.config.retry_on_stale_pooled_connection && pooled && !replayed && error.is_transport()
    }

    /// Finish the exchange; the response body takes over the connection.
    fn complete(&self, exchange: &mut Exchange, mut response: HttpResponse) -> HttpResponse {
        exchange.advance(ExchangeState::Completed);
        exchange.set_multipart(None);
        if let Some(lease) = exchange.take_connection() {
            match response.body_mut() {
                Some(body) => body.attach_lease(lease, exchange.is_keep_alive()),
                None => lease.close(),
            }
        }
        response
    }

    fn build_request(
        &self,
        exchange: &Exchange,
        request: &HttpRequest,
    ) -> Result<(Request<HyperBody>, Option<MultipartHandle>), NetError> {
        let mut headers = request.headers().clone();

        if let Some(realm) = exchange.realm() {
            preemptive_credentials(&mut headers, AUTHORIZATION, realm, request)?;
        }
        if let Some(realm) = exchange.proxy_realm() {
            preemptive_credentials(&mut headers, PROXY_AUTHORIZATION, realm, request)?;
        }

        if !headers.contains_key(HOST) {
            headers.insert(HOST, host_header(request)?);
        }

        let body = request.body();
        if let Some(content_type) = body.content_type() {
            if !headers.contains_key(CONTENT_TYPE) {
                let value = HeaderValue::from_str(&content_type).map_err(|_| NetError::InvalidHeader)?;
                headers.insert(CONTENT_TYPE, value);
            }
        }
        match body.content_length() {
            Some(0) if matches!(*request.method(), Method::GET | Method::HEAD) => {}
            Some(len) => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
            }
            None => {}
        }

        if !self.config.keep_alive {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }

        let (hyper_body, multipart) = body.to_hyper();
        let mut req = Request::builder()
            .method(request.method().clone())
            .uri(request.request_target())
            .body(hyper_body)
            .map_err(|_| NetError::InvalidUrl)?;
        *req.headers_mut() = headers;
        Ok((req, multipart))
    }
}

impl std::fmt::Debug for HttpSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSender")
            .field("config", &self.config)
            .field("total_open", &self.pool.total_open())
            .finish_non_exhaustive()
    }
}

/// Credentials a preemptive realm can produce without a round trip.
/// Connection-oriented schemes only answer challenges.
fn preemptive_credentials(
    headers: &mut HeaderMap,
    name: HeaderName,
    realm: &Realm,
    request: &HttpRequest,
) -> Result<(), NetError> {
    if !realm.is_preemptive() || headers.contains_key(&name) {
        return Ok(());
    }
    let value = match realm.scheme() {
        AuthScheme::Basic => realm.basic_header_value(),
        AuthScheme::Digest => match realm.digest_challenge() {
            Some(challenge) => challenge.authorization(
                request.method().as_str(),
                &request.request_target(),
                realm.principal(),
                realm.secret(),
            )?,
            None => return Ok(()),
        },
        AuthScheme::Ntlm | AuthScheme::Kerberos | AuthScheme::Spnego => return Ok(()),
    };
    let value = HeaderValue::from_str(&value).map_err(|_| NetError::InvalidHeader)?;
    headers.insert(name, value);
    Ok(())
}

fn host_header(request: &HttpRequest) -> Result<HeaderValue, NetError> {
    let host = match request.virtual_host() {
        Some(vhost) => vhost.to_string(),
        None => {
            let url = request.url();
            let host = url.host_str().ok_or(NetError::InvalidUrl)?;
            match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            }
        }
    };
    HeaderValue::from_str(&host).map_err(|_| NetError::InvalidHeader)
}
