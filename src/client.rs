//! HTTP Client with builder pattern.
//!
//! Provides a high-level API over the pooled sender and the auth
//! interceptor.
//!
//! # Example
//!
//! ```rust,ignore
//! use relaynet::{Client, Realm};
//!
//! let client = Client::builder()
//!     .max_connections_per_route(2)
//!     .build()?;
//!
//! let resp = client.get("http://intranet.example/report")
//!     .realm(Realm::digest("alice", "secret"))
//!     .send()
//!     .await?;
//! ```

use crate::base::neterror::NetError;
use crate::config::{ClientConfig, PoolConfig};
use crate::http::auth::interceptor::AuthInterceptor;
use crate::http::auth::negotiate::{DefaultNtlmEngine, NtlmEngine, SpnegoEngine, UnavailableSpnegoEngine};
use crate::http::auth::realm::Realm;
use crate::http::exchange::Exchange;
use crate::http::multipart::Form;
use crate::http::request::HttpRequest;
use crate::http::requestbody::RequestBody;
use crate::http::response::HttpResponse;
use crate::http::streamfactory::HttpStreamFactory;
use crate::http::transaction::HttpSender;
use crate::socket::connectjob::{ConnectJob, TlsUpgrade};
use crate::socket::pool::ConnectionPool;
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// HTTP Client for making requests.
///
/// Cloning is cheap; clones share the connection pool.
/// Use [`Client::builder()`] to configure and create a client.
#[derive(Clone, Debug)]
pub struct Client {
    sender: Arc<HttpSender>,
}

impl Client {
    /// Create a new client with default settings.
    pub fn new() -> Result<Self, NetError> {
        Self::builder().build()
    }

    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Start building a GET request.
    pub fn get<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Start building a POST request.
    pub fn post<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Start building a PUT request.
    pub fn put<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Start building a DELETE request.
    pub fn delete<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Start building a HEAD request.
    pub fn head<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Start building a PATCH request.
    pub fn patch<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    /// Start building a request with custom method.
    pub fn request<U: AsRef<str>>(&self, method: Method, url: U) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            method,
            url: url.as_ref().to_string(),
            headers: http::HeaderMap::new(),
            body: RequestBody::Empty,
            realm: None,
            proxy_realm: None,
            virtual_host: None,
            error: None,
        }
    }

    /// Run a prepared exchange. Keep an [`AbortHandle`] from
    /// [`Exchange::abort_handle`] to cancel it from another task.
    ///
    /// [`AbortHandle`]: crate::http::exchange::AbortHandle
    pub async fn execute(&self, exchange: &mut Exchange) -> Result<HttpResponse, NetError> {
        self.sender.execute(exchange).await
    }

    /// The shared connection pool.
    pub fn pool(&self) -> &ConnectionPool<HttpStreamFactory> {
        self.sender.pool()
    }

    pub fn config(&self) -> &ClientConfig {
        self.sender.config()
    }
}

/// Builder for creating a [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    tls: Option<Arc<dyn TlsUpgrade>>,
    ntlm: Option<Arc<dyn NtlmEngine>>,
    spnego: Option<Arc<dyn SpnegoEngine>>,
}

impl ClientBuilder {
    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pool_config(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.pool.max_connections = max;
        self
    }

    pub fn max_connections_per_route(mut self, max: usize) -> Self {
        self.config.pool.max_connections_per_route = max;
        self
    }

    pub fn pooled_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool.pooled_idle_timeout = timeout;
        self
    }

    /// Wait up to `timeout` for a free slot instead of failing at once.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool.acquire_timeout = Some(timeout);
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// Set request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    pub fn retry_on_stale_connection(mut self, retry: bool) -> Self {
        self.config.retry_on_stale_pooled_connection = retry;
        self
    }

    /// Enable `https` routes.
    pub fn tls(mut self, tls: Arc<dyn TlsUpgrade>) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn ntlm_engine(mut self, engine: Arc<dyn NtlmEngine>) -> Self {
        self.ntlm = Some(engine);
        self
    }

    pub fn spnego_engine(mut self, engine: Arc<dyn SpnegoEngine>) -> Self {
        self.spnego = Some(engine);
        self
    }

    /// Build the client. Must be called inside a Tokio runtime: the pool's
    /// idle sweep is spawned here.
    pub fn build(self) -> Result<Client, NetError> {
        self.config.pool.validate()?;

        let connect_job = match self.tls {
            Some(tls) => ConnectJob::with_tls(tls),
            None => ConnectJob::new(),
        };
        let pool = ConnectionPool::new(HttpStreamFactory::new(connect_job), self.config.pool.clone());
        pool.start_cleanup_task();

        let interceptor = AuthInterceptor::new(
            self.ntlm.unwrap_or_else(|| Arc::new(DefaultNtlmEngine)),
            self.spnego.unwrap_or_else(|| Arc::new(UnavailableSpnegoEngine)),
        );

        tracing::debug!(config = ?self.config, "client built");
        Ok(Client {
            sender: Arc::new(HttpSender::new(pool, self.config, interceptor)),
        })
    }
}

/// Builder for a single request.
pub struct RequestBuilder {
    client: Client,
    method: Method,
    url: String,
    headers: http::HeaderMap,
    body: RequestBody,
    realm: Option<Realm>,
    proxy_realm: Option<Realm>,
    virtual_host: Option<String>,
    error: Option<NetError>,
}

impl RequestBuilder {
    /// Add a header. An invalid value fails the request at `send`.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: http::header::IntoHeaderName,
        V: TryInto<http::HeaderValue>,
    {
        match value.try_into() {
            Ok(val) => {
                self.headers.append(key, val);
            }
            Err(_) => {
                self.error.get_or_insert(NetError::InvalidHeader);
            }
        }
        self
    }

    /// Set request body.
    pub fn body<B: Into<RequestBody>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    /// Send a multipart form.
    pub fn multipart(mut self, form: Form) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    /// Set JSON body.
    #[cfg(feature = "json")]
    pub fn json<T: serde::Serialize>(mut self, json: &T) -> Self {
        match serde_json::to_vec(json) {
            Ok(bytes) => {
                self.body = bytes.into();
                self.headers.insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("application/json"),
                );
            }
            Err(e) => {
                self.error.get_or_insert(NetError::InvalidConfig(e.to_string()));
            }
        }
        self
    }

    /// Credentials for the origin server.
    pub fn realm(mut self, realm: Realm) -> Self {
        self.realm = Some(realm);
        self
    }

    /// Credentials for the proxy.
    pub fn proxy_realm(mut self, realm: Realm) -> Self {
        self.proxy_realm = Some(realm);
        self
    }

    /// Host to send and authenticate as, in place of the URL host.
    pub fn virtual_host<S: Into<String>>(mut self, host: S) -> Self {
        self.virtual_host = Some(host.into());
        self
    }

    /// Build the exchange without sending it.
    pub fn build(self) -> Result<(Client, Exchange), NetError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let url = Url::parse(&self.url).map_err(|_| NetError::InvalidUrl)?;
        let mut request = HttpRequest::new(self.method, url);
        *request.headers_mut() = self.headers;
        request.set_body(self.body);
        if let Some(host) = self.virtual_host {
            request.set_virtual_host(host);
        }

        let mut exchange = Exchange::new(request);
        if let Some(realm) = self.realm {
            exchange = exchange.with_realm(realm);
        }
        if let Some(realm) = self.proxy_realm {
            exchange = exchange.with_proxy_realm(realm);
        }
        Ok((self.client, exchange))
    }

    /// Send the request.
    pub async fn send(self) -> Result<HttpResponse, NetError> {
        let (client, mut exchange) = self.build()?;
        client.execute(&mut exchange).await
    }
}
