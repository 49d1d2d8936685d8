//! State of one logical request across connection switches and auth
//! retries.

use crate::base::loadstate::{ChannelState, ExchangeState};
use crate::base::neterror::NetError;
use crate::http::auth::realm::Realm;
use crate::http::request::HttpRequest;
use crate::http::requestbody::MultipartHandle;
use crate::http::streamfactory::ConnectionLease;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::Notify;

static NEXT_EXCHANGE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct AbortSignal {
    aborted: AtomicBool,
    notify: Notify,
}

/// Cancels an in-flight exchange from another task.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortSignal>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        if !self.inner.aborted.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Resolves once [`abort`](Self::abort) has been called.
    pub async fn aborted(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

/// Per-request state.
///
/// `auth_attempted` and `proxy_auth_attempted` are atomic so the
/// check-and-set that guards against a second challenge round is a single
/// step.
#[derive(Debug)]
pub struct Exchange {
    id: u64,
    original_request: HttpRequest,
    current_request: HttpRequest,
    realm: Option<Realm>,
    proxy_realm: Option<Realm>,
    auth_attempted: AtomicBool,
    proxy_auth_attempted: AtomicBool,
    reuse_connection: bool,
    channel_state: ChannelState,
    keep_alive: bool,
    state: ExchangeState,
    connection: Option<ConnectionLease>,
    multipart: Option<MultipartHandle>,
    abort: AbortHandle,
    failure: Option<NetError>,
}

impl Exchange {
    pub fn new(request: HttpRequest) -> Self {
        Self {
            id: NEXT_EXCHANGE_ID.fetch_add(1, Ordering::Relaxed),
            current_request: request.clone(),
            original_request: request,
            realm: None,
            proxy_realm: None,
            auth_attempted: AtomicBool::new(false),
            proxy_auth_attempted: AtomicBool::new(false),
            reuse_connection: false,
            channel_state: ChannelState::New,
            keep_alive: true,
            state: ExchangeState::Idle,
            connection: None,
            multipart: None,
            abort: AbortHandle::new(),
            failure: None,
        }
    }

    pub fn with_realm(mut self, realm: Realm) -> Self {
        self.realm = Some(realm);
        self
    }

    pub fn with_proxy_realm(mut self, realm: Realm) -> Self {
        self.proxy_realm = Some(realm);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn original_request(&self) -> &HttpRequest {
        &self.original_request
    }

    pub fn current_request(&self) -> &HttpRequest {
        &self.current_request
    }

    pub fn set_current_request(&mut self, request: HttpRequest) {
        self.current_request = request;
    }

    pub fn realm(&self) -> Option<&Realm> {
        self.realm.as_ref()
    }

    pub fn set_realm(&mut self, realm: Realm) {
        self.realm = Some(realm);
    }

    pub fn proxy_realm(&self) -> Option<&Realm> {
        self.proxy_realm.as_ref()
    }

    pub fn set_proxy_realm(&mut self, realm: Realm) {
        self.proxy_realm = Some(realm);
    }

    /// Set the flag and return its previous value.
    pub fn get_and_set_auth_attempted(&self, value: bool) -> bool {
        self.auth_attempted.swap(value, Ordering::AcqRel)
    }

    pub fn set_auth_attempted(&self, value: bool) {
        self.auth_attempted.store(value, Ordering::Release);
    }

    pub fn is_auth_attempted(&self) -> bool {
        self.auth_attempted.load(Ordering::Acquire)
    }

    pub fn get_and_set_proxy_auth_attempted(&self, value: bool) -> bool {
        self.proxy_auth_attempted.swap(value, Ordering::AcqRel)
    }

    pub fn set_proxy_auth_attempted(&self, value: bool) {
        self.proxy_auth_attempted.store(value, Ordering::Release);
    }

    pub fn is_proxy_auth_attempted(&self) -> bool {
        self.proxy_auth_attempted.load(Ordering::Acquire)
    }

    pub fn reuse_connection(&self) -> bool {
        self.reuse_connection
    }

    pub fn set_reuse_connection(&mut self, reuse: bool) {
        self.reuse_connection = reuse;
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel_state
    }

    pub fn set_channel_state(&mut self, state: ChannelState) {
        self.channel_state = state;
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Move to `next` if the transition is legal. Returns whether it was.
    pub fn advance(&mut self, next: ExchangeState) -> bool {
        if self.state.can_transition_to(next) {
            tracing::trace!(exchange = self.id, from = ?self.state, to = ?next, "exchange state");
            self.state = next;
            true
        } else {
            tracing::warn!(exchange = self.id, from = ?self.state, to = ?next, "illegal exchange transition ignored");
            false
        }
    }

    /// Record a write of the current request. Repeated writes of the same
    /// request (a stale-connection replay) keep the state as is.
    pub(crate) fn mark_sent(&mut self) {
        match self.state {
            ExchangeState::Idle => {
                self.advance(ExchangeState::Sent);
            }
            ExchangeState::Rewritten => {
                self.advance(ExchangeState::Resent);
            }
            _ => {}
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    pub fn failure(&self) -> Option<&NetError> {
        self.failure.as_ref()
    }

    pub fn connection(&self) -> Option<&ConnectionLease> {
        self.connection.as_ref()
    }

    pub(crate) fn connection_mut(&mut self) -> Option<&mut ConnectionLease> {
        self.connection.as_mut()
    }

    pub(crate) fn attach_connection(&mut self, lease: ConnectionLease) {
        self.channel_state = if lease.is_reused() { ChannelState::Pooled } else { ChannelState::Reconnected };
        self.connection = Some(lease);
    }

    pub(crate) fn take_connection(&mut self) -> Option<ConnectionLease> {
        self.connection.take()
    }

    /// Close the connection the exchange holds, if any.
    pub(crate) fn close_connection(&mut self) {
        if let Some(lease) = self.connection.take() {
            tracing::debug!(exchange = self.id, connection = lease.id(), "closing connection");
            lease.close();
        }
    }

    pub(crate) fn set_multipart(&mut self, handle: Option<MultipartHandle>) {
        self.multipart = handle;
    }

    /// Fail the exchange: release everything it holds and record `cause`.
    /// Later calls keep the first cause.
    pub fn terminate(&mut self, cause: NetError) -> NetError {
        self.close_connection();
        if let Some(handle) = self.multipart.take() {
            handle.lock().unwrap_or_else(PoisonError::into_inner).close();
        }
        if self.state != ExchangeState::Terminal {
            self.advance(ExchangeState::Terminal);
        }
        self.failure.get_or_insert(cause).clone()
    }
}
