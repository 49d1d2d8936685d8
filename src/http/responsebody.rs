//! Response body streaming.
//! Mirrors Chromium's HttpStream::ReadResponseBody.
//!
//! The body owns the connection lease of the exchange that produced it.
//! Reading to the end returns the connection to the pool; dropping the
//! body early closes it.

use crate::base::neterror::NetError;
use crate::http::streamfactory::ConnectionLease;
use bytes::{Bytes, BytesMut};
use http_body_util::combinators::UnsyncBoxBody;
use http_body::Body as _;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;

/// Response body wrapper for streaming.
pub struct ResponseBody {
    inner: UnsyncBoxBody<Bytes, NetError>,
    lease: Option<ConnectionLease>,
    reusable: bool,
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBody")
            .field("holds_connection", &self.lease.is_some())
            .finish_non_exhaustive()
    }
}

impl ResponseBody {
    /// Wrap a hyper body. `reusable` says whether the connection may go
    /// back to the pool once the body has been read to the end.
    pub fn from_incoming(inner: Incoming, lease: Option<ConnectionLease>, reusable: bool) -> Self {
        Self {
            inner: inner.map_err(|_| NetError::HttpBodyError).boxed_unsync(),
            lease,
            reusable,
        }
    }

    /// A body held entirely in memory.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            inner: Full::new(bytes.into()).map_err(|never| match never {}).boxed_unsync(),
            lease: None,
            reusable: false,
        }
    }

    pub fn empty() -> Self {
        Self {
            inner: Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync(),
            lease: None,
            reusable: false,
        }
    }

    /// Whether a connection is still attached.
    pub fn holds_connection(&self) -> bool {
        self.lease.is_some()
    }

    /// Next chunk of data, `None` at the end of the body.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, NetError> {
        loop {
            match self.inner.frame().await {
                Some(Ok(frame)) => {
                    // Trailers carry no payload
                    if let Ok(data) = frame.into_data() {
                        return Ok(Some(data));
                    }
                }
                Some(Err(e)) => {
                    self.finish(false);
                    return Err(e);
                }
                None => {
                    self.finish(self.reusable);
                    return Ok(None);
                }
            }
        }
    }

    /// Read entire body as bytes.
    pub async fn bytes(mut self) -> Result<Bytes, NetError> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Read body as UTF-8 string.
    pub async fn text(self) -> Result<String, NetError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| NetError::InvalidUtf8)
    }

    /// Read body as JSON, deserializing to type T.
    #[cfg(feature = "json")]
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|_| NetError::JsonParseError)
    }

    /// Read and discard the rest of the body. Returns the number of bytes
    /// skipped. Used before reusing a connection for another request.
    pub async fn drain(&mut self) -> Result<u64, NetError> {
        let mut skipped = 0u64;
        while let Some(chunk) = self.chunk().await? {
            skipped += chunk.len() as u64;
        }
        Ok(skipped)
    }

    /// Hand the body the connection it is read from. A body that is
    /// already at its end gives the connection straight back.
    pub(crate) fn attach_lease(&mut self, lease: ConnectionLease, reusable: bool) {
        if self.inner.is_end_stream() {
            lease.release(reusable);
        } else {
            self.lease = Some(lease);
            self.reusable = reusable;
        }
    }

    fn finish(&mut self, reusable: bool) {
        if let Some(lease) = self.lease.take() {
            lease.release(reusable);
        }
    }
}
