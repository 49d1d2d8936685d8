//! Request body for POST/PUT operations.

use crate::base::neterror::NetError;
use crate::http::multipart::{BodyState, Form, MultipartBody};
use bytes::{BufMut, Bytes, BytesMut};
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

/// Body type handed to hyper.
pub type HyperBody = UnsyncBoxBody<Bytes, NetError>;

/// Multipart encoder shared between hyper's body adapter and the exchange,
/// so an abort can close it while hyper still owns the stream.
pub type MultipartHandle = Arc<Mutex<MultipartBody>>;

const FRAME_SIZE: usize = 16 * 1024;

/// Request body for HTTP methods that send data.
///
/// Bodies are descriptions, so the same body can be sent again when an
/// auth challenge forces a replay.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    /// No body (GET, HEAD, DELETE).
    #[default]
    Empty,
    /// Body with raw bytes.
    Bytes(Bytes),
    /// Streamed multipart/form-data.
    Multipart(Form),
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Bytes(Bytes::from(s))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(v))
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Bytes(Bytes::from(s.to_owned()))
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        RequestBody::Bytes(b)
    }
}

impl From<Form> for RequestBody {
    fn from(form: Form) -> Self {
        RequestBody::Multipart(form)
    }
}

impl RequestBody {
    /// Check if the body is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// Encoded length, `None` when it cannot be known up front.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(b) => Some(b.len() as u64),
            RequestBody::Multipart(form) => u64::try_from(form.content_length()).ok(),
        }
    }

    /// Content-Type implied by the body, if any.
    pub fn content_type(&self) -> Option<String> {
        match self {
            RequestBody::Multipart(form) => Some(form.content_type()),
            _ => None,
        }
    }

    /// Build a fresh hyper body. Multipart bodies also return the handle
    /// used to close the encoder on abort.
    pub fn to_hyper(&self) -> (HyperBody, Option<MultipartHandle>) {
        match self {
            RequestBody::Empty => (Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync(), None),
            RequestBody::Bytes(b) => {
                (Full::new(b.clone()).map_err(|never| match never {}).boxed_unsync(), None)
            }
            RequestBody::Multipart(form) => {
                let handle = Arc::new(Mutex::new(form.clone().into_body()));
                let stream = MultipartStream { body: Arc::clone(&handle) };
                (stream.boxed_unsync(), Some(handle))
            }
        }
    }
}

/// Adapts a [`MultipartBody`] to hyper's pull-based body interface.
///
/// File and stream parts are read inline while polling; reads are bounded
/// to one frame per poll.
struct MultipartStream {
    body: MultipartHandle,
}

impl Body for MultipartStream {
    type Data = Bytes;
    type Error = NetError;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut body = self.body.lock().unwrap_or_else(PoisonError::into_inner);
        let mut buf = BytesMut::with_capacity(FRAME_SIZE);
        loop {
            let mut limited = (&mut buf).limit(FRAME_SIZE);
            match body.transfer_to(&mut limited) {
                Ok(BodyState::Stop) => {
                    return Poll::Ready((!buf.is_empty()).then(|| Ok(Frame::data(buf.freeze()))));
                }
                Ok(BodyState::Continue) if !buf.is_empty() => {
                    return Poll::Ready(Some(Ok(Frame::data(buf.freeze()))));
                }
                // Finished a part without producing bytes; go again.
                Ok(BodyState::Continue) => continue,
                Err(e) => {
                    let err = if body.is_closed() { NetError::BodyClosed } else { NetError::from(e) };
                    tracing::debug!(error = %err, "multipart body transfer failed");
                    return Poll::Ready(Some(Err(err)));
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.body.lock().unwrap_or_else(PoisonError::into_inner).is_done()
    }

    fn size_hint(&self) -> SizeHint {
        let body = self.body.lock().unwrap_or_else(PoisonError::into_inner);
        match body.known_length() {
            Some(len) => SizeHint::with_exact(len.saturating_sub(body.transferred())),
            None => SizeHint::default(),
        }
    }
}
