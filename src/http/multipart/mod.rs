//! Multipart form data support.
//!
//! Provides RFC 2046 multipart/form-data encoding for uploads. Forms are
//! descriptions; [`Form::into_body`] produces a [`MultipartBody`] that
//! streams the encoded bytes without holding whole files in memory.
//!
//! # Example
//! ```ignore
//! use relaynet::http::multipart::{Form, Part};
//!
//! let form = Form::new()
//!     .text("username", "user123")
//!     .part("file", Part::file("/tmp/report.pdf"));
//!
//! let body = form.into_body();
//! assert!(body.content_length() > 0);
//! ```

mod body;
mod channel;
mod encoder;
mod part;

pub use body::{BodyState, ChannelTransfer, MultipartBody, DEFAULT_CHUNK_SIZE};
pub use channel::WritableChannel;
pub use encoder::{MultipartPart, MultipartState};
pub use part::{Part, PartStream};

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};

/// A multipart form.
///
/// Cloning is cheap and each clone encodes independently, which is what
/// lets a request carrying a form be sent again after an auth challenge.
#[derive(Debug, Clone)]
pub struct Form {
    boundary: String,
    fields: Vec<(Cow<'static, str>, Part)>,
}

impl Default for Form {
    fn default() -> Self {
        Self::new()
    }
}

impl Form {
    /// Create a new empty form.
    pub fn new() -> Self {
        Self::with_boundary(generate_boundary())
    }

    /// Create a form with a fixed boundary.
    pub fn with_boundary<S: Into<String>>(boundary: S) -> Self {
        Self {
            boundary: boundary.into(),
            fields: Vec::new(),
        }
    }

    /// Get the boundary string.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Add a text field.
    pub fn text<N, V>(self, name: N, value: V) -> Self
    where
        N: Into<Cow<'static, str>>,
        V: Into<Cow<'static, str>>,
    {
        self.part(name, Part::text(value))
    }

    /// Add a custom part.
    pub fn part<N>(mut self, name: N, part: Part) -> Self
    where
        N: Into<Cow<'static, str>>,
    {
        self.fields.push((name.into(), part));
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Get the Content-Type header value.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Total encoded length, or -1 if any part's length is unknown.
    pub fn content_length(&self) -> i64 {
        self.clone().into_body().content_length()
    }

    /// Build a streaming encoder for this form.
    pub fn into_body(self) -> MultipartBody {
        let content_type = self.content_type();
        let mut parts: Vec<MultipartPart> = self
            .fields
            .iter()
            .map(|(name, part)| MultipartPart::new(name, part, &self.boundary))
            .collect();
        parts.push(MultipartPart::message_end(&self.boundary));
        MultipartBody::new(parts, content_type, self.boundary)
    }
}

/// Generate a boundary string unique within the process.
fn generate_boundary() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);

    format!(
        "----relaynet-boundary-{:016x}{:08x}{:04x}",
        nanos,
        std::process::id(),
        seq & 0xffff
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn encode(form: Form) -> String {
        let mut body = form.into_body();
        let mut out = BytesMut::new();
        loop {
            let mut limited = (&mut out).limit(512);
            if body.transfer_to(&mut limited).unwrap() == BodyState::Stop {
                break;
            }
        }
        String::from_utf8(out.to_vec()).unwrap()
    }

    #[test]
    fn test_empty_form() {
        let form = Form::with_boundary("b");
        assert!(form.is_empty());
        assert_eq!(encode(form), "--b--\r\n");
    }

    #[test]
    fn test_text_field() {
        let body_str = encode(Form::new().text("name", "value"));
        assert!(body_str.contains("name=\"name\""));
        assert!(body_str.contains("value"));
    }

    #[test]
    fn test_file_part() {
        let part = Part::bytes(b"file data".as_slice())
            .file_name("test.txt")
            .content_type("text/plain");

        let body_str = encode(Form::new().part("upload", part));
        assert!(body_str.contains("filename=\"test.txt\""));
        assert!(body_str.contains("Content-Type: text/plain"));
        assert!(body_str.contains("file data"));
    }

    #[test]
    fn test_boundary() {
        let a = Form::new();
        let b = Form::new();
        assert!(a.boundary().starts_with("----relaynet-boundary-"));
        assert_ne!(a.boundary(), b.boundary());
    }

    #[test]
    fn test_content_type() {
        let ct = Form::new().content_type();
        assert!(ct.starts_with("multipart/form-data; boundary="));
    }

    #[test]
    fn test_content_length() {
        let form = Form::new().text("key", "value");
        let length = form.content_length();
        assert_eq!(length, encode(form).len() as i64);
    }

    #[test]
    fn test_multiple_parts_exact_bytes() {
        let form = Form::with_boundary("XX")
            .text("field1", "value1")
            .part("file", Part::bytes(b"binary".as_slice()).file_name("data.bin"));

        assert_eq!(
            encode(form),
            "--XX\r\n\
             Content-Disposition: form-data; name=\"field1\"\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\r\n\
             value1\r\n\
             --XX\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"data.bin\"\r\n\r\n\
             binary\r\n\
             --XX--\r\n"
        );
    }

    #[test]
    fn test_clone_encodes_independently() {
        let form = Form::new().text("a", "1");
        assert_eq!(encode(form.clone()), encode(form));
    }
}
