//! Multipart part descriptors.
//!
//! A [`Part`] describes what to send. It is cheap to clone and holds no
//! open resources; the encoder opens files and streams when a body is
//! built, so the same form can be encoded again when a request is replayed.

use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A readable source for a stream part.
pub trait PartStream: Read + Send {
    /// Release the underlying resource. Called once when the body closes.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PartStream for File {}
impl PartStream for Cursor<Vec<u8>> {}
impl PartStream for Cursor<Bytes> {}
impl PartStream for &'static [u8] {}

type StreamFactory = Arc<dyn Fn() -> io::Result<Box<dyn PartStream>> + Send + Sync>;

/// Where a part's content comes from.
#[derive(Clone)]
pub(crate) enum PartSource {
    Bytes(Bytes),
    File { path: PathBuf, offset: u64, length: Option<u64> },
    Stream { open: StreamFactory, length: Option<u64> },
}

impl fmt::Debug for PartSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartSource::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            PartSource::File { path, offset, length } => f
                .debug_struct("File")
                .field("path", path)
                .field("offset", offset)
                .field("length", length)
                .finish(),
            PartSource::Stream { length, .. } => {
                f.debug_struct("Stream").field("length", length).finish_non_exhaustive()
            }
        }
    }
}

/// A part of a multipart form.
#[derive(Debug, Clone)]
pub struct Part {
    pub(crate) source: PartSource,
    content_type: Option<String>,
    charset: Option<String>,
    file_name: Option<Cow<'static, str>>,
    transfer_encoding: Option<String>,
    content_id: Option<String>,
    disposition_type: Option<String>,
    headers: Vec<(String, String)>,
}

impl Part {
    fn new(source: PartSource) -> Self {
        Self {
            source,
            content_type: None,
            charset: None,
            file_name: None,
            transfer_encoding: None,
            content_id: None,
            disposition_type: None,
            headers: Vec::new(),
        }
    }

    /// Create a text part.
    pub fn text<V>(value: V) -> Self
    where
        V: Into<Cow<'static, str>>,
    {
        let s = value.into();
        Self::new(PartSource::Bytes(Bytes::from(s.into_owned())))
            .content_type("text/plain")
            .charset("utf-8")
    }

    /// Create a part from bytes.
    pub fn bytes<B>(data: B) -> Self
    where
        B: Into<Bytes>,
    {
        Self::new(PartSource::Bytes(data.into()))
    }

    /// Create a part streaming a whole file. The file name defaults to the
    /// path's final component.
    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path.file_name().map(|n| Cow::Owned(n.to_string_lossy().into_owned()));
        let mut part = Self::new(PartSource::File { path, offset: 0, length: None })
            .content_type("application/octet-stream");
        part.file_name = name;
        part
    }

    /// Create a part streaming `length` bytes of a file starting at `offset`.
    pub fn file_range<P: AsRef<Path>>(path: P, offset: u64, length: u64) -> Self {
        let mut part = Self::file(path);
        if let PartSource::File { offset: o, length: l, .. } = &mut part.source {
            *o = offset;
            *l = Some(length);
        }
        part
    }

    /// Create a part from a reader factory. The factory is invoked each time
    /// a body is built from the form; `length` of `None` makes the whole
    /// body's length unknown.
    pub fn stream<F>(length: Option<u64>, open: F) -> Self
    where
        F: Fn() -> io::Result<Box<dyn PartStream>> + Send + Sync + 'static,
    {
        Self::new(PartSource::Stream { open: Arc::new(open), length })
            .content_type("application/octet-stream")
    }

    /// Set the content type.
    pub fn content_type<S: Into<String>>(mut self, mime: S) -> Self {
        self.content_type = Some(mime.into());
        self
    }

    pub fn charset<S: Into<String>>(mut self, charset: S) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Set the file name.
    pub fn file_name<S>(mut self, name: S) -> Self
    where
        S: Into<Cow<'static, str>>,
    {
        self.file_name = Some(name.into());
        self
    }

    pub fn transfer_encoding<S: Into<String>>(mut self, encoding: S) -> Self {
        self.transfer_encoding = Some(encoding.into());
        self
    }

    pub fn content_id<S: Into<String>>(mut self, id: S) -> Self {
        self.content_id = Some(id.into());
        self
    }

    /// Override the disposition type (default `form-data`).
    pub fn disposition_type<S: Into<String>>(mut self, disposition: S) -> Self {
        self.disposition_type = Some(disposition.into());
        self
    }

    /// Add an extra part header.
    pub fn header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Content length if known without touching the filesystem.
    pub fn declared_len(&self) -> Option<u64> {
        match &self.source {
            PartSource::Bytes(b) => Some(b.len() as u64),
            PartSource::File { length, .. } => *length,
            PartSource::Stream { length, .. } => *length,
        }
    }

    /// Format the part headers, without the trailing blank line.
    pub(crate) fn format_headers(&self, name: &str) -> String {
        let mut header = format!(
            "Content-Disposition: {}; name=\"{}\"",
            self.disposition_type.as_deref().unwrap_or("form-data"),
            escape_quotes(name)
        );

        if let Some(ref filename) = self.file_name {
            header.push_str(&format!("; filename=\"{}\"", escape_quotes(filename)));
        }

        if let Some(ref mime) = self.content_type {
            header.push_str(&format!("\r\nContent-Type: {}", mime));
            if let Some(ref charset) = self.charset {
                header.push_str(&format!("; charset={}", charset));
            }
        }

        if let Some(ref encoding) = self.transfer_encoding {
            header.push_str(&format!("\r\nContent-Transfer-Encoding: {}", encoding));
        }

        if let Some(ref id) = self.content_id {
            header.push_str(&format!("\r\nContent-ID: {}", id));
        }

        for (k, v) in &self.headers {
            header.push_str(&format!("\r\n{}: {}", k, v));
        }

        header
    }
}

/// Escape quotes and backslashes in a string.
pub(crate) fn escape_quotes(s: &str) -> Cow<'_, str> {
    if s.contains('"') || s.contains('\\') || s.contains('\r') || s.contains('\n') {
        Cow::Owned(
            s.replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\r', "\\r")
                .replace('\n', "\\n"),
        )
    } else {
        Cow::Borrowed(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_headers() {
        let headers = Part::text("v").format_headers("field");
        assert_eq!(
            headers,
            "Content-Disposition: form-data; name=\"field\"\r\nContent-Type: text/plain; charset=utf-8"
        );
    }

    #[test]
    fn test_file_part_defaults() {
        let part = Part::file("/tmp/report.pdf");
        let headers = part.format_headers("doc");
        assert!(headers.contains("filename=\"report.pdf\""));
        assert!(headers.contains("Content-Type: application/octet-stream"));
        assert_eq!(part.declared_len(), None);
    }

    #[test]
    fn test_file_range_declares_length() {
        let part = Part::file_range("/tmp/x.bin", 100, 50);
        assert_eq!(part.declared_len(), Some(50));
    }

    #[test]
    fn test_extra_headers() {
        let headers = Part::bytes(b"x".as_slice())
            .transfer_encoding("binary")
            .content_id("<part1>")
            .header("X-Trace", "1")
            .disposition_type("attachment")
            .format_headers("a");
        assert!(headers.starts_with("Content-Disposition: attachment; name=\"a\""));
        assert!(headers.contains("\r\nContent-Transfer-Encoding: binary"));
        assert!(headers.contains("\r\nContent-ID: <part1>"));
        assert!(headers.ends_with("\r\nX-Trace: 1"));
    }

    #[test]
    fn test_escape_quotes() {
        assert_eq!(escape_quotes("normal"), "normal");
        assert_eq!(escape_quotes("with\"quote"), "with\\\"quote");
        assert_eq!(escape_quotes("with\\slash"), "with\\\\slash");
    }

    #[test]
    fn test_stream_unknown_length() {
        let part = Part::stream(None, || Ok(Box::new(Cursor::new(b"abc".to_vec())) as Box<dyn PartStream>));
        assert_eq!(part.declared_len(), None);
    }
}
