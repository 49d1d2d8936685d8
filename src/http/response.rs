//! HTTP Response with body access.

use crate::base::neterror::NetError;
use crate::http::request::is_chunked;
use crate::http::ResponseBody;
use http::header::CONNECTION;
use http::{HeaderMap, HeaderValue, StatusCode, Version};

/// HTTP Response with accessible body.
/// This is the user-facing response type that owns the body.
#[derive(Debug)]
pub struct HttpResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Option<ResponseBody>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, version: Version, headers: HeaderMap, body: ResponseBody) -> Self {
        Self { status, version, headers, body: Some(body) }
    }

    /// Status and headers only, with an empty HTTP/1.1 body.
    pub fn from_head(status: StatusCode, headers: HeaderMap) -> Self {
        Self::new(status, Version::HTTP_11, headers, ResponseBody::empty())
    }

    /// Add a header value, keeping existing ones. Handy for building
    /// responses by hand.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Result<Self, NetError> {
        let value = HeaderValue::from_str(value).map_err(|_| NetError::InvalidHeader)?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Get a reference to the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Response body used chunked transfer coding.
    pub fn is_chunked(&self) -> bool {
        is_chunked(&self.headers)
    }

    /// Whether the server allows the connection to stay open.
    pub fn is_keep_alive(&self) -> bool {
        let tokens = self
            .headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|t| t.trim().to_ascii_lowercase())
            .collect::<Vec<_>>();

        if tokens.iter().any(|t| t == "close") {
            return false;
        }
        match self.version {
            Version::HTTP_09 | Version::HTTP_10 => tokens.iter().any(|t| t == "keep-alive"),
            _ => true,
        }
    }

    /// Take the response body for consumption.
    /// Can only be called once - subsequent calls return None.
    pub fn take_body(&mut self) -> Option<ResponseBody> {
        self.body.take()
    }

    pub(crate) fn body_mut(&mut self) -> Option<&mut ResponseBody> {
        self.body.as_mut()
    }

    /// Convenience method to consume body as bytes.
    pub async fn bytes(mut self) -> Result<bytes::Bytes, NetError> {
        self.body.take().ok_or(NetError::HttpBodyError)?.bytes().await
    }

    /// Convenience method to consume body as text.
    pub async fn text(mut self) -> Result<String, NetError> {
        self.body.take().ok_or(NetError::HttpBodyError)?.text().await
    }

    /// Convenience method to consume body as JSON.
    #[cfg(feature = "json")]
    pub async fn json<T: serde::de::DeserializeOwned>(mut self) -> Result<T, NetError> {
        self.body.take().ok_or(NetError::HttpBodyError)?.json().await
    }
}
