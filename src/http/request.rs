//! Outgoing request description.

use crate::base::neterror::NetError;
use crate::http::requestbody::RequestBody;
use crate::socket::route::Route;
use http::header::{HeaderName, HeaderValue, TRANSFER_ENCODING};
use http::{HeaderMap, Method};
use url::Url;

/// A request as the exchange sees it: method, target, headers, body.
///
/// Requests are values. The auth interceptor produces a rewritten copy
/// rather than mutating the one in flight.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: RequestBody,
    virtual_host: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            virtual_host: None,
        }
    }

    pub fn get(url: &str) -> Result<Self, NetError> {
        Ok(Self::new(Method::GET, Url::parse(url).map_err(|_| NetError::InvalidUrl)?))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn virtual_host(&self) -> Option<&str> {
        self.virtual_host.as_deref()
    }

    pub fn set_body(&mut self, body: impl Into<RequestBody>) {
        self.body = body.into();
    }

    pub fn set_virtual_host(&mut self, host: impl Into<String>) {
        self.virtual_host = Some(host.into());
    }

    /// Insert a header, replacing any existing values.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), NetError> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| NetError::InvalidHeader)?;
        let value = HeaderValue::from_str(value).map_err(|_| NetError::InvalidHeader)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Same request with a different header set.
    pub fn with_headers(&self, headers: HeaderMap) -> Self {
        Self { headers, ..self.clone() }
    }

    pub fn route(&self) -> Result<Route, NetError> {
        Route::from_url(&self.url)
    }

    /// Host used for auth tokens: the virtual host if set, else the URL host.
    pub fn auth_host(&self) -> &str {
        self.virtual_host
            .as_deref()
            .or_else(|| self.url.host_str())
            .unwrap_or_default()
    }

    /// Path and query, the form used as the Digest `uri` parameter.
    pub fn request_target(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{}", self.url.path(), q),
            None => self.url.path().to_string(),
        }
    }

    /// Whether the body goes out with chunked transfer coding.
    pub fn is_chunked(&self) -> bool {
        is_chunked(&self.headers) || (!self.body.is_empty() && self.body.content_length().is_none())
    }
}

/// True when the last transfer coding in `headers` is `chunked`.
pub(crate) fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .last()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::multipart::{Form, Part, PartStream};
    use std::io::Cursor;

    #[test]
    fn test_request_target() {
        let req = HttpRequest::get("http://h/a/b?x=1").unwrap();
        assert_eq!(req.request_target(), "/a/b?x=1");
        let req = HttpRequest::get("http://h").unwrap();
        assert_eq!(req.request_target(), "/");
    }

    #[test]
    fn test_auth_host_prefers_virtual_host() {
        let mut req = HttpRequest::get("http://10.0.0.1:8080/").unwrap();
        assert_eq!(req.auth_host(), "10.0.0.1");
        req.set_virtual_host("intranet.example");
        assert_eq!(req.auth_host(), "intranet.example");
        // Route still follows the URL
        assert_eq!(req.route().unwrap(), Route::new("http", "10.0.0.1", 8080));
    }

    #[test]
    fn test_chunked_detection() {
        let mut req = HttpRequest::get("http://h/").unwrap();
        assert!(!req.is_chunked());

        req.set_header("Transfer-Encoding", "gzip, chunked").unwrap();
        assert!(req.is_chunked());

        let mut req = HttpRequest::get("http://h/").unwrap();
        req.set_body(Form::new().part(
            "s",
            Part::stream(None, || Ok(Box::new(Cursor::new(Vec::new())) as Box<dyn PartStream>)),
        ));
        assert!(req.is_chunked());
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut req = HttpRequest::get("http://h/").unwrap();
        assert_eq!(req.set_header("bad header", "v").unwrap_err(), NetError::InvalidHeader);
    }

    #[test]
    fn test_with_headers_keeps_rest() {
        let mut req = HttpRequest::get("http://h/p").unwrap();
        req.set_body("data");
        let mut headers = HeaderMap::new();
        headers.insert("x-a", HeaderValue::from_static("1"));
        let copy = req.with_headers(headers);
        assert_eq!(copy.url(), req.url());
        assert_eq!(copy.body().content_length(), Some(4));
        assert!(req.headers().is_empty());
        assert_eq!(copy.headers()["x-a"], "1");
    }
}
