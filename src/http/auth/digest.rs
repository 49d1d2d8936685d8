//! HTTP Digest Authentication (RFC 7616).
//!
//! Parses `Digest` challenges and computes the matching `Authorization`
//! value. Hashing goes through BoringSSL.
//!
//! ## Supported Features
//! - MD5 and SHA-256 algorithms
//! - Session variants (MD5-sess, SHA-256-sess)
//! - qop=auth with nonce count tracking

use crate::base::neterror::NetError;
use boring::hash::{hash, MessageDigest};
use std::fmt::Write;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Digest authentication algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// Unspecified - defaults to MD5
    #[default]
    Unspecified,
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "md5-sess" => Some(Self::Md5Sess),
            "sha-256" => Some(Self::Sha256),
            "sha-256-sess" => Some(Self::Sha256Sess),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "",
            Self::Md5 => "MD5",
            Self::Md5Sess => "MD5-sess",
            Self::Sha256 => "SHA-256",
            Self::Sha256Sess => "SHA-256-sess",
        }
    }

    fn is_session(&self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }

    fn message_digest(&self) -> MessageDigest {
        match self {
            Self::Sha256 | Self::Sha256Sess => MessageDigest::sha256(),
            _ => MessageDigest::md5(),
        }
    }
}

/// Quality of Protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qop {
    #[default]
    Unspecified,
    /// Authentication only
    Auth,
}

/// A parsed `Digest` challenge, bound to the request that answers it.
///
/// Clones share the nonce counter, so every header produced for the same
/// server nonce carries a fresh `nc` value.
#[derive(Debug, Clone)]
pub struct DigestChallenge {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    algorithm: DigestAlgorithm,
    qop: Qop,
    stale: bool,
    userhash: bool,
    method: String,
    uri: String,
    nonce_count: Arc<AtomicU32>,
}

impl DigestChallenge {
    /// Parse the parameters of a challenge (the text after `Digest `).
    ///
    /// # Example
    /// ```ignore
    /// let challenge = DigestChallenge::parse(
    ///     r#"realm="test", nonce="abc123", qop="auth", algorithm=MD5"#
    /// )?;
    /// ```
    pub fn parse(params: &str) -> Result<Self, NetError> {
        let mut challenge = Self {
            realm: String::new(),
            nonce: String::new(),
            opaque: None,
            algorithm: DigestAlgorithm::default(),
            qop: Qop::default(),
            stale: false,
            userhash: false,
            method: String::new(),
            uri: String::new(),
            nonce_count: Arc::new(AtomicU32::new(0)),
        };

        for part in split_params(params) {
            let (key, value) = parse_param(part)?;
            match key.to_lowercase().as_str() {
                "realm" => challenge.realm = value.to_string(),
                "nonce" => challenge.nonce = value.to_string(),
                "opaque" => challenge.opaque = Some(value.to_string()),
                "algorithm" => {
                    challenge.algorithm =
                        DigestAlgorithm::parse(value).ok_or(NetError::InvalidAuthChallenge)?;
                }
                "qop" => {
                    if value.split(',').any(|q| q.trim().eq_ignore_ascii_case("auth")) {
                        challenge.qop = Qop::Auth;
                    }
                }
                "stale" => challenge.stale = value.eq_ignore_ascii_case("true"),
                "userhash" => challenge.userhash = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if challenge.nonce.is_empty() {
            return Err(NetError::InvalidAuthChallenge);
        }
        Ok(challenge)
    }

    /// Attach the request method and URI the first response answers.
    pub fn bind(mut self, method: &str, uri: &str) -> Self {
        self.method = method.to_string();
        self.uri = uri.to_string();
        self
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn qop(&self) -> Qop {
        self.qop
    }

    /// Nonce expired but the credentials were accepted.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Build the complete `Authorization` value for a request.
    pub fn authorization(
        &self,
        method: &str,
        uri: &str,
        username: &str,
        password: &str,
    ) -> Result<String, NetError> {
        let count = self.nonce_count.fetch_add(1, Ordering::Relaxed) + 1;
        let nc = format!("{:08x}", count);
        let cnonce = generate_cnonce();
        let response = self.compute_response(method, uri, username, password, &cnonce, &nc)?;
        // userhash: send H(user:realm) in place of the plain name
        let sent_username = if self.userhash {
            self.hex_hash(&format!("{}:{}", username, self.realm))?
        } else {
            username.to_string()
        };
        Ok(self.assemble_credentials(&sent_username, uri, &response, &cnonce, &nc))
    }

    fn compute_response(
        &self,
        method: &str,
        uri: &str,
        username: &str,
        password: &str,
        cnonce: &str,
        nc: &str,
    ) -> Result<String, NetError> {
        // HA1 = H(user:realm:password)
        let mut ha1 = self.hex_hash(&format!("{}:{}:{}", username, self.realm, password))?;

        // Session variants: HA1 = H(HA1:nonce:cnonce)
        if self.algorithm.is_session() {
            ha1 = self.hex_hash(&format!("{}:{}:{}", ha1, self.nonce, cnonce))?;
        }

        let ha2 = self.hex_hash(&format!("{}:{}", method, uri))?;

        let input = match self.qop {
            Qop::Auth => format!("{}:{}:{}:{}:auth:{}", ha1, self.nonce, nc, cnonce, ha2),
            Qop::Unspecified => format!("{}:{}:{}", ha1, self.nonce, ha2),
        };
        self.hex_hash(&input)
    }

    fn hex_hash(&self, input: &str) -> Result<String, NetError> {
        let digest = hash(self.algorithm.message_digest(), input.as_bytes())
            .map_err(|e| NetError::negotiation(format!("digest hash failed: {}", e)))?;
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest.iter() {
            let _ = write!(hex, "{:02x}", byte);
        }
        Ok(hex)
    }

    fn assemble_credentials(&self, username: &str, uri: &str, response: &str, cnonce: &str, nc: &str) -> String {
        let mut auth = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
            username, self.realm, self.nonce, uri
        );

        if self.algorithm != DigestAlgorithm::Unspecified {
            auth.push_str(&format!(", algorithm={}", self.algorithm.as_str()));
        }

        auth.push_str(&format!(", response=\"{}\"", response));

        if let Some(ref opaque) = self.opaque {
            auth.push_str(&format!(", opaque=\"{}\"", opaque));
        }

        if self.qop == Qop::Auth {
            auth.push_str(&format!(", qop=auth, nc={}, cnonce=\"{}\"", nc, cnonce));
        }

        if self.userhash {
            auth.push_str(", userhash=true");
        }

        auth
    }
}

/// 16 hex chars, unique per call within the process.
fn generate_cnonce() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    format!("{:016x}", seed ^ SEQ.fetch_add(1, Ordering::Relaxed).rotate_left(32))
}

/// Split challenge params on commas outside quotes.
fn split_params(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (i, c) in header.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                let part = header[start..i].trim();
                if !part.is_empty() {
                    parts.push(part);
                }
                start = i + 1;
            }
            _ => {}
        }
    }

    let part = header[start..].trim();
    if !part.is_empty() {
        parts.push(part);
    }

    parts
}

/// Parse a single key=value or key="value" parameter.
fn parse_param(param: &str) -> Result<(&str, &str), NetError> {
    let eq_pos = param.find('=').ok_or(NetError::InvalidAuthChallenge)?;
    let key = param[..eq_pos].trim();
    let mut value = param[eq_pos + 1..].trim();

    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value = &value[1..value.len() - 1];
    }

    Ok((key, value))
}
