//! Credentials plus the negotiation state tied to them.

use crate::base::neterror::NetError;
use crate::http::auth::digest::DigestChallenge;
use base64::{engine::general_purpose, Engine as _};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Authentication scheme a realm negotiates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthScheme {
    Basic,
    Digest,
    Ntlm,
    Kerberos,
    Spnego,
}

impl AuthScheme {
    /// The token a matching challenge header starts with.
    pub fn challenge_token(&self) -> &'static str {
        match self {
            AuthScheme::Basic => "Basic",
            AuthScheme::Digest => "Digest",
            AuthScheme::Ntlm => "NTLM",
            AuthScheme::Kerberos | AuthScheme::Spnego => "Negotiate",
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthScheme::Basic => "BASIC",
            AuthScheme::Digest => "DIGEST",
            AuthScheme::Ntlm => "NTLM",
            AuthScheme::Kerberos => "KERBEROS",
            AuthScheme::Spnego => "SPNEGO",
        };
        f.write_str(name)
    }
}

impl FromStr for AuthScheme {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(AuthScheme::Basic),
            "digest" => Ok(AuthScheme::Digest),
            "ntlm" => Ok(AuthScheme::Ntlm),
            "kerberos" => Ok(AuthScheme::Kerberos),
            "spnego" | "negotiate" => Ok(AuthScheme::Spnego),
            _ => Err(NetError::InvalidAuthScheme(s.to_string())),
        }
    }
}

/// Credentials for one auth scheme.
///
/// Realms are immutable; the interceptor derives an updated copy through
/// [`Realm::to_builder`] and stores it on the exchange.
#[derive(Clone)]
pub struct Realm {
    scheme: AuthScheme,
    principal: String,
    secret: Zeroizing<String>,
    preemptive: bool,
    digest: Option<DigestChallenge>,
    ntlm_domain: Option<String>,
    ntlm_host: Option<String>,
    service_principal_name: Option<String>,
    realm_name: Option<String>,
    use_canonical_hostname: bool,
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("scheme", &self.scheme)
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .field("preemptive", &self.preemptive)
            .field("digest", &self.digest)
            .field("ntlm_domain", &self.ntlm_domain)
            .field("ntlm_host", &self.ntlm_host)
            .finish_non_exhaustive()
    }
}

impl Realm {
    pub fn builder(scheme: AuthScheme, principal: impl Into<String>, secret: impl Into<String>) -> RealmBuilder {
        RealmBuilder {
            realm: Realm {
                scheme,
                principal: principal.into(),
                secret: Zeroizing::new(secret.into()),
                preemptive: false,
                digest: None,
                ntlm_domain: None,
                ntlm_host: None,
                service_principal_name: None,
                realm_name: None,
                use_canonical_hostname: false,
            },
        }
    }

    pub fn basic(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::builder(AuthScheme::Basic, principal, secret).build()
    }

    pub fn digest(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::builder(AuthScheme::Digest, principal, secret).build()
    }

    pub fn ntlm(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::builder(AuthScheme::Ntlm, principal, secret).build()
    }

    /// Copy this realm into a builder for derivation.
    pub fn to_builder(&self) -> RealmBuilder {
        RealmBuilder { realm: self.clone() }
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn is_preemptive(&self) -> bool {
        self.preemptive
    }

    pub fn digest_challenge(&self) -> Option<&DigestChallenge> {
        self.digest.as_ref()
    }

    pub fn ntlm_domain(&self) -> Option<&str> {
        self.ntlm_domain.as_deref()
    }

    pub fn ntlm_host(&self) -> Option<&str> {
        self.ntlm_host.as_deref()
    }

    pub fn service_principal_name(&self) -> Option<&str> {
        self.service_principal_name.as_deref()
    }

    pub fn realm_name(&self) -> Option<&str> {
        self.realm_name.as_deref()
    }

    pub fn use_canonical_hostname(&self) -> bool {
        self.use_canonical_hostname
    }

    /// `Basic base64(principal:secret)`.
    pub fn basic_header_value(&self) -> String {
        let creds = Zeroizing::new(format!("{}:{}", self.principal, self.secret.as_str()));
        format!("Basic {}", general_purpose::STANDARD.encode(creds.as_bytes()))
    }
}

/// Builder for [`Realm`].
#[derive(Debug, Clone)]
pub struct RealmBuilder {
    realm: Realm,
}

impl RealmBuilder {
    pub fn scheme(mut self, scheme: AuthScheme) -> Self {
        self.realm.scheme = scheme;
        self
    }

    pub fn preemptive(mut self, preemptive: bool) -> Self {
        self.realm.preemptive = preemptive;
        self
    }

    /// Parse a `Digest` challenge and bind it to the request it answers.
    pub fn digest_challenge(mut self, header: &str, method: &str, uri: &str) -> Result<Self, NetError> {
        let params = header
            .get(..6)
            .filter(|p| p.eq_ignore_ascii_case("digest"))
            .map(|_| &header[6..])
            .unwrap_or(header);
        let challenge = DigestChallenge::parse(params)?.bind(method, uri);
        self.realm.digest = Some(challenge);
        Ok(self)
    }

    pub fn ntlm_domain(mut self, domain: impl Into<String>) -> Self {
        self.realm.ntlm_domain = Some(domain.into());
        self
    }

    pub fn ntlm_host(mut self, host: impl Into<String>) -> Self {
        self.realm.ntlm_host = Some(host.into());
        self
    }

    pub fn service_principal_name(mut self, spn: impl Into<String>) -> Self {
        self.realm.service_principal_name = Some(spn.into());
        self
    }

    pub fn realm_name(mut self, name: impl Into<String>) -> Self {
        self.realm.realm_name = Some(name.into());
        self
    }

    pub fn use_canonical_hostname(mut self, yes: bool) -> Self {
        self.realm.use_canonical_hostname = yes;
        self
    }

    pub fn build(self) -> Realm {
        self.realm
    }
}
