//! HTTP authentication: credentials, challenge parsing, and the
//! interceptor that answers 401 and 407 responses.

pub mod digest;
pub mod interceptor;
pub mod negotiate;
pub mod realm;

pub use digest::{DigestAlgorithm, DigestChallenge, Qop};
pub use interceptor::{AuthAction, AuthInterceptor};
pub use negotiate::{DefaultNtlmEngine, NtlmEngine, SpnegoEngine, Type2Message, UnavailableSpnegoEngine};
pub use realm::{AuthScheme, Realm, RealmBuilder};
