//! Socket and connection management.
//!
//! Connection pooling and socket handling, modeled on Chromium's `net/socket/`:
//! - [`route`]: (scheme, host, port) pool key
//! - [`pool`]: Connection pooling (6 per route, 256 total by default)
//! - [`connectjob`]: DNS → TCP → (TLS) connection flow
//! - [`stream`]: Boxed socket abstraction

pub mod connectjob;
pub mod pool;
pub mod route;
pub mod stream;

pub use pool::{ConnectionPool, Connector, Lease, Poolable};
pub use route::Route;
