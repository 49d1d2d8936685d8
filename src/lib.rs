//! # relaynet
//!
//! An asynchronous HTTP/1.1 client core.
//!
//! `relaynet` sends requests over a bounded connection pool, streams
//! multipart bodies without buffering them, and answers authentication
//! challenges (Basic, Digest, NTLM, Kerberos/SPNEGO) transparently, for
//! both origin servers (401) and proxies (407).
//!
//! ## Features
//!
//! - **Connection Pooling**: global and per-route limits, idle eviction,
//!   fail-fast or bounded waiting when full
//! - **Multipart Bodies**: exact `Content-Length` up front, file parts
//!   copied in bounded chunks, back-pressure on slow channels
//! - **Authentication**: one challenge round per exchange, connection
//!   reuse for connection-oriented schemes, SPNEGO to NTLM fallback
//! - **Cancellation**: abort an exchange from another task; its
//!   connection and body are released exactly once
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relaynet::{Client, Form, Part, Realm};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), relaynet::NetError> {
//!     let client = Client::new()?;
//!     let form = Form::new()
//!         .text("title", "report")
//!         .part("file", Part::file("report.pdf"));
//!     let response = client
//!         .post("http://intranet.example/upload")
//!         .multipart(form)
//!         .realm(Realm::ntlm("alice", "secret"))
//!         .send()
//!         .await?;
//!     println!("Status: {}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Core types and error definitions
//! - [`config`] - Client and pool settings
//! - [`http`] - Exchanges, auth, multipart encoding, and body handling
//! - [`socket`] - Routes, connecting, and the connection pool

pub mod base;
pub mod client;
pub mod config;
pub mod http;
pub mod socket;

pub use base::neterror::NetError;
pub use client::{Client, ClientBuilder, RequestBuilder};
pub use config::{ClientConfig, PoolConfig};
pub use http::auth::{AuthScheme, Realm, RealmBuilder};
pub use http::multipart::{Form, Part};
pub use http::{Exchange, HttpRequest, HttpResponse};
