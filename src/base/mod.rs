//! Base types and error handling.
//!
//! Provides foundational types mirroring Chromium's `net/base/`:
//! - [`NetError`](neterror::NetError): Network error codes matching `net_error_list.h`
//! - [`ExchangeState`](loadstate::ExchangeState): Request progress across auth retries

pub mod context;
pub mod loadstate;
pub mod neterror;
