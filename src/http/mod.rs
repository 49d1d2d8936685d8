pub mod auth;
pub mod exchange;
pub mod multipart;
pub mod request;
pub mod requestbody;
pub mod response;
pub mod responsebody;
pub mod streamfactory;
pub mod transaction;

// Re-exports for convenience
pub use exchange::{AbortHandle, Exchange};
pub use request::HttpRequest;
pub use requestbody::RequestBody;
pub use response::HttpResponse;
pub use responsebody::ResponseBody;
pub use transaction::HttpSender;
