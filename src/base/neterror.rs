use std::io;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NetError {
    #[error("Request aborted")]
    Aborted,

    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {reason}")]
    ConnectionFailedTo { host: String, port: u16, reason: String },
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("I/O error ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },

    // Pool Errors
    #[error("Max connections reached")]
    MaxConnectionsReached,
    #[error("Max connections per route reached")]
    MaxConnectionsPerRouteReached,
    #[error("Timed out waiting for a pooled connection")]
    PoolAcquireTimeout,

    // HTTP Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Unknown URL scheme")]
    UnknownUrlScheme,
    #[error("Invalid header")]
    InvalidHeader,
    #[error("Invalid response")]
    InvalidResponse,
    #[error("Empty response")]
    EmptyResponse,
    #[error("Request timed out")]
    TimedOut,
    #[error("HTTP body error")]
    HttpBodyError,
    #[error("Invalid UTF-8 in body")]
    InvalidUtf8,
    #[error("JSON parse error")]
    JsonParseError,
    #[error("Request body closed")]
    BodyClosed,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Auth Errors
    #[error("Invalid authentication scheme: {0}")]
    InvalidAuthScheme(String),
    #[error("Invalid auth challenge")]
    InvalidAuthChallenge,
    #[error("Authentication negotiation failed: {0}")]
    Negotiation(String),

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::Aborted => -3,
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed => -104,
            NetError::NameNotResolved => -105,
            NetError::SocketNotConnected => -112,
            NetError::ConnectionTimedOut => -118,
            NetError::MaxConnectionsReached => -133,

            NetError::InvalidUrl => -300,
            NetError::UnknownUrlScheme => -302,
            NetError::InvalidResponse => -320,
            NetError::EmptyResponse => -324,
            NetError::InvalidAuthScheme(_) => -339,
            NetError::Negotiation(_) => -343,

            // Custom codes, kept out of Chromium's reserved ranges.
            NetError::ConnectionFailedTo { .. } => -10000,
            NetError::Io { .. } => -10001,
            NetError::MaxConnectionsPerRouteReached => -10002,
            NetError::PoolAcquireTimeout => -10003,
            NetError::InvalidHeader => -10005,
            NetError::TimedOut => -10006,
            NetError::HttpBodyError => -10007,
            NetError::InvalidUtf8 => -10008,
            NetError::JsonParseError => -10009,
            NetError::BodyClosed => -10011,
            NetError::InvalidConfig(_) => -10012,
            NetError::InvalidAuthChallenge => -10013,
            NetError::Unknown(code) => *code,
        }
    }

    /// Pool capacity failure. Surfaced to the caller, never retried by the pool.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            NetError::MaxConnectionsReached
                | NetError::MaxConnectionsPerRouteReached
                | NetError::PoolAcquireTimeout
        )
    }

    /// Read/write failure on a connection. The connection must be closed.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            NetError::ConnectionClosed
                | NetError::ConnectionReset
                | NetError::ConnectionRefused
                | NetError::ConnectionAborted
                | NetError::ConnectionFailed
                | NetError::ConnectionFailedTo { .. }
                | NetError::SocketNotConnected
                | NetError::ConnectionTimedOut
                | NetError::Io { .. }
        )
    }

    /// Authentication failures that terminate the exchange instead of
    /// surfacing the 401/407.
    pub fn is_fatal_auth(&self) -> bool {
        matches!(self, NetError::Negotiation(_) | NetError::InvalidAuthScheme(_))
    }

    pub fn connection_failed_to(host: &str, port: u16, err: io::Error) -> Self {
        NetError::ConnectionFailedTo { host: host.to_string(), port, reason: err.to_string() }
    }

    pub fn negotiation(message: impl Into<String>) -> Self {
        NetError::Negotiation(message.into())
    }
}

impl From<io::Error> for NetError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
            io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            io::ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
            io::ErrorKind::NotConnected => NetError::SocketNotConnected,
            io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => NetError::ConnectionClosed,
            kind => NetError::Io { kind, message: err.to_string() },
        }
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -3 => NetError::Aborted,
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -112 => NetError::SocketNotConnected,
            -118 => NetError::ConnectionTimedOut,
            -133 => NetError::MaxConnectionsReached,

            -300 => NetError::InvalidUrl,
            -302 => NetError::UnknownUrlScheme,
            -320 => NetError::InvalidResponse,
            -324 => NetError::EmptyResponse,

            -10002 => NetError::MaxConnectionsPerRouteReached,
            -10003 => NetError::PoolAcquireTimeout,
            -10005 => NetError::InvalidHeader,
            -10006 => NetError::TimedOut,
            -10007 => NetError::HttpBodyError,
            -10008 => NetError::InvalidUtf8,
            -10009 => NetError::JsonParseError,
            -10011 => NetError::BodyClosed,
            -10013 => NetError::InvalidAuthChallenge,
            _ => NetError::Unknown(code),
        }
    }
}
