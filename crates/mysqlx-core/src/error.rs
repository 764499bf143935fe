//! Error types for mysqlx operations.

use std::fmt;

/// Numeric code reported when every configured endpoint has been tried and
/// marked unavailable.
pub const NO_ROUTERS_AVAILABLE: u16 = 4001;

/// The primary error type for all mysqlx operations.
#[derive(Debug)]
pub enum Error {
    /// Transport-level errors (connect, read, write, disconnect)
    Connection(ConnectionError),
    /// TLS negotiation or configuration errors
    Tls(TlsError),
    /// Authentication errors, before or during the handshake
    Auth(AuthError),
    /// Wire-level protocol errors (framing, unexpected messages)
    Protocol(ProtocolError),
    /// An Error frame reported by the server
    Server(ServerError),
    /// Routing/failover errors
    Router(RouterError),
    /// Configuration errors caught at construction time
    Config(ConfigError),
    /// The session is closed; no further operations are possible
    SessionClosed,
    /// I/O errors not tied to a specific connection phase
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish a connection (unclassified)
    Connect,
    /// DNS resolution failed
    DnsResolution,
    /// Connection refused by the peer
    Refused,
    /// Connect or I/O deadline expired
    Timeout,
    /// Host unreachable
    Unreachable,
    /// Connection lost during operation
    Disconnected,
}

impl ConnectionErrorKind {
    /// Whether this failure class is transient for routing purposes.
    ///
    /// Transient failures mark the endpoint unavailable and let the router
    /// move on to the next candidate; everything else propagates as-is.
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            ConnectionErrorKind::DnsResolution
                | ConnectionErrorKind::Refused
                | ConnectionErrorKind::Timeout
                | ConnectionErrorKind::Unreachable
        )
    }
}

#[derive(Debug)]
pub struct TlsError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct AuthError {
    pub kind: AuthErrorKind,
    /// Server error code, present for server rejections
    pub code: Option<u32>,
    /// Server SQLSTATE, present for server rejections
    pub sql_state: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// The configured mechanism is not in the server's advertised list;
    /// detected before any authentication bytes are sent
    MechanismUnsupported,
    /// The server rejected the handshake with an Error frame
    ServerRejected,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub kind: ProtocolErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// A frame header declared a zero-length body or the payload could not
    /// be decoded
    MalformedFrame,
    /// A frame header declared a body larger than the configured maximum
    FrameTooLarge,
    /// A message type that is not valid at the current protocol state
    UnexpectedMessage,
    /// Capability negotiation failed
    Capability,
}

/// An Error frame as reported by the server.
#[derive(Debug, Clone)]
pub struct ServerError {
    pub severity: Severity,
    pub code: u32,
    pub sql_state: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    #[default]
    Error,
    /// The server will close the connection after a fatal error
    Fatal,
}

#[derive(Debug)]
pub struct RouterError {
    /// Numeric error code; `NO_ROUTERS_AVAILABLE` (4001) on exhaustion
    pub code: u16,
    pub message: String,
}

impl RouterError {
    /// The error produced when every endpoint has been exhausted.
    pub fn all_routers_failed() -> Self {
        Self {
            code: NO_ROUTERS_AVAILABLE,
            message: "All routers failed.".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl Error {
    /// Is this a transient transport failure the router may absorb?
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Connection(c) => c.kind.is_transient(),
            _ => false,
        }
    }

    /// Numeric error code, where the error carries one.
    pub fn errno(&self) -> Option<u16> {
        match self {
            Error::Router(r) => Some(r.code),
            _ => None,
        }
    }

    /// SQLSTATE if available (server errors and server auth rejections).
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(s) => Some(s.sql_state.as_str()),
            Error::Auth(a) => a.sql_state.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Tls(e) => write!(f, "TLS error: {}", e.message),
            Error::Auth(e) => match e.kind {
                AuthErrorKind::MechanismUnsupported => {
                    write!(f, "Authentication error: {}", e.message)
                }
                AuthErrorKind::ServerRejected => {
                    if let Some(code) = e.code {
                        write!(f, "Authentication failed: {} ({})", e.message, code)
                    } else {
                        write!(f, "Authentication failed: {}", e.message)
                    }
                }
            },
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Server(e) => write!(
                f,
                "Server error (SQLSTATE {}, code {}): {}",
                e.sql_state, e.code, e.message
            ),
            Error::Router(e) => write!(f, "{}", e.message),
            Error::Config(e) => write!(f, "{}", e.message),
            Error::SessionClosed => write!(f, "Session is closed"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Tls(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQLSTATE {})", self.message, self.sql_state)
    }
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<TlsError> for Error {
    fn from(err: TlsError) -> Self {
        Error::Tls(err)
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        Error::Auth(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}

impl From<RouterError> for Error {
    fn from(err: RouterError) -> Self {
        Error::Router(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for mysqlx operations.
pub type Result<T> = std::result::Result<T, Error>;
