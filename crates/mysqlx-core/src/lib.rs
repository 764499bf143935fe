//! Core contracts for the mysqlx X Protocol driver.
//!
//! This crate provides the foundational abstractions shared by the protocol
//! core and by higher layers:
//!
//! - `Error` taxonomy for transport, TLS, authentication, protocol, server,
//!   routing, and configuration failures
//! - `Endpoint` type and endpoint-list validation
//! - `Stream` / `SocketFactory` traits describing the duplex byte stream the
//!   driver consumes

pub mod endpoint;
pub mod error;
pub mod socket;

pub use endpoint::{validate_endpoints, Endpoint};
pub use error::{
    AuthError, AuthErrorKind, ConfigError, ConnectionError, ConnectionErrorKind, Error,
    ProtocolError, ProtocolErrorKind, Result, RouterError, ServerError, Severity, TlsError,
    NO_ROUTERS_AVAILABLE,
};
pub use socket::{SocketFactory, Stream};
