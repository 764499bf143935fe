//! MySQL X Protocol client driver core.
//!
//! This crate implements the protocol core of an X DevAPI driver: the
//! framed message codec, the connection lifecycle state machine, failover
//! routing over a prioritized endpoint list, and the request/reply
//! dispatcher that higher layers build their query verbs on. It provides:
//!
//! - Frame codec (4-byte little-endian length + type byte + payload)
//! - Message registry for the X Protocol type identifiers
//! - Connection with send/receive primitives, poisoning, and an in-place
//!   TLS upgrade
//! - Pluggable SASL-style authentication (PLAIN, MYSQL41, SHA256_MEMORY)
//! - Session state machine: capabilities, optional TLS, authentication
//! - Reply streams with typed events and push-style sink adapters
//! - Router with transient-unavailability memory and code-4001 exhaustion
//!
//! # X Protocol Overview
//!
//! The X Plugin serves a length-prefixed, message-oriented binary protocol
//! on its own port (default 33060). Each frame carries a 4-byte
//! little-endian length that counts the type byte and the protobuf payload;
//! a single request produces an ordered stream of reply frames closed by a
//! family-specific terminal frame.
//!
//! # Example
//!
//! ```rust,ignore
//! use mysqlx::{Session, SessionProperties};
//!
//! let props = SessionProperties::new()
//!     .user("app")
//!     .password("secret")
//!     .schema("inventory")
//!     .endpoint("db.example.com", 33060)
//!     .ssl(true);
//!
//! let mut session = Session::new(props)?;
//! session.connect()?;
//! for event in session.execute_sql("SELECT 1")? {
//!     println!("{:?}", event?);
//! }
//! session.close()?;
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod reply;
pub mod router;
pub mod session;
pub mod socket;
pub mod tls;

pub use config::{SessionProperties, TlsOptions};
pub use connection::Connection;
pub use reply::{MetaEvent, Notice, ReplyEvent, ReplyStream, StatementSummary};
pub use router::Router;
pub use session::{Session, SessionInfo};
pub use socket::TcpSocketFactory;

pub use mysqlx_core::{Endpoint, Error, Result, SocketFactory, Stream};
