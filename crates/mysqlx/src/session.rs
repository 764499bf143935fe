//! Session lifecycle state machine.
//!
//! A session is created closed. `connect` acquires a stream through the
//! router and drives the handshake: capability negotiation, the optional
//! TLS upgrade (followed by a capability refresh over the encrypted
//! stream), then the SASL-style authentication exchange. Once ready, the
//! session is a strictly sequential request/response arbiter: one
//! outstanding reply stream at a time, enforced by the borrow on `submit`.
//!
//! Any fatal error releases the connection (half-close, then drop) before
//! it is surfaced, and drives the session into the absorbing Closed state.

use std::mem;

use log::debug;
use mysqlx_core::error::{
    AuthError, AuthErrorKind, ConnectionError, ConnectionErrorKind, Error, ProtocolError,
    ProtocolErrorKind, TlsError,
};
use mysqlx_core::Endpoint;

use crate::auth::Credentials;
use crate::config::SessionProperties;
use crate::connection::Connection;
use crate::protocol::{reader, writer, Capabilities, Message, ServerMessage};
use crate::reply::{self, ReplyEvent, ReplyStream, SessionTracker, StatementSummary, Terminal};
use crate::router::Router;

/// Diagnostic snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub db_user: String,
    pub host: String,
    pub port: u16,
}

enum SessionState {
    /// Created but never connected
    Fresh,
    /// Handshake completed; connection owned here
    Open(Box<OpenSession>),
    /// Absorbing terminal state
    Closed,
}

struct OpenSession {
    conn: Connection,
    caps: Capabilities,
    endpoint: Endpoint,
    tracker: SessionTracker,
}

/// One client session over one connection.
pub struct Session {
    props: SessionProperties,
    router: Router,
    state: SessionState,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            SessionState::Fresh => "fresh",
            SessionState::Open(_) => "open",
            SessionState::Closed => "closed",
        };
        f.debug_struct("Session")
            .field("user", &self.props.user)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Validate the properties and create a closed session.
    pub fn new(props: SessionProperties) -> Result<Self, Error> {
        let router = Router::new(&props.endpoints)?;
        Ok(Self {
            props,
            router,
            state: SessionState::Fresh,
        })
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed)
    }

    /// Negotiated capabilities, frozen after authentication.
    pub fn capabilities(&self) -> Option<&Capabilities> {
        match &self.state {
            SessionState::Open(open) => Some(&open.caps),
            _ => None,
        }
    }

    /// Schema as last reported by the server.
    pub fn current_schema(&self) -> Option<&str> {
        match &self.state {
            SessionState::Open(open) => open.tracker.current_schema.as_deref(),
            _ => None,
        }
    }

    /// Server-assigned client id, when one was reported.
    pub fn client_id(&self) -> Option<u64> {
        match &self.state {
            SessionState::Open(open) => open.tracker.client_id,
            _ => None,
        }
    }

    /// Diagnostic snapshot: the connected endpoint when open, the
    /// highest-priority candidate otherwise.
    pub fn inspect(&self) -> SessionInfo {
        let (host, port) = match &self.state {
            SessionState::Open(open) => (open.endpoint.host.clone(), open.endpoint.port),
            _ => {
                let first = self.router.first();
                (first.host.clone(), first.port)
            }
        };
        SessionInfo {
            db_user: self.props.user.clone(),
            host,
            port,
        }
    }

    /// Acquire an endpoint, negotiate, optionally secure, authenticate.
    ///
    /// A failed attempt leaves the session Fresh so it can be retried; the
    /// acquired stream is always released before the error surfaces.
    pub fn connect(&mut self) -> Result<(), Error> {
        match &self.state {
            SessionState::Closed => return Err(Error::SessionClosed),
            SessionState::Open(_) => return Ok(()),
            SessionState::Fresh => {}
        }

        let factory = self.props.socket_factory.clone();
        let (stream, endpoint) = self
            .router
            .connect(factory.as_ref(), self.props.connect_timeout)?;
        let mut conn = Connection::new(stream);

        match handshake(&mut conn, &self.props, &endpoint.host) {
            Ok(caps) => {
                debug!(
                    "session ready on {} as '{}'",
                    endpoint.address(),
                    self.props.user
                );
                self.state = SessionState::Open(Box::new(OpenSession {
                    conn,
                    caps,
                    endpoint,
                    tracker: SessionTracker::default(),
                }));
                Ok(())
            }
            Err(err) => {
                let _ = conn.close();
                Err(err)
            }
        }
    }

    fn open_mut(&mut self) -> Result<&mut OpenSession, Error> {
        // A fatal stream error recorded earlier finishes the transition to
        // Closed here; the connection was already released.
        let fatal = matches!(&self.state, SessionState::Open(open) if open.tracker.fatal);
        if fatal {
            self.state = SessionState::Closed;
        }
        match &mut self.state {
            SessionState::Open(open) => Ok(&mut **open),
            SessionState::Closed => Err(Error::SessionClosed),
            SessionState::Fresh => Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "session is not connected".to_string(),
                source: None,
            })),
        }
    }

    /// Submit one request and open its reply stream.
    ///
    /// The stream borrows the session mutably, so at most one reply stream
    /// is open at any time.
    pub fn submit(&mut self, request: Message) -> Result<ReplyStream<'_>, Error> {
        let open = self.open_mut()?;
        let terminal = Terminal::for_request(request.type_id);
        open.tracker.summary = StatementSummary::default();

        if let Err(err) = open.conn.send(&request) {
            open.tracker.fatal = true;
            let _ = open.conn.close();
            return Err(err);
        }

        let OpenSession {
            ref mut conn,
            ref mut tracker,
            ..
        } = *open;
        Ok(ReplyStream::new(conn, tracker, terminal))
    }

    /// Submit an SQL statement through the `sql` namespace.
    pub fn execute_sql(&mut self, stmt: &str) -> Result<ReplyStream<'_>, Error> {
        self.submit(writer::stmt_execute("sql", stmt.as_bytes()))
    }

    /// Submit a request and push its replies into sinks.
    ///
    /// `row_sink` receives every data row; `meta_sink` receives metadata,
    /// notices, and the terminal event. Resolves to the statement summary.
    pub fn submit_with_sinks<R, M>(
        &mut self,
        request: Message,
        row_sink: R,
        meta_sink: M,
    ) -> Result<StatementSummary, Error>
    where
        R: FnMut(Vec<u8>),
        M: FnMut(ReplyEvent),
    {
        let stream = self.submit(request)?;
        reply::deliver(stream, row_sink, meta_sink)
    }

    /// Close the session and release its connection. Idempotent.
    pub fn close(&mut self) -> Result<(), Error> {
        match mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Open(mut open) => {
                if !open.conn.is_poisoned() && !open.conn.is_closed() {
                    // Polite goodbye; the Ok reply is best-effort.
                    if open.conn.send(&writer::con_close()).is_ok() {
                        let _ = open.conn.receive();
                    }
                }
                let _ = open.conn.close();
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Drive a fresh connection to Ready: Negotiating, optionally Securing and
/// the TLS handshake, then Authenticating.
fn handshake(
    conn: &mut Connection,
    props: &SessionProperties,
    server_name: &str,
) -> Result<Capabilities, Error> {
    conn.send(&writer::capabilities_get())?;
    let mut caps = expect_capabilities(conn.receive()?)?;

    if props.ssl {
        conn.send(&writer::capabilities_set_tls(true))?;
        let reply = conn.receive()?;
        match reply.server_type() {
            Some(ServerMessage::Ok) => {}
            Some(ServerMessage::Error) => {
                let server = reader::decode_error(&reply.payload)?;
                return Err(Error::Tls(TlsError {
                    message: format!("server refused TLS: {}", server.message),
                    source: None,
                }));
            }
            _ => return Err(unexpected(reply.type_id, "CapabilitiesSet reply")),
        }

        conn.upgrade(&props.ssl_options, server_name)?;
        debug!("TLS established, refreshing capabilities");

        conn.send(&writer::capabilities_get())?;
        caps = expect_capabilities(conn.receive()?)?;
    }

    let mechanism = props.auth.unwrap_or_default().handler();
    if let Some(advertised) = caps.auth_mechanisms() {
        if !mechanism.verify_server(&advertised) {
            return Err(Error::Auth(AuthError {
                kind: AuthErrorKind::MechanismUnsupported,
                code: None,
                sql_state: None,
                message: format!(
                    "mechanism {} is not among the server's mechanisms {:?}",
                    mechanism.name(),
                    advertised
                ),
            }));
        }
    }

    let creds = Credentials {
        user: &props.user,
        password: &props.password,
        schema: &props.schema,
    };
    conn.send(&writer::auth_start(
        mechanism.name(),
        &mechanism.initial_response(&creds),
    ))?;

    loop {
        let msg = conn.receive()?;
        match msg.server_type() {
            Some(ServerMessage::AuthenticateContinue) => {
                let challenge = reader::decode_auth_data(&msg.payload)?;
                let response = mechanism.continue_response(&creds, &challenge)?;
                conn.send(&writer::auth_continue(&response))?;
            }
            Some(ServerMessage::AuthenticateOk) => {
                debug!("authenticated as '{}' via {}", props.user, mechanism.name());
                return Ok(caps);
            }
            // Servers may emit notices during the handshake.
            Some(ServerMessage::Notice) => continue,
            Some(ServerMessage::Error) => {
                let server = reader::decode_error(&msg.payload)?;
                return Err(Error::Auth(AuthError {
                    kind: AuthErrorKind::ServerRejected,
                    code: Some(server.code),
                    sql_state: Some(server.sql_state),
                    message: server.message,
                }));
            }
            _ => return Err(unexpected(msg.type_id, "authentication reply")),
        }
    }
}

fn expect_capabilities(msg: Message) -> Result<Capabilities, Error> {
    match msg.server_type() {
        Some(ServerMessage::Capabilities) => reader::decode_capabilities(&msg.payload),
        Some(ServerMessage::Error) => {
            let server = reader::decode_error(&msg.payload)?;
            Err(Error::Protocol(ProtocolError {
                kind: ProtocolErrorKind::Capability,
                message: format!(
                    "capability negotiation failed: {} (code {})",
                    server.message, server.code
                ),
            }))
        }
        _ => Err(unexpected(msg.type_id, "CapabilitiesGet reply")),
    }
}

fn unexpected(type_id: u8, context: &str) -> Error {
    Error::Protocol(ProtocolError {
        kind: ProtocolErrorKind::UnexpectedMessage,
        message: format!("unexpected message type {} as {}", type_id, context),
    })
}
