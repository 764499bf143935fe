//! X Protocol wire layer.
//!
//! X Protocol frames have a 5-byte header:
//! - 4 bytes: length (little-endian), counting the type byte and payload
//!   but not the length field itself
//! - 1 byte: message type
//!
//! Payloads are protobuf messages keyed by the type byte. The driver treats
//! them as opaque bytes except for the small control set it must interpret
//! (capabilities, authentication, Ok/Error, notices, statement
//! terminators); those are encoded and decoded by `writer` and `reader`.

pub mod codec;
pub mod reader;
pub mod writer;

pub use codec::FrameCodec;
pub use reader::ProtoReader;
pub use writer::ProtoWriter;

/// Largest frame body the decoder will accept (type byte + payload).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Size of the frame header (length field + type byte).
pub const HEADER_SIZE: usize = 5;

/// Client-to-server message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientMessage {
    /// Request the server capability set
    CapabilitiesGet = 1,
    /// Change client-visible capabilities (e.g. enable TLS)
    CapabilitiesSet = 2,
    /// Close the connection
    Close = 3,
    /// Begin the authentication handshake
    AuthenticateStart = 4,
    /// Continue a multi-round authentication handshake
    AuthenticateContinue = 5,
    /// Reset session state, keeping the connection
    SessionReset = 6,
    /// Close the session
    SessionClose = 7,
    /// Execute an SQL statement
    StmtExecute = 12,
    /// Document/table find
    CrudFind = 17,
    /// Document/table insert
    CrudInsert = 18,
    /// Document/table update
    CrudUpdate = 19,
    /// Document/table delete
    CrudDelete = 20,
    /// Open an expectation block
    ExpectOpen = 24,
    /// Close an expectation block
    ExpectClose = 25,
}

impl ClientMessage {
    /// Map a wire type byte to a known client message.
    pub const fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(ClientMessage::CapabilitiesGet),
            2 => Some(ClientMessage::CapabilitiesSet),
            3 => Some(ClientMessage::Close),
            4 => Some(ClientMessage::AuthenticateStart),
            5 => Some(ClientMessage::AuthenticateContinue),
            6 => Some(ClientMessage::SessionReset),
            7 => Some(ClientMessage::SessionClose),
            12 => Some(ClientMessage::StmtExecute),
            17 => Some(ClientMessage::CrudFind),
            18 => Some(ClientMessage::CrudInsert),
            19 => Some(ClientMessage::CrudUpdate),
            20 => Some(ClientMessage::CrudDelete),
            24 => Some(ClientMessage::ExpectOpen),
            25 => Some(ClientMessage::ExpectClose),
            _ => None,
        }
    }

    /// Requests whose reply stream ends with `StmtExecuteOk` rather than a
    /// plain `Ok`.
    pub const fn is_statement_family(self) -> bool {
        matches!(
            self,
            ClientMessage::StmtExecute
                | ClientMessage::CrudFind
                | ClientMessage::CrudInsert
                | ClientMessage::CrudUpdate
                | ClientMessage::CrudDelete
        )
    }
}

/// Server-to-client message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerMessage {
    /// Generic success
    Ok = 0,
    /// Error report; ends the current exchange
    Error = 1,
    /// Reply to CapabilitiesGet
    Capabilities = 2,
    /// Authentication challenge
    AuthenticateContinue = 3,
    /// Authentication accepted
    AuthenticateOk = 4,
    /// Out-of-band notice (warning, session state change, ...)
    Notice = 11,
    /// Column definition preceding the rows of a result set
    ColumnMetaData = 12,
    /// One row of a result set
    Row = 13,
    /// End of the last result set
    FetchDone = 14,
    /// Result fetch suspended (cursor protocol)
    FetchSuspended = 15,
    /// End of one result set, more follow
    FetchDoneMoreResultsets = 16,
    /// Statement completed
    StmtExecuteOk = 17,
    /// End of result sets, out-parameters follow
    FetchDoneMoreOutParams = 18,
}

impl ServerMessage {
    /// Map a wire type byte to a known server message.
    pub const fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ServerMessage::Ok),
            1 => Some(ServerMessage::Error),
            2 => Some(ServerMessage::Capabilities),
            3 => Some(ServerMessage::AuthenticateContinue),
            4 => Some(ServerMessage::AuthenticateOk),
            11 => Some(ServerMessage::Notice),
            12 => Some(ServerMessage::ColumnMetaData),
            13 => Some(ServerMessage::Row),
            14 => Some(ServerMessage::FetchDone),
            15 => Some(ServerMessage::FetchSuspended),
            16 => Some(ServerMessage::FetchDoneMoreResultsets),
            17 => Some(ServerMessage::StmtExecuteOk),
            18 => Some(ServerMessage::FetchDoneMoreOutParams),
            _ => None,
        }
    }
}

/// A logical message: one frame with the length header stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Wire type byte
    pub type_id: u8,
    /// Opaque payload; schema is keyed by `type_id`
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a client message.
    pub fn client(kind: ClientMessage, payload: Vec<u8>) -> Self {
        Self {
            type_id: kind as u8,
            payload,
        }
    }

    /// Interpret the type byte as a server message, if known.
    pub fn server_type(&self) -> Option<ServerMessage> {
        ServerMessage::from_u8(self.type_id)
    }
}

/// Parsed Ok payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkMsg {
    /// Optional informational text
    pub msg: Option<String>,
}

/// An X Protocol scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    SignedInt(i64),
    UnsignedInt(u64),
    Octets(Vec<u8>),
    Double(f64),
    Float(f32),
    Bool(bool),
    String(String),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Scalar::UnsignedInt(v) => Some(*v),
            Scalar::SignedInt(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// A capability value: scalar or structured.
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityValue {
    Scalar(Scalar),
    Object(Vec<(String, CapabilityValue)>),
    Array(Vec<CapabilityValue>),
}

/// The server capability set, preserved verbatim from the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capabilities {
    entries: Vec<(String, CapabilityValue)>,
}

impl Capabilities {
    /// Capability name carrying the advertised authentication mechanisms.
    pub const AUTH_MECHANISMS: &'static str = "authentication.mechanisms";

    pub fn new(entries: Vec<(String, CapabilityValue)>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Look up a capability by name.
    pub fn get(&self, name: &str) -> Option<&CapabilityValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, CapabilityValue)> {
        self.entries.iter()
    }

    /// The advertised authentication mechanisms, in server order.
    ///
    /// Returns `None` when the server did not advertise the capability at
    /// all, which callers treat as "no restriction".
    pub fn auth_mechanisms(&self) -> Option<Vec<String>> {
        match self.get(Self::AUTH_MECHANISMS)? {
            CapabilityValue::Array(values) => Some(
                values
                    .iter()
                    .filter_map(|v| match v {
                        CapabilityValue::Scalar(s) => s.as_str().map(str::to_owned),
                        _ => None,
                    })
                    .collect(),
            ),
            CapabilityValue::Scalar(s) => s.as_str().map(|m| vec![m.to_owned()]),
            CapabilityValue::Object(_) => None,
        }
    }
}

/// Scope of an out-of-band notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeScope {
    Global,
    Local,
}

/// An undecoded notice frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeFrame {
    /// Notice payload discriminator (`WARNING`, `SESSION_STATE_CHANGED`, ...)
    pub notice_type: u32,
    pub scope: NoticeScope,
    /// Opaque notice payload, keyed by `notice_type`
    pub payload: Vec<u8>,
}

impl NoticeFrame {
    pub const WARNING: u32 = 1;
    pub const SESSION_VARIABLE_CHANGED: u32 = 2;
    pub const SESSION_STATE_CHANGED: u32 = 3;
}

/// A server warning delivered as a notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub level: u32,
    pub code: u32,
    pub message: String,
}

/// Which piece of session state a `SessionStateChanged` notice updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStateParam {
    CurrentSchema,
    AccountExpired,
    GeneratedInsertId,
    RowsAffected,
    ProducedMessage,
    ClientIdAssigned,
    GeneratedDocumentIds,
    Other(u32),
}

impl SessionStateParam {
    pub const fn from_u32(value: u32) -> Self {
        match value {
            1 => SessionStateParam::CurrentSchema,
            2 => SessionStateParam::AccountExpired,
            3 => SessionStateParam::GeneratedInsertId,
            4 => SessionStateParam::RowsAffected,
            5 => SessionStateParam::ProducedMessage,
            6 => SessionStateParam::ClientIdAssigned,
            12 => SessionStateParam::GeneratedDocumentIds,
            other => SessionStateParam::Other(other),
        }
    }
}

/// A decoded `SessionStateChanged` notice.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStateChange {
    pub param: SessionStateParam,
    pub values: Vec<Scalar>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_mapping() {
        assert_eq!(ServerMessage::from_u8(0), Some(ServerMessage::Ok));
        assert_eq!(ServerMessage::from_u8(1), Some(ServerMessage::Error));
        assert_eq!(ServerMessage::from_u8(2), Some(ServerMessage::Capabilities));
        assert_eq!(
            ServerMessage::from_u8(17),
            Some(ServerMessage::StmtExecuteOk)
        );
        assert_eq!(ServerMessage::from_u8(42), None);
    }

    #[test]
    fn statement_family() {
        assert!(ClientMessage::StmtExecute.is_statement_family());
        assert!(ClientMessage::CrudFind.is_statement_family());
        assert!(ClientMessage::CrudDelete.is_statement_family());
        assert!(!ClientMessage::CapabilitiesSet.is_statement_family());
        assert!(!ClientMessage::ExpectOpen.is_statement_family());
    }

    #[test]
    fn capability_lookup() {
        let caps = Capabilities::new(vec![
            (
                "tls".to_string(),
                CapabilityValue::Scalar(Scalar::Bool(true)),
            ),
            (
                Capabilities::AUTH_MECHANISMS.to_string(),
                CapabilityValue::Array(vec![
                    CapabilityValue::Scalar(Scalar::String("MYSQL41".to_string())),
                    CapabilityValue::Scalar(Scalar::String("PLAIN".to_string())),
                ]),
            ),
        ]);

        assert_eq!(
            caps.get("tls"),
            Some(&CapabilityValue::Scalar(Scalar::Bool(true)))
        );
        assert_eq!(
            caps.auth_mechanisms(),
            Some(vec!["MYSQL41".to_string(), "PLAIN".to_string()])
        );
        assert!(caps.get("unknown").is_none());
    }

    #[test]
    fn missing_auth_mechanisms_is_none() {
        let caps = Capabilities::default();
        assert!(caps.auth_mechanisms().is_none());
        assert!(caps.is_empty());
    }

    #[test]
    fn session_state_params() {
        assert_eq!(
            SessionStateParam::from_u32(4),
            SessionStateParam::RowsAffected
        );
        assert_eq!(
            SessionStateParam::from_u32(12),
            SessionStateParam::GeneratedDocumentIds
        );
        assert_eq!(SessionStateParam::from_u32(99), SessionStateParam::Other(99));
    }
}
