//! Protobuf wire writing and client control-message builders.
//!
//! The writer emits protobuf fields into a growing buffer; nested messages
//! are built inner-out and embedded as length-delimited fields. The free
//! functions at the bottom build every client message the protocol core
//! sends on its own behalf.

use crate::protocol::{
    reader::{WIRE_FIXED32, WIRE_FIXED64, WIRE_LEN, WIRE_VARINT},
    ClientMessage, Message, Scalar,
};

/// A writer for protobuf-encoded payloads.
#[derive(Debug, Default)]
pub struct ProtoWriter {
    buffer: Vec<u8>,
}

impl ProtoWriter {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Write a base-128 varint.
    pub fn write_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.buffer.push(byte);
                return;
            }
            self.buffer.push(byte | 0x80);
        }
    }

    /// Write a field tag.
    pub fn write_tag(&mut self, field: u32, wire_type: u8) {
        self.write_varint((u64::from(field) << 3) | u64::from(wire_type));
    }

    /// Write a varint-typed field.
    pub fn write_varint_field(&mut self, field: u32, value: u64) {
        self.write_tag(field, WIRE_VARINT);
        self.write_varint(value);
    }

    /// Write a zigzag-encoded signed field.
    pub fn write_sint_field(&mut self, field: u32, value: i64) {
        self.write_varint_field(field, zigzag_encode(value));
    }

    /// Write a length-delimited bytes field.
    pub fn write_bytes_field(&mut self, field: u32, bytes: &[u8]) {
        self.write_tag(field, WIRE_LEN);
        self.write_varint(bytes.len() as u64);
        self.buffer.extend_from_slice(bytes);
    }

    /// Write a length-delimited string field.
    pub fn write_string_field(&mut self, field: u32, value: &str) {
        self.write_bytes_field(field, value.as_bytes());
    }

    /// Write a fixed 32-bit field.
    pub fn write_fixed32_field(&mut self, field: u32, value: u32) {
        self.write_tag(field, WIRE_FIXED32);
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a fixed 64-bit field.
    pub fn write_fixed64_field(&mut self, field: u32, value: u64) {
        self.write_tag(field, WIRE_FIXED64);
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Embed another writer's output as a nested message field.
    pub fn write_message_field(&mut self, field: u32, inner: &ProtoWriter) {
        self.write_bytes_field(field, inner.as_bytes());
    }
}

/// Zigzag-encode a signed integer.
pub const fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Encode one `Scalar` payload.
pub fn encode_scalar(scalar: &Scalar) -> ProtoWriter {
    let mut w = ProtoWriter::new();
    match scalar {
        Scalar::Null => {
            w.write_varint_field(1, 3);
        }
        Scalar::SignedInt(v) => {
            w.write_varint_field(1, 1);
            w.write_sint_field(2, *v);
        }
        Scalar::UnsignedInt(v) => {
            w.write_varint_field(1, 2);
            w.write_varint_field(3, *v);
        }
        Scalar::Octets(bytes) => {
            w.write_varint_field(1, 4);
            let mut octets = ProtoWriter::new();
            octets.write_bytes_field(1, bytes);
            w.write_message_field(5, &octets);
        }
        Scalar::Double(v) => {
            w.write_varint_field(1, 5);
            w.write_fixed64_field(6, v.to_bits());
        }
        Scalar::Float(v) => {
            w.write_varint_field(1, 6);
            w.write_fixed32_field(7, v.to_bits());
        }
        Scalar::Bool(v) => {
            w.write_varint_field(1, 7);
            w.write_varint_field(8, u64::from(*v));
        }
        Scalar::String(s) => {
            w.write_varint_field(1, 8);
            let mut string = ProtoWriter::new();
            string.write_bytes_field(1, s.as_bytes());
            w.write_message_field(9, &string);
        }
    }
    w
}

/// Encode an `Any` wrapping a scalar.
fn encode_scalar_any(scalar: &Scalar) -> ProtoWriter {
    let mut any = ProtoWriter::new();
    any.write_varint_field(1, 1); // Any.type = SCALAR
    any.write_message_field(2, &encode_scalar(scalar));
    any
}

/// Build a `CapabilitiesGet` request.
pub fn capabilities_get() -> Message {
    Message::client(ClientMessage::CapabilitiesGet, Vec::new())
}

/// Build a `CapabilitiesSet` request for scalar-valued capabilities.
pub fn capabilities_set(entries: &[(&str, Scalar)]) -> Message {
    let mut caps = ProtoWriter::new();
    for (name, value) in entries {
        let mut capability = ProtoWriter::new();
        capability.write_string_field(1, name);
        capability.write_message_field(2, &encode_scalar_any(value));
        caps.write_message_field(1, &capability);
    }

    let mut payload = ProtoWriter::new();
    payload.write_message_field(1, &caps);
    Message::client(ClientMessage::CapabilitiesSet, payload.into_bytes())
}

/// Build the `CapabilitiesSet` that requests a TLS upgrade.
pub fn capabilities_set_tls(enabled: bool) -> Message {
    capabilities_set(&[("tls", Scalar::Bool(enabled))])
}

/// Build an `AuthenticateStart` request.
pub fn auth_start(mech_name: &str, auth_data: &[u8]) -> Message {
    let mut payload = ProtoWriter::new();
    payload.write_string_field(1, mech_name);
    if !auth_data.is_empty() {
        payload.write_bytes_field(2, auth_data);
    }
    Message::client(ClientMessage::AuthenticateStart, payload.into_bytes())
}

/// Build an `AuthenticateContinue` request.
pub fn auth_continue(auth_data: &[u8]) -> Message {
    let mut payload = ProtoWriter::new();
    payload.write_bytes_field(1, auth_data);
    Message::client(ClientMessage::AuthenticateContinue, payload.into_bytes())
}

/// Build a `Sql.StmtExecute` request.
pub fn stmt_execute(namespace: &str, stmt: &[u8]) -> Message {
    let mut payload = ProtoWriter::new();
    payload.write_bytes_field(1, stmt);
    payload.write_string_field(3, namespace);
    Message::client(ClientMessage::StmtExecute, payload.into_bytes())
}

/// Build a `Connection.Close` request.
pub fn con_close() -> Message {
    Message::client(ClientMessage::Close, Vec::new())
}

/// Server-side payload encoders for the unit tests; the driver itself never
/// sends these.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn server_error(code: u32, sql_state: &str, msg: &str, fatal: bool) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        if fatal {
            w.write_varint_field(1, 1);
        }
        w.write_varint_field(2, u64::from(code));
        w.write_string_field(3, msg);
        w.write_string_field(4, sql_state);
        w.into_bytes()
    }

    pub fn capabilities_with_mechanisms(mechanisms: &[&str]) -> Vec<u8> {
        let mut array = ProtoWriter::new();
        for mech in mechanisms {
            array.write_message_field(1, &encode_scalar_any(&Scalar::String((*mech).to_string())));
        }

        let mut any = ProtoWriter::new();
        any.write_varint_field(1, 3); // Any.type = ARRAY
        any.write_message_field(4, &array);

        let mut capability = ProtoWriter::new();
        capability.write_string_field(1, "authentication.mechanisms");
        capability.write_message_field(2, &any);

        let mut caps = ProtoWriter::new();
        caps.write_message_field(1, &capability);
        caps.into_bytes()
    }

    pub fn warning_notice(level: u32, code: u32, msg: &str) -> Vec<u8> {
        let mut warning = ProtoWriter::new();
        warning.write_varint_field(1, u64::from(level));
        warning.write_varint_field(2, u64::from(code));
        warning.write_string_field(3, msg);

        let mut frame = ProtoWriter::new();
        frame.write_varint_field(1, 1); // WARNING
        frame.write_varint_field(2, 2); // LOCAL
        frame.write_bytes_field(3, warning.as_bytes());
        frame.into_bytes()
    }

    pub fn state_change_notice(param: u32, value: u64) -> Vec<u8> {
        let mut change = ProtoWriter::new();
        change.write_varint_field(1, u64::from(param));
        change.write_message_field(2, &encode_scalar(&Scalar::UnsignedInt(value)));

        let mut frame = ProtoWriter::new();
        frame.write_varint_field(1, 3); // SESSION_STATE_CHANGED
        frame.write_varint_field(2, 2); // LOCAL
        frame.write_bytes_field(3, change.as_bytes());
        frame.into_bytes()
    }
}
