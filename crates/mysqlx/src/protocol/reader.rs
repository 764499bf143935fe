//! Protobuf wire reading for the control messages.
//!
//! Primitives follow the protobuf encoding: varints, `(field, wire_type)`
//! tags, and length-delimited chunks. Typed decoders cover exactly the
//! payloads the core interprets; unknown fields are skipped so newer servers
//! stay readable.

use mysqlx_core::error::{Error, ProtocolError, ProtocolErrorKind, ServerError, Severity};

use crate::protocol::{
    Capabilities, CapabilityValue, NoticeFrame, NoticeScope, OkMsg, Scalar, SessionStateChange,
    SessionStateParam, Warning,
};

/// Wire type: varint.
pub const WIRE_VARINT: u8 = 0;
/// Wire type: 64-bit fixed.
pub const WIRE_FIXED64: u8 = 1;
/// Wire type: length-delimited.
pub const WIRE_LEN: u8 = 2;
/// Wire type: 32-bit fixed.
pub const WIRE_FIXED32: u8 = 5;

/// A cursor over one protobuf-encoded payload.
#[derive(Debug)]
pub struct ProtoReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ProtoReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Read a base-128 varint (at most 10 bytes).
    pub fn read_varint(&mut self) -> Option<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = *self.data.get(self.pos)?;
            self.pos += 1;
            if shift == 63 && byte > 1 {
                return None;
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Some(value);
            }
            shift += 7;
            if shift > 63 {
                return None;
            }
        }
    }

    /// Read a field tag as `(field_number, wire_type)`.
    pub fn read_tag(&mut self) -> Option<(u32, u8)> {
        let key = self.read_varint()?;
        let field = u32::try_from(key >> 3).ok()?;
        if field == 0 {
            return None;
        }
        Some((field, (key & 0x07) as u8))
    }

    /// Read a length-delimited chunk.
    pub fn read_len_delimited(&mut self) -> Option<&'a [u8]> {
        let len = usize::try_from(self.read_varint()?).ok()?;
        if self.remaining() < len {
            return None;
        }
        let chunk = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(chunk)
    }

    pub fn read_fixed32(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        Some(u32::from_le_bytes(bytes))
    }

    pub fn read_fixed64(&mut self) -> Option<u64> {
        if self.remaining() < 8 {
            return None;
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        Some(u64::from_le_bytes(bytes))
    }

    /// Skip one field of the given wire type.
    pub fn skip_field(&mut self, wire_type: u8) -> Option<()> {
        match wire_type {
            WIRE_VARINT => self.read_varint().map(|_| ()),
            WIRE_FIXED64 => self.read_fixed64().map(|_| ()),
            WIRE_LEN => self.read_len_delimited().map(|_| ()),
            WIRE_FIXED32 => self.read_fixed32().map(|_| ()),
            _ => None,
        }
    }
}

/// Decode a zigzag-encoded signed integer.
pub const fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn malformed(what: &str) -> Error {
    ProtocolError {
        kind: ProtocolErrorKind::MalformedFrame,
        message: format!("malformed {} payload", what),
    }
    .into()
}

fn utf8(bytes: &[u8], what: &str) -> Result<String, Error> {
    String::from_utf8(bytes.to_vec()).map_err(|_| malformed(what))
}

/// Decode an `Ok` payload.
pub fn decode_ok(payload: &[u8]) -> Result<OkMsg, Error> {
    let mut reader = ProtoReader::new(payload);
    let mut ok = OkMsg::default();
    while let Some((field, wire)) = reader.read_tag() {
        match (field, wire) {
            (1, WIRE_LEN) => {
                let bytes = reader.read_len_delimited().ok_or_else(|| malformed("Ok"))?;
                ok.msg = Some(utf8(bytes, "Ok")?);
            }
            (_, wire) => reader.skip_field(wire).ok_or_else(|| malformed("Ok"))?,
        }
    }
    Ok(ok)
}

/// Decode an `Error` payload.
pub fn decode_error(payload: &[u8]) -> Result<ServerError, Error> {
    let mut reader = ProtoReader::new(payload);
    let mut error = ServerError {
        severity: Severity::Error,
        code: 0,
        sql_state: String::new(),
        message: String::new(),
    };
    while let Some((field, wire)) = reader.read_tag() {
        match (field, wire) {
            (1, WIRE_VARINT) => {
                let raw = reader.read_varint().ok_or_else(|| malformed("Error"))?;
                error.severity = if raw == 1 {
                    Severity::Fatal
                } else {
                    Severity::Error
                };
            }
            (2, WIRE_VARINT) => {
                let raw = reader.read_varint().ok_or_else(|| malformed("Error"))?;
                error.code = u32::try_from(raw).map_err(|_| malformed("Error"))?;
            }
            (3, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("Error"))?;
                error.message = utf8(bytes, "Error")?;
            }
            (4, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("Error"))?;
                error.sql_state = utf8(bytes, "Error")?;
            }
            (_, wire) => reader.skip_field(wire).ok_or_else(|| malformed("Error"))?,
        }
    }
    Ok(error)
}

/// Decode a `Capabilities` payload, preserving entries verbatim.
pub fn decode_capabilities(payload: &[u8]) -> Result<Capabilities, Error> {
    let mut reader = ProtoReader::new(payload);
    let mut entries = Vec::new();
    while let Some((field, wire)) = reader.read_tag() {
        match (field, wire) {
            (1, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("Capabilities"))?;
                entries.push(decode_capability(bytes)?);
            }
            (_, wire) => reader
                .skip_field(wire)
                .ok_or_else(|| malformed("Capabilities"))?,
        }
    }
    Ok(Capabilities::new(entries))
}

fn decode_capability(payload: &[u8]) -> Result<(String, CapabilityValue), Error> {
    let mut reader = ProtoReader::new(payload);
    let mut name = None;
    let mut value = None;
    while let Some((field, wire)) = reader.read_tag() {
        match (field, wire) {
            (1, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("Capability"))?;
                name = Some(utf8(bytes, "Capability")?);
            }
            (2, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("Capability"))?;
                value = Some(decode_any(bytes)?);
            }
            (_, wire) => reader
                .skip_field(wire)
                .ok_or_else(|| malformed("Capability"))?,
        }
    }
    match (name, value) {
        (Some(name), Some(value)) => Ok((name, value)),
        _ => Err(malformed("Capability")),
    }
}

fn decode_any(payload: &[u8]) -> Result<CapabilityValue, Error> {
    let mut reader = ProtoReader::new(payload);
    let mut value = None;
    while let Some((field, wire)) = reader.read_tag() {
        match (field, wire) {
            // Field 1 is the Any discriminator; the populated branch below
            // already identifies the variant, so it can be skipped.
            (1, WIRE_VARINT) => {
                reader.read_varint().ok_or_else(|| malformed("Any"))?;
            }
            (2, WIRE_LEN) => {
                let bytes = reader.read_len_delimited().ok_or_else(|| malformed("Any"))?;
                value = Some(CapabilityValue::Scalar(decode_scalar(bytes)?));
            }
            (3, WIRE_LEN) => {
                let bytes = reader.read_len_delimited().ok_or_else(|| malformed("Any"))?;
                value = Some(decode_object(bytes)?);
            }
            (4, WIRE_LEN) => {
                let bytes = reader.read_len_delimited().ok_or_else(|| malformed("Any"))?;
                value = Some(decode_array(bytes)?);
            }
            (_, wire) => reader.skip_field(wire).ok_or_else(|| malformed("Any"))?,
        }
    }
    value.ok_or_else(|| malformed("Any"))
}

fn decode_object(payload: &[u8]) -> Result<CapabilityValue, Error> {
    let mut reader = ProtoReader::new(payload);
    let mut fields = Vec::new();
    while let Some((field, wire)) = reader.read_tag() {
        match (field, wire) {
            (1, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("Object"))?;
                fields.push(decode_object_field(bytes)?);
            }
            (_, wire) => reader.skip_field(wire).ok_or_else(|| malformed("Object"))?,
        }
    }
    Ok(CapabilityValue::Object(fields))
}

fn decode_object_field(payload: &[u8]) -> Result<(String, CapabilityValue), Error> {
    let mut reader = ProtoReader::new(payload);
    let mut key = None;
    let mut value = None;
    while let Some((field, wire)) = reader.read_tag() {
        match (field, wire) {
            (1, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("ObjectField"))?;
                key = Some(utf8(bytes, "ObjectField")?);
            }
            (2, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("ObjectField"))?;
                value = Some(decode_any(bytes)?);
            }
            (_, wire) => reader
                .skip_field(wire)
                .ok_or_else(|| malformed("ObjectField"))?,
        }
    }
    match (key, value) {
        (Some(key), Some(value)) => Ok((key, value)),
        _ => Err(malformed("ObjectField")),
    }
}

fn decode_array(payload: &[u8]) -> Result<CapabilityValue, Error> {
    let mut reader = ProtoReader::new(payload);
    let mut values = Vec::new();
    while let Some((field, wire)) = reader.read_tag() {
        match (field, wire) {
            (1, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("Array"))?;
                values.push(decode_any(bytes)?);
            }
            (_, wire) => reader.skip_field(wire).ok_or_else(|| malformed("Array"))?,
        }
    }
    Ok(CapabilityValue::Array(values))
}

/// Decode a `Scalar` payload.
pub fn decode_scalar(payload: &[u8]) -> Result<Scalar, Error> {
    let mut reader = ProtoReader::new(payload);
    let mut scalar = None;
    let mut is_null = false;
    while let Some((field, wire)) = reader.read_tag() {
        match (field, wire) {
            (1, WIRE_VARINT) => {
                let kind = reader.read_varint().ok_or_else(|| malformed("Scalar"))?;
                // V_NULL carries no value field at all.
                if kind == 3 {
                    is_null = true;
                }
            }
            (2, WIRE_VARINT) => {
                let raw = reader.read_varint().ok_or_else(|| malformed("Scalar"))?;
                scalar = Some(Scalar::SignedInt(zigzag_decode(raw)));
            }
            (3, WIRE_VARINT) => {
                let raw = reader.read_varint().ok_or_else(|| malformed("Scalar"))?;
                scalar = Some(Scalar::UnsignedInt(raw));
            }
            (5, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("Scalar"))?;
                scalar = Some(Scalar::Octets(decode_octets(bytes)?));
            }
            (6, WIRE_FIXED64) => {
                let raw = reader.read_fixed64().ok_or_else(|| malformed("Scalar"))?;
                scalar = Some(Scalar::Double(f64::from_bits(raw)));
            }
            (7, WIRE_FIXED32) => {
                let raw = reader.read_fixed32().ok_or_else(|| malformed("Scalar"))?;
                scalar = Some(Scalar::Float(f32::from_bits(raw)));
            }
            (8, WIRE_VARINT) => {
                let raw = reader.read_varint().ok_or_else(|| malformed("Scalar"))?;
                scalar = Some(Scalar::Bool(raw != 0));
            }
            (9, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("Scalar"))?;
                scalar = Some(Scalar::String(decode_scalar_string(bytes)?));
            }
            (_, wire) => reader.skip_field(wire).ok_or_else(|| malformed("Scalar"))?,
        }
    }
    if let Some(scalar) = scalar {
        Ok(scalar)
    } else if is_null {
        Ok(Scalar::Null)
    } else {
        Err(malformed("Scalar"))
    }
}

fn decode_scalar_string(payload: &[u8]) -> Result<String, Error> {
    let mut reader = ProtoReader::new(payload);
    let mut value = None;
    while let Some((field, wire)) = reader.read_tag() {
        match (field, wire) {
            (1, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("Scalar.String"))?;
                value = Some(utf8(bytes, "Scalar.String")?);
            }
            (_, wire) => reader
                .skip_field(wire)
                .ok_or_else(|| malformed("Scalar.String"))?,
        }
    }
    value.ok_or_else(|| malformed("Scalar.String"))
}

fn decode_octets(payload: &[u8]) -> Result<Vec<u8>, Error> {
    let mut reader = ProtoReader::new(payload);
    let mut value = None;
    while let Some((field, wire)) = reader.read_tag() {
        match (field, wire) {
            (1, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("Scalar.Octets"))?;
                value = Some(bytes.to_vec());
            }
            (_, wire) => reader
                .skip_field(wire)
                .ok_or_else(|| malformed("Scalar.Octets"))?,
        }
    }
    value.ok_or_else(|| malformed("Scalar.Octets"))
}

/// Decode an `AuthenticateContinue` or `AuthenticateOk` payload, both of
/// which carry a single `auth_data` bytes field.
pub fn decode_auth_data(payload: &[u8]) -> Result<Vec<u8>, Error> {
    let mut reader = ProtoReader::new(payload);
    let mut data = Vec::new();
    while let Some((field, wire)) = reader.read_tag() {
        match (field, wire) {
            (1, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("Authenticate"))?;
                data = bytes.to_vec();
            }
            (_, wire) => reader
                .skip_field(wire)
                .ok_or_else(|| malformed("Authenticate"))?,
        }
    }
    Ok(data)
}

/// Decode a `Notice.Frame` payload.
pub fn decode_notice_frame(payload: &[u8]) -> Result<NoticeFrame, Error> {
    let mut reader = ProtoReader::new(payload);
    let mut notice_type = 0u32;
    let mut scope = NoticeScope::Global;
    let mut body = Vec::new();
    while let Some((field, wire)) = reader.read_tag() {
        match (field, wire) {
            (1, WIRE_VARINT) => {
                let raw = reader.read_varint().ok_or_else(|| malformed("Notice"))?;
                notice_type = u32::try_from(raw).map_err(|_| malformed("Notice"))?;
            }
            (2, WIRE_VARINT) => {
                let raw = reader.read_varint().ok_or_else(|| malformed("Notice"))?;
                scope = if raw == 2 {
                    NoticeScope::Local
                } else {
                    NoticeScope::Global
                };
            }
            (3, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("Notice"))?;
                body = bytes.to_vec();
            }
            (_, wire) => reader.skip_field(wire).ok_or_else(|| malformed("Notice"))?,
        }
    }
    Ok(NoticeFrame {
        notice_type,
        scope,
        payload: body,
    })
}

/// Decode a `Notice.Warning` payload.
pub fn decode_warning(payload: &[u8]) -> Result<Warning, Error> {
    let mut reader = ProtoReader::new(payload);
    let mut warning = Warning {
        level: 0,
        code: 0,
        message: String::new(),
    };
    while let Some((field, wire)) = reader.read_tag() {
        match (field, wire) {
            (1, WIRE_VARINT) => {
                let raw = reader.read_varint().ok_or_else(|| malformed("Warning"))?;
                warning.level = u32::try_from(raw).map_err(|_| malformed("Warning"))?;
            }
            (2, WIRE_VARINT) => {
                let raw = reader.read_varint().ok_or_else(|| malformed("Warning"))?;
                warning.code = u32::try_from(raw).map_err(|_| malformed("Warning"))?;
            }
            (3, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("Warning"))?;
                warning.message = utf8(bytes, "Warning")?;
            }
            (_, wire) => reader.skip_field(wire).ok_or_else(|| malformed("Warning"))?,
        }
    }
    Ok(warning)
}

/// Decode a `Notice.SessionStateChanged` payload.
pub fn decode_session_state_changed(payload: &[u8]) -> Result<SessionStateChange, Error> {
    let mut reader = ProtoReader::new(payload);
    let mut param = SessionStateParam::Other(0);
    let mut values = Vec::new();
    while let Some((field, wire)) = reader.read_tag() {
        match (field, wire) {
            (1, WIRE_VARINT) => {
                let raw = reader
                    .read_varint()
                    .ok_or_else(|| malformed("SessionStateChanged"))?;
                let raw = u32::try_from(raw).map_err(|_| malformed("SessionStateChanged"))?;
                param = SessionStateParam::from_u32(raw);
            }
            (2, WIRE_LEN) => {
                let bytes = reader
                    .read_len_delimited()
                    .ok_or_else(|| malformed("SessionStateChanged"))?;
                values.push(decode_scalar(bytes)?);
            }
            (_, wire) => reader
                .skip_field(wire)
                .ok_or_else(|| malformed("SessionStateChanged"))?,
        }
    }
    Ok(SessionStateChange { param, values })
}
