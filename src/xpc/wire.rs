//! XPC payload serializer
//!
//! Emulation of the type-tagged serialization used by the launchd
//! rendezvous payload. Every payload opens with a magic/version pair,
//! then one value. Values are a 32-bit little-endian type marker followed
//! by the type-specific body:
//!
//! ```text
//! 0x2000  - Bool       (u32: 0 or 1)
//! 0x3000  - Int64      (8 bytes LE)
//! 0x4000  - Uint64     (8 bytes LE)
//! 0x9000  - String     (u32 byte length, bytes, zero-pad to 4)
//! 0xF000  - Dictionary (u32 entry count, then key/value pairs; keys are
//!                       NUL-terminated, zero-padded to 4)
//! 0x15000 - Send right    (u32 endpoint name)
//! 0x16000 - Receive right (u32 endpoint name)
//! ```
//!
//! Endpoint names appear inline in the payload; the envelope codec in
//! `protocol::pipe` is responsible for attaching the matching descriptor
//! to the carrying message.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::port::PortName;

use super::value::XpcValue;

/// Leading magic of every serialized payload ("XPC!")
pub const WIRE_MAGIC: u32 = 0x5850_4321;

/// Serializer version
pub const WIRE_VERSION: u32 = 5;

const MARKER_BOOL: u32 = 0x0000_2000;
const MARKER_INT64: u32 = 0x0000_3000;
const MARKER_UINT64: u32 = 0x0000_4000;
const MARKER_STRING: u32 = 0x0000_9000;
const MARKER_DICTIONARY: u32 = 0x0000_F000;
const MARKER_SEND_RIGHT: u32 = 0x0001_5000;
const MARKER_RECEIVE_RIGHT: u32 = 0x0001_6000;

/// Maximum nesting depth for dictionaries (prevent stack overflow)
const MAX_NESTING_DEPTH: usize = 64;

/// Serialize a payload, magic and version included
pub fn encode(value: &XpcValue, buf: &mut BytesMut) {
    buf.put_u32_le(WIRE_MAGIC);
    buf.put_u32_le(WIRE_VERSION);
    encode_value(value, buf);
}

fn encode_value(value: &XpcValue, buf: &mut BytesMut) {
    match value {
        XpcValue::Bool(b) => {
            buf.put_u32_le(MARKER_BOOL);
            buf.put_u32_le(u32::from(*b));
        }
        XpcValue::Int64(v) => {
            buf.put_u32_le(MARKER_INT64);
            buf.put_i64_le(*v);
        }
        XpcValue::Uint64(v) => {
            buf.put_u32_le(MARKER_UINT64);
            buf.put_u64_le(*v);
        }
        XpcValue::String(s) => {
            buf.put_u32_le(MARKER_STRING);
            put_padded_bytes(s.as_bytes(), buf);
        }
        XpcValue::Dictionary(entries) => {
            buf.put_u32_le(MARKER_DICTIONARY);
            buf.put_u32_le(entries.len() as u32);
            // Sorted for a deterministic wire image
            let mut keys: Vec<&String> = entries.keys().collect();
            keys.sort();
            for key in keys {
                put_key(key, buf);
                encode_value(&entries[key], buf);
            }
        }
        XpcValue::SendRight(port) => {
            buf.put_u32_le(MARKER_SEND_RIGHT);
            buf.put_u32_le(port.raw());
        }
        XpcValue::ReceiveRight(port) => {
            buf.put_u32_le(MARKER_RECEIVE_RIGHT);
            buf.put_u32_le(port.raw());
        }
    }
}

fn put_padded_bytes(bytes: &[u8], buf: &mut BytesMut) {
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
    let pad = (4 - bytes.len() % 4) % 4;
    buf.put_bytes(0, pad);
}

fn put_key(key: &str, buf: &mut BytesMut) {
    buf.put_slice(key.as_bytes());
    buf.put_u8(0);
    let pad = (4 - (key.len() + 1) % 4) % 4;
    buf.put_bytes(0, pad);
}

/// Payload deserializer
///
/// Tracks nesting depth; a hostile payload can nest dictionaries but
/// cannot recurse past [`MAX_NESTING_DEPTH`].
pub struct XpcDecoder {
    depth: usize,
}

impl XpcDecoder {
    /// Create a fresh decoder
    pub fn new() -> Self {
        XpcDecoder { depth: 0 }
    }

    /// Decode one payload, validating magic and version first
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<XpcValue, CodecError> {
        if buf.remaining() < 8 {
            return Err(CodecError::Truncated { declared: 8, actual: buf.remaining() });
        }
        if buf.get_u32_le() != WIRE_MAGIC {
            return Err(CodecError::Malformed("bad payload magic"));
        }
        if buf.get_u32_le() != WIRE_VERSION {
            return Err(CodecError::Malformed("unsupported payload version"));
        }
        self.decode_value(buf)
    }

    fn decode_value(&mut self, buf: &mut Bytes) -> Result<XpcValue, CodecError> {
        if buf.remaining() < 4 {
            return Err(CodecError::Truncated { declared: 4, actual: buf.remaining() });
        }

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(CodecError::Malformed("payload nesting too deep"));
        }

        let marker = buf.get_u32_le();
        let result = match marker {
            MARKER_BOOL => self.decode_bool(buf),
            MARKER_INT64 => self.decode_i64(buf),
            MARKER_UINT64 => self.decode_u64(buf),
            MARKER_STRING => self.decode_string(buf),
            MARKER_DICTIONARY => self.decode_dictionary(buf),
            MARKER_SEND_RIGHT => Ok(XpcValue::SendRight(self.decode_port(buf)?)),
            MARKER_RECEIVE_RIGHT => Ok(XpcValue::ReceiveRight(self.decode_port(buf)?)),
            other => Err(CodecError::UnknownMarker(other)),
        };
        self.depth -= 1;
        result
    }

    fn decode_bool(&mut self, buf: &mut Bytes) -> Result<XpcValue, CodecError> {
        if buf.remaining() < 4 {
            return Err(CodecError::Truncated { declared: 4, actual: buf.remaining() });
        }
        Ok(XpcValue::Bool(buf.get_u32_le() != 0))
    }

    fn decode_i64(&mut self, buf: &mut Bytes) -> Result<XpcValue, CodecError> {
        if buf.remaining() < 8 {
            return Err(CodecError::Truncated { declared: 8, actual: buf.remaining() });
        }
        Ok(XpcValue::Int64(buf.get_i64_le()))
    }

    fn decode_u64(&mut self, buf: &mut Bytes) -> Result<XpcValue, CodecError> {
        if buf.remaining() < 8 {
            return Err(CodecError::Truncated { declared: 8, actual: buf.remaining() });
        }
        Ok(XpcValue::Uint64(buf.get_u64_le()))
    }

    fn decode_string(&mut self, buf: &mut Bytes) -> Result<XpcValue, CodecError> {
        let bytes = self.take_padded_bytes(buf)?;
        let s = String::from_utf8(bytes).map_err(|_| CodecError::Malformed("string not UTF-8"))?;
        Ok(XpcValue::String(s))
    }

    fn decode_dictionary(&mut self, buf: &mut Bytes) -> Result<XpcValue, CodecError> {
        if buf.remaining() < 4 {
            return Err(CodecError::Truncated { declared: 4, actual: buf.remaining() });
        }
        let count = buf.get_u32_le() as usize;

        let mut entries = HashMap::with_capacity(count.min(64));
        for _ in 0..count {
            let key = self.take_key(buf)?;
            let value = self.decode_value(buf)?;
            entries.insert(key, value);
        }
        Ok(XpcValue::Dictionary(entries))
    }

    fn decode_port(&mut self, buf: &mut Bytes) -> Result<PortName, CodecError> {
        if buf.remaining() < 4 {
            return Err(CodecError::Truncated { declared: 4, actual: buf.remaining() });
        }
        Ok(PortName::from_raw(buf.get_u32_le()))
    }

    fn take_padded_bytes(&mut self, buf: &mut Bytes) -> Result<Vec<u8>, CodecError> {
        if buf.remaining() < 4 {
            return Err(CodecError::Truncated { declared: 4, actual: buf.remaining() });
        }
        let len = buf.get_u32_le() as usize;
        let padded = len + (4 - len % 4) % 4;

        // Length prefixes are validated against the buffer before any copy
        if buf.remaining() < padded {
            return Err(CodecError::Truncated { declared: padded, actual: buf.remaining() });
        }
        let bytes = buf.split_to(len).to_vec();
        buf.advance(padded - len);
        Ok(bytes)
    }

    fn take_key(&mut self, buf: &mut Bytes) -> Result<String, CodecError> {
        let terminator = buf
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::Malformed("unterminated dictionary key"))?;
        let padded = terminator + 1 + (4 - (terminator + 1) % 4) % 4;
        if buf.remaining() < padded {
            return Err(CodecError::Truncated { declared: padded, actual: buf.remaining() });
        }

        let key = String::from_utf8(buf.split_to(terminator).to_vec())
            .map_err(|_| CodecError::Malformed("dictionary key not UTF-8"))?;
        buf.advance(padded - terminator);
        Ok(key)
    }
}

impl Default for XpcDecoder {
    fn default() -> Self {
        Self::new()
    }
}
