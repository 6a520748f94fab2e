//! Fixed-layout message primitives
//!
//! Byte layouts mirror the emulated platform's message structures packed
//! to 4, little-endian:
//!
//! ```text
//! header      24 bytes  bits, size, remote_port, local_port, voucher, id
//! body         4 bytes  descriptor count (complex messages only)
//! descriptor  12 bytes  name, pad, pad, disposition, type
//! NDR record   8 bytes  data-representation negotiation, constant
//! name field 128 bytes  NUL-terminated, zero padded
//! ```
//!
//! Frames are modeled in the receiver's view throughout: `remote_port`
//! names the reply right for requests and the destination for replies,
//! exactly as the receiving side observes them.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::port::{Ownership, PortName};
use crate::registry::NAME_FIELD_LEN;

/// Message header length
pub const HEADER_LEN: usize = 24;

/// Body (descriptor count) length
pub const BODY_LEN: usize = 4;

/// Port descriptor length
pub const DESCRIPTOR_LEN: usize = 12;

/// NDR record length
pub const NDR_LEN: usize = 8;

/// Complex (rights-bearing) flag in the header bits
pub const MSGH_BITS_COMPLEX: u32 = 0x8000_0000;

/// Canonical data-representation record
///
/// All fields zero except `int_rep`, which declares little-endian
/// integers. Emitted verbatim on every typed reply; clients check the
/// record is present, not its individual fields.
pub const NDR_RECORD: [u8; NDR_LEN] = [0, 0, 0, 0, 1, 0, 0, 0];

/// Port descriptor type tag
pub const PORT_DESCRIPTOR_TYPE: u8 = 0;

// Right dispositions carried in descriptors
pub const DISP_MOVE_RECEIVE: u8 = 16;
pub const DISP_MOVE_SEND: u8 = 17;
pub const DISP_MOVE_SEND_ONCE: u8 = 18;
pub const DISP_COPY_SEND: u8 = 19;
pub const DISP_MAKE_SEND: u8 = 20;
pub const DISP_MAKE_SEND_ONCE: u8 = 21;

/// Combine remote and local right dispositions into header bits
pub fn msgh_bits(remote: u8, local: u8) -> u32 {
    u32::from(remote) | u32::from(local) << 8
}

/// Wire disposition for an ownership tag leaving the broker
///
/// `MoveOut` hands over the receive right itself; `Borrowed` copies the
/// broker's send right; `Owned` rights moving anyway degrade to a send
/// move (not produced by any current handler).
pub fn disposition_for(ownership: Ownership) -> u8 {
    match ownership {
        Ownership::MoveOut => DISP_MOVE_RECEIVE,
        Ownership::Borrowed => DISP_COPY_SEND,
        Ownership::Owned => DISP_MOVE_SEND,
    }
}

/// Decoded message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub bits: u32,
    pub size: u32,
    pub remote_port: PortName,
    pub local_port: PortName,
    pub voucher_port: PortName,
    pub id: i32,
}

impl MsgHeader {
    /// Decode a header, consuming [`HEADER_LEN`] bytes
    pub fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        if buf.remaining() < HEADER_LEN {
            return Err(CodecError::Truncated { declared: HEADER_LEN, actual: buf.remaining() });
        }
        Ok(MsgHeader {
            bits: buf.get_u32_le(),
            size: buf.get_u32_le(),
            remote_port: PortName::from_raw(buf.get_u32_le()),
            local_port: PortName::from_raw(buf.get_u32_le()),
            voucher_port: PortName::from_raw(buf.get_u32_le()),
            id: buf.get_i32_le(),
        })
    }

    /// Append the header to a buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.bits);
        buf.put_u32_le(self.size);
        buf.put_u32_le(self.remote_port.raw());
        buf.put_u32_le(self.local_port.raw());
        buf.put_u32_le(self.voucher_port.raw());
        buf.put_i32_le(self.id);
    }

    /// Whether the complex flag is set
    pub fn is_complex(&self) -> bool {
        self.bits & MSGH_BITS_COMPLEX != 0
    }
}

/// One port descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortDescriptor {
    pub name: PortName,
    pub disposition: u8,
}

impl PortDescriptor {
    /// Decode a descriptor, consuming [`DESCRIPTOR_LEN`] bytes
    pub fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        if buf.remaining() < DESCRIPTOR_LEN {
            return Err(CodecError::Truncated {
                declared: DESCRIPTOR_LEN,
                actual: buf.remaining(),
            });
        }
        let name = PortName::from_raw(buf.get_u32_le());
        buf.advance(4); // pad
        buf.advance(2); // pad
        let disposition = buf.get_u8();
        let descriptor_type = buf.get_u8();
        if descriptor_type != PORT_DESCRIPTOR_TYPE {
            return Err(CodecError::Malformed("non-port descriptor"));
        }
        Ok(PortDescriptor { name, disposition })
    }

    /// Append a descriptor to a buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.name.raw());
        buf.put_u32_le(0);
        buf.put_u16_le(0);
        buf.put_u8(self.disposition);
        buf.put_u8(PORT_DESCRIPTOR_TYPE);
    }
}

/// Append the canonical NDR record
pub fn put_ndr(buf: &mut BytesMut) {
    buf.put_slice(&NDR_RECORD);
}

/// Skip over an inbound NDR record
pub fn skip_ndr(buf: &mut Bytes) -> Result<(), CodecError> {
    if buf.remaining() < NDR_LEN {
        return Err(CodecError::Truncated { declared: NDR_LEN, actual: buf.remaining() });
    }
    buf.advance(NDR_LEN);
    Ok(())
}

/// Append a fixed-width name field, NUL padded
///
/// The name is bounded at [`crate::registry::MAX_NAME_LEN`] by
/// construction, so it always fits with its terminator.
pub fn put_name_field(name: &str, buf: &mut BytesMut) {
    buf.put_slice(name.as_bytes());
    buf.put_bytes(0, NAME_FIELD_LEN - name.len());
}

/// Consume a fixed-width name field and extract the string before the
/// first NUL
pub fn take_name_field(buf: &mut Bytes) -> Result<String, CodecError> {
    if buf.remaining() < NAME_FIELD_LEN {
        return Err(CodecError::Truncated { declared: NAME_FIELD_LEN, actual: buf.remaining() });
    }
    let field = buf.split_to(NAME_FIELD_LEN);
    let len = field.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD_LEN - 1);
    String::from_utf8(field[..len].to_vec())
        .map_err(|_| CodecError::Malformed("service name not UTF-8"))
}
