//! MIG bootstrap family codec (subsystem 400)
//!
//! Wire layouts match the generated bootstrap subsystem exactly:
//!
//! ```text
//! look_up/check_in request: header(24) + NDR(8) + name[128]        = 160
//! register request:  header(24) + body(4) + desc(12) + NDR(8)
//!                    + name[128]                                   = 176
//! port reply:        header(24) + body(4) + desc(12)               =  40
//! error reply:       header(24) + NDR(8) + retcode(4)              =  36
//! ```
//!
//! The request encoders exist for the client side of the contract: the
//! guest shims and the test harness build exactly these frames.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::CodecError;
use crate::port::{PortName, PortRight};
use crate::registry::ServiceName;

use super::header::{
    self, msgh_bits, MsgHeader, PortDescriptor, BODY_LEN, DESCRIPTOR_LEN, DISP_COPY_SEND,
    DISP_MAKE_SEND_ONCE, DISP_MOVE_SEND_ONCE, HEADER_LEN, MSGH_BITS_COMPLEX, NDR_LEN,
};
use super::{RequestBody, BOOTSTRAP_CHECK_IN, BOOTSTRAP_LOOK_UP, BOOTSTRAP_PARENT,
    BOOTSTRAP_REGISTER, BOOTSTRAP_SUBSET};

/// Total length of a simple (name-only) request
pub const SIMPLE_REQUEST_LEN: usize = HEADER_LEN + NDR_LEN + crate::registry::NAME_FIELD_LEN;

/// Total length of a complex (right-bearing) request
pub const COMPLEX_REQUEST_LEN: usize = SIMPLE_REQUEST_LEN + BODY_LEN + DESCRIPTOR_LEN;

/// Total length of a port reply
pub const PORT_REPLY_LEN: usize = HEADER_LEN + BODY_LEN + DESCRIPTOR_LEN;

/// Total length of an error reply
pub const ERROR_REPLY_LEN: usize = HEADER_LEN + NDR_LEN + 4;

/// Decode a MIG-family body; `buf` is positioned just past the header
pub fn decode(header: &MsgHeader, buf: &mut Bytes) -> Result<RequestBody, CodecError> {
    match header.id {
        BOOTSTRAP_CHECK_IN => Ok(RequestBody::MigCheckIn { name: take_simple_name(buf)? }),
        BOOTSTRAP_LOOK_UP => Ok(RequestBody::MigLookUp { name: take_simple_name(buf)? }),
        BOOTSTRAP_REGISTER => decode_register(header, buf),
        // parent/subset carry no body the broker reads
        BOOTSTRAP_PARENT => Ok(RequestBody::MigParent),
        BOOTSTRAP_SUBSET => Ok(RequestBody::MigSubset),
        other => Err(CodecError::BadMessageId(other)),
    }
}

fn take_simple_name(buf: &mut Bytes) -> Result<ServiceName, CodecError> {
    header::skip_ndr(buf)?;
    let name = header::take_name_field(buf)?;
    // The fixed field bounds the name below the registry limit already
    ServiceName::new(name).map_err(|_| CodecError::Malformed("service name too long"))
}

fn decode_register(header: &MsgHeader, buf: &mut Bytes) -> Result<RequestBody, CodecError> {
    if !header.is_complex() {
        return Err(CodecError::Malformed("register without complex flag"));
    }
    if buf.remaining() < BODY_LEN {
        return Err(CodecError::Truncated { declared: BODY_LEN, actual: buf.remaining() });
    }
    let descriptor_count = buf.get_u32_le();
    if descriptor_count != 1 {
        return Err(CodecError::Malformed("register needs exactly one descriptor"));
    }
    let descriptor = PortDescriptor::decode(buf)?;
    let name = take_simple_name(buf)?;

    // The caller moved a send right in; the broker owns it now.
    Ok(RequestBody::MigRegister { name, right: PortRight::owned(descriptor.name) })
}

/// Encode a complex reply transferring one right
pub fn encode_port_reply(
    reply_port: PortName,
    reply_id: i32,
    port: PortName,
    disposition: u8,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(PORT_REPLY_LEN);
    MsgHeader {
        bits: MSGH_BITS_COMPLEX | msgh_bits(DISP_MOVE_SEND_ONCE, 0),
        size: PORT_REPLY_LEN as u32,
        remote_port: reply_port,
        local_port: PortName::NULL,
        voucher_port: PortName::NULL,
        id: reply_id,
    }
    .encode(&mut buf);
    buf.extend_from_slice(&1u32.to_le_bytes());
    PortDescriptor { name: port, disposition }.encode(&mut buf);
    buf.freeze()
}

/// Encode a simple status reply
pub fn encode_error_reply(reply_port: PortName, reply_id: i32, code: i32) -> Bytes {
    let mut buf = BytesMut::with_capacity(ERROR_REPLY_LEN);
    MsgHeader {
        bits: msgh_bits(DISP_MOVE_SEND_ONCE, 0),
        size: ERROR_REPLY_LEN as u32,
        remote_port: reply_port,
        local_port: PortName::NULL,
        voucher_port: PortName::NULL,
        id: reply_id,
    }
    .encode(&mut buf);
    header::put_ndr(&mut buf);
    buf.extend_from_slice(&code.to_le_bytes());
    buf.freeze()
}

/// Encode a check_in request (client side)
pub fn encode_check_in_request(reply_port: PortName, name: &str) -> Result<Bytes, CodecError> {
    encode_simple_request(BOOTSTRAP_CHECK_IN, reply_port, name)
}

/// Encode a look_up request (client side)
pub fn encode_look_up_request(reply_port: PortName, name: &str) -> Result<Bytes, CodecError> {
    encode_simple_request(BOOTSTRAP_LOOK_UP, reply_port, name)
}

/// Encode a name-only request with an arbitrary subsystem ID
pub fn encode_simple_request(
    id: i32,
    reply_port: PortName,
    name: &str,
) -> Result<Bytes, CodecError> {
    check_name(name)?;
    let mut buf = BytesMut::with_capacity(SIMPLE_REQUEST_LEN);
    MsgHeader {
        bits: msgh_bits(DISP_COPY_SEND, DISP_MAKE_SEND_ONCE),
        size: SIMPLE_REQUEST_LEN as u32,
        remote_port: reply_port,
        local_port: PortName::NULL,
        voucher_port: PortName::NULL,
        id,
    }
    .encode(&mut buf);
    header::put_ndr(&mut buf);
    header::put_name_field(name, &mut buf);
    Ok(buf.freeze())
}

/// Encode a register request moving a send right in (client side)
pub fn encode_register_request(
    reply_port: PortName,
    name: &str,
    port: PortName,
) -> Result<Bytes, CodecError> {
    check_name(name)?;
    let mut buf = BytesMut::with_capacity(COMPLEX_REQUEST_LEN);
    MsgHeader {
        bits: MSGH_BITS_COMPLEX | msgh_bits(DISP_COPY_SEND, DISP_MAKE_SEND_ONCE),
        size: COMPLEX_REQUEST_LEN as u32,
        remote_port: reply_port,
        local_port: PortName::NULL,
        voucher_port: PortName::NULL,
        id: BOOTSTRAP_REGISTER,
    }
    .encode(&mut buf);
    buf.extend_from_slice(&1u32.to_le_bytes());
    PortDescriptor { name: port, disposition: DISP_COPY_SEND }.encode(&mut buf);
    header::put_ndr(&mut buf);
    header::put_name_field(name, &mut buf);
    Ok(buf.freeze())
}

fn check_name(name: &str) -> Result<(), CodecError> {
    if name.len() > crate::registry::MAX_NAME_LEN {
        return Err(CodecError::Malformed("service name too long"));
    }
    Ok(())
}

/// Client-side view of a decoded reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireReply {
    /// Complex shape: one transferred right
    Endpoint { port: PortName, disposition: u8 },
    /// Simple shape: status code only
    Error { code: i32 },
}

/// Decode a reply frame as a client would, branching on the wire shape
///
/// Returns the reply message ID alongside the body; callers match it
/// against the ID they expect before trusting the reply.
pub fn decode_reply(frame: &Bytes) -> Result<(i32, WireReply), CodecError> {
    let mut buf = frame.clone();
    let header = MsgHeader::decode(&mut buf)?;
    if header.size as usize != frame.len() {
        return Err(CodecError::Truncated { declared: header.size as usize, actual: frame.len() });
    }

    if header.is_complex() {
        if buf.remaining() < BODY_LEN {
            return Err(CodecError::Truncated { declared: BODY_LEN, actual: buf.remaining() });
        }
        let descriptor_count = buf.get_u32_le();
        if descriptor_count != 1 {
            return Err(CodecError::Malformed("reply needs exactly one descriptor"));
        }
        let descriptor = PortDescriptor::decode(&mut buf)?;
        Ok((header.id, WireReply::Endpoint {
            port: descriptor.name,
            disposition: descriptor.disposition,
        }))
    } else {
        header::skip_ndr(&mut buf)?;
        if buf.remaining() < 4 {
            return Err(CodecError::Truncated { declared: 4, actual: buf.remaining() });
        }
        Ok((header.id, WireReply::Error { code: buf.get_i32_le() }))
    }
}
