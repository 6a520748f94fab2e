//! Legacy broker family codec (700-range)
//!
//! A private protocol for shims that cannot or should not take the
//! standard bootstrap path. Unlike the MIG layouts, the name field here
//! carries an explicit length prefix:
//!
//! ```text
//! lookup request:   header(24) + NDR(8) + name_len(4) + name[128] = 164
//! register request: header(24) + body(4) + desc(12) + NDR(8)
//!                   + name_len(4) + name[128]                     = 180
//! ```
//!
//! A length prefix at or beyond the field width is clamped to the field
//! limit rather than trusted for the copy. Replies share the MIG shapes.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::CodecError;
use crate::port::{PortName, PortRight};
use crate::registry::{ServiceName, MAX_NAME_LEN, NAME_FIELD_LEN};

use super::header::{
    self, msgh_bits, MsgHeader, PortDescriptor, BODY_LEN, DESCRIPTOR_LEN, DISP_COPY_SEND,
    DISP_MAKE_SEND_ONCE, HEADER_LEN, MSGH_BITS_COMPLEX, NDR_LEN,
};
use super::{RequestBody, BROKER_LOOKUP_PORT, BROKER_REGISTER_PORT, BROKER_SPAWN_APP};

/// Total length of a simple (name-only) request
pub const SIMPLE_REQUEST_LEN: usize = HEADER_LEN + NDR_LEN + 4 + NAME_FIELD_LEN;

/// Total length of a complex (right-bearing) request
pub const COMPLEX_REQUEST_LEN: usize = SIMPLE_REQUEST_LEN + BODY_LEN + DESCRIPTOR_LEN;

/// Decode a legacy-family body; `buf` is positioned just past the header
pub fn decode(header: &MsgHeader, buf: &mut Bytes) -> Result<RequestBody, CodecError> {
    match header.id {
        BROKER_REGISTER_PORT => decode_register(header, buf),
        BROKER_LOOKUP_PORT => Ok(RequestBody::LegacyLookUp { name: take_prefixed_name(buf)? }),
        BROKER_SPAWN_APP => Ok(RequestBody::LegacySpawnApp),
        other => Err(CodecError::BadMessageId(other)),
    }
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
    let name = take_prefixed_name(buf)?;
    Ok(RequestBody::LegacyRegister { name, right: PortRight::owned(descriptor.name) })
}

fn take_prefixed_name(buf: &mut Bytes) -> Result<ServiceName, CodecError> {
    header::skip_ndr(buf)?;
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated { declared: 4, actual: buf.remaining() });
    }
    // Clamp rather than trust: an oversized prefix never reads past the
    // fixed-width field.
    let name_len = (buf.get_u32_le() as usize).min(MAX_NAME_LEN);
    if buf.remaining() < NAME_FIELD_LEN {
        return Err(CodecError::Truncated { declared: NAME_FIELD_LEN, actual: buf.remaining() });
    }
    let field = buf.split_to(NAME_FIELD_LEN);
    let end = field[..name_len].iter().position(|&b| b == 0).unwrap_or(name_len);
    let name = String::from_utf8(field[..end].to_vec())
        .map_err(|_| CodecError::Malformed("service name not UTF-8"))?;
    ServiceName::new(name).map_err(|_| CodecError::Malformed("service name too long"))
}

/// Encode a lookup request (client side)
pub fn encode_lookup_request(reply_port: PortName, name: &str) -> Result<Bytes, CodecError> {
    check_name(name)?;
    let mut buf = BytesMut::with_capacity(SIMPLE_REQUEST_LEN);
    MsgHeader {
        bits: msgh_bits(DISP_COPY_SEND, DISP_MAKE_SEND_ONCE),
        size: SIMPLE_REQUEST_LEN as u32,
        remote_port: reply_port,
        local_port: PortName::NULL,
        voucher_port: PortName::NULL,
        id: BROKER_LOOKUP_PORT,
    }
    .encode(&mut buf);
    header::put_ndr(&mut buf);
    put_prefixed_name(name, &mut buf);
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
        id: BROKER_REGISTER_PORT,
    }
    .encode(&mut buf);
    buf.extend_from_slice(&1u32.to_le_bytes());
    PortDescriptor { name: port, disposition: DISP_COPY_SEND }.encode(&mut buf);
    header::put_ndr(&mut buf);
    put_prefixed_name(name, &mut buf);
    Ok(buf.freeze())
}

/// Encode the reserved spawn-app request (client side)
///
/// Accepted by the broker but always answered "not implemented", so
/// callers can detect unavailability instead of hanging.
pub fn encode_spawn_app_request(reply_port: PortName) -> Bytes {
    const LEN: usize = HEADER_LEN + NDR_LEN;
    let mut buf = BytesMut::with_capacity(LEN);
    MsgHeader {
        bits: msgh_bits(DISP_COPY_SEND, DISP_MAKE_SEND_ONCE),
        size: LEN as u32,
        remote_port: reply_port,
        local_port: PortName::NULL,
        voucher_port: PortName::NULL,
        id: BROKER_SPAWN_APP,
    }
    .encode(&mut buf);
    header::put_ndr(&mut buf);
    buf.freeze()
}

fn put_prefixed_name(name: &str, buf: &mut BytesMut) {
    buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
    header::put_name_field(name, buf);
}

fn check_name(name: &str) -> Result<(), CodecError> {
    if name.len() > MAX_NAME_LEN {
        return Err(CodecError::Malformed("service name too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_request_roundtrip() {
        let frame = encode_lookup_request(PortName::from_raw(0x900), "PurpleSystemEventPort").unwrap();
        assert_eq!(frame.len(), SIMPLE_REQUEST_LEN);

        let mut buf = frame.clone();
        let hdr = MsgHeader::decode(&mut buf).unwrap();
        assert_eq!(hdr.id, BROKER_LOOKUP_PORT);

        match decode(&hdr, &mut buf).unwrap() {
            RequestBody::LegacyLookUp { name } => {
                assert_eq!(name.as_str(), "PurpleSystemEventPort");
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_register_request_roundtrip() {
        let port = PortName::from_raw(0x3000);
        let frame = encode_register_request(PortName::from_raw(0x900), "svc", port).unwrap();
        assert_eq!(frame.len(), COMPLEX_REQUEST_LEN);

        let mut buf = frame.clone();
        let hdr = MsgHeader::decode(&mut buf).unwrap();

        match decode(&hdr, &mut buf).unwrap() {
            RequestBody::LegacyRegister { name, right } => {
                assert_eq!(name.as_str(), "svc");
                assert_eq!(right.name, port);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_oversized_length_prefix_is_clamped() {
        let frame = encode_lookup_request(PortName::from_raw(0x900), "svc").unwrap();
        let mut bytes = frame.to_vec();
        // Corrupt the length prefix to claim 4GB
        bytes[32..36].copy_from_slice(&u32::MAX.to_le_bytes());
        let frame = Bytes::from(bytes);

        let mut buf = frame.clone();
        let hdr = MsgHeader::decode(&mut buf).unwrap();
        // Clamped to the field, then cut at the terminator
        match decode(&hdr, &mut buf).unwrap() {
            RequestBody::LegacyLookUp { name } => assert_eq!(name.as_str(), "svc"),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_spawn_app_decodes() {
        let frame = encode_spawn_app_request(PortName::from_raw(0x900));
        let mut buf = frame.clone();
        let hdr = MsgHeader::decode(&mut buf).unwrap();
        assert!(matches!(decode(&hdr, &mut buf).unwrap(), RequestBody::LegacySpawnApp));
    }

    #[test]
    fn test_unknown_in_range_id() {
        let frame = encode_lookup_request(PortName::from_raw(0x900), "svc").unwrap();
        let mut bytes = frame.to_vec();
        bytes[20..24].copy_from_slice(&750i32.to_le_bytes());
        let frame = Bytes::from(bytes);

        let mut buf = frame.clone();
        let hdr = MsgHeader::decode(&mut buf).unwrap();
        assert_eq!(decode(&hdr, &mut buf).unwrap_err(), CodecError::BadMessageId(750));
    }
}
