//! XPC pipe envelope codec
//!
//! The rendezvous payload travels inside an ordinary message: header,
//! then (for rights-bearing replies) a body and one port descriptor,
//! then the serialized payload. No NDR record; the payload is fully
//! self-describing.
//!
//! The payload names any transferred endpoint inline, so the envelope
//! must attach a descriptor carrying the matching right whenever the
//! payload holds one. Decode does the reverse: descriptors are consumed
//! and the inline names in the payload remain authoritative.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::CodecError;
use crate::port::PortName;
use crate::xpc::{wire, XpcDecoder, XpcValue};

use super::header::{
    self, msgh_bits, MsgHeader, PortDescriptor, DISP_COPY_SEND, DISP_MAKE_SEND_ONCE,
    DISP_MOVE_RECEIVE, DISP_MOVE_SEND_ONCE, MSGH_BITS_COMPLEX,
};
use super::{RequestBody, PIPE_REPLY_ID, PIPE_REQUEST_ID};

/// Decode a pipe request body; `buf` is positioned just past the header
///
/// The payload must be a dictionary with a `routine` selector; anything
/// else is rejected before a handler sees it.
pub fn decode(hdr: &MsgHeader, buf: &mut Bytes) -> Result<RequestBody, CodecError> {
    if hdr.is_complex() {
        skip_descriptors(buf)?;
    }
    let payload = XpcDecoder::new().decode(buf)?;
    let routine = payload
        .get_u64("routine")
        .ok_or(CodecError::Malformed("pipe payload without routine"))?;
    Ok(RequestBody::Pipe { routine, payload })
}

fn skip_descriptors(buf: &mut Bytes) -> Result<(), CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated { declared: 4, actual: buf.remaining() });
    }
    let count = buf.get_u32_le() as usize;
    for _ in 0..count {
        PortDescriptor::decode(buf)?;
    }
    Ok(())
}

/// Encode a pipe reply around a payload
///
/// If the payload carries an endpoint the frame goes out complex with a
/// single descriptor for it; receive rights move, send rights copy.
pub fn encode_reply(reply_port: PortName, payload: &XpcValue) -> Bytes {
    encode_envelope(reply_port, PIPE_REPLY_ID, msgh_bits(DISP_MOVE_SEND_ONCE, 0), payload)
}

/// Encode a pipe request (client side)
pub fn encode_request(reply_port: PortName, payload: &XpcValue) -> Bytes {
    encode_envelope(
        reply_port,
        PIPE_REQUEST_ID,
        msgh_bits(DISP_COPY_SEND, DISP_MAKE_SEND_ONCE),
        payload,
    )
}

fn encode_envelope(remote_port: PortName, id: i32, base_bits: u32, payload: &XpcValue) -> Bytes {
    let mut body = BytesMut::new();
    wire::encode(payload, &mut body);

    let carried = carried_right(payload);
    let extra = if carried.is_some() {
        header::BODY_LEN + header::DESCRIPTOR_LEN
    } else {
        0
    };
    let size = header::HEADER_LEN + extra + body.len();

    let mut buf = BytesMut::with_capacity(size);
    MsgHeader {
        bits: if carried.is_some() { MSGH_BITS_COMPLEX | base_bits } else { base_bits },
        size: size as u32,
        remote_port,
        local_port: PortName::NULL,
        voucher_port: PortName::NULL,
        id,
    }
    .encode(&mut buf);
    if let Some(descriptor) = carried {
        buf.extend_from_slice(&1u32.to_le_bytes());
        descriptor.encode(&mut buf);
    }
    buf.extend_from_slice(&body);
    buf.freeze()
}

/// Decode a pipe reply payload (client side)
///
/// Frames whose ID is not the reply sentinel are discarded as stale.
pub fn decode_reply(frame: &Bytes) -> Result<Option<XpcValue>, CodecError> {
    let mut buf = frame.clone();
    let hdr = MsgHeader::decode(&mut buf)?;
    if hdr.id != PIPE_REPLY_ID {
        return Ok(None);
    }
    if hdr.is_complex() {
        skip_descriptors(&mut buf)?;
    }
    Ok(Some(XpcDecoder::new().decode(&mut buf)?))
}

/// First endpoint found in the payload, as the descriptor to attach
fn carried_right(payload: &XpcValue) -> Option<PortDescriptor> {
    match payload {
        XpcValue::SendRight(port) => {
            Some(PortDescriptor { name: *port, disposition: DISP_COPY_SEND })
        }
        XpcValue::ReceiveRight(port) => {
            Some(PortDescriptor { name: *port, disposition: DISP_MOVE_RECEIVE })
        }
        XpcValue::Dictionary(entries) => {
            // Deterministic pick under multiple candidates
            let mut keys: Vec<&String> = entries.keys().collect();
            keys.sort();
            keys.into_iter().find_map(|k| carried_right(&entries[k]))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::{PIPE_ROUTINE_LOOKUP_ENDPOINT, PIPE_ROUTINE_LIST_JOBS};

    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let payload = XpcValue::dictionary()
            .with("routine", PIPE_ROUTINE_LOOKUP_ENDPOINT)
            .with("name", "com.example.Server");
        let frame = encode_request(PortName::from_raw(0x900), &payload);

        let mut buf = frame.clone();
        let hdr = MsgHeader::decode(&mut buf).unwrap();
        assert_eq!(hdr.id, PIPE_REQUEST_ID);
        assert_eq!(hdr.size as usize, frame.len());
        assert!(!hdr.is_complex());

        match decode(&hdr, &mut buf).unwrap() {
            RequestBody::Pipe { routine, payload: decoded } => {
                assert_eq!(routine, PIPE_ROUTINE_LOOKUP_ENDPOINT);
                assert_eq!(decoded, payload);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_reply_with_endpoint_is_complex() {
        let port = PortName::from_raw(0x2000);
        let payload = XpcValue::dictionary()
            .with("error", 0i64)
            .with("endpoint", XpcValue::SendRight(port));
        let frame = encode_reply(PortName::from_raw(0x900), &payload);

        let mut buf = frame.clone();
        let hdr = MsgHeader::decode(&mut buf).unwrap();
        assert!(hdr.is_complex());
        assert_eq!(hdr.id, PIPE_REPLY_ID);

        let decoded = decode_reply(&frame).unwrap().expect("reply sentinel");
        assert_eq!(decoded.get("endpoint").and_then(XpcValue::as_port), Some(port));
    }

    #[test]
    fn test_reply_without_endpoint_is_simple() {
        let payload = XpcValue::dictionary().with("error", 1102i64);
        let frame = encode_reply(PortName::from_raw(0x900), &payload);

        let mut buf = frame.clone();
        let hdr = MsgHeader::decode(&mut buf).unwrap();
        assert!(!hdr.is_complex());
    }

    #[test]
    fn test_stale_reply_id_is_discarded() {
        let payload = XpcValue::dictionary().with("routine", PIPE_ROUTINE_LIST_JOBS);
        let frame = encode_request(PortName::from_raw(0x900), &payload);
        assert_eq!(decode_reply(&frame).unwrap(), None);
    }

    #[test]
    fn test_payload_without_routine() {
        let payload = XpcValue::dictionary().with("name", "com.example.Server");
        let frame = encode_request(PortName::from_raw(0x900), &payload);

        let mut buf = frame.clone();
        let hdr = MsgHeader::decode(&mut buf).unwrap();
        assert_eq!(
            decode(&hdr, &mut buf).unwrap_err(),
            CodecError::Malformed("pipe payload without routine")
        );
    }
}
