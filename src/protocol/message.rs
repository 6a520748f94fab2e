//! Request and reply unions
//!
//! Every inbound frame decodes once into the closed [`Request`] union;
//! handler selection is an exhaustive match over it, never ID sniffing
//! scattered through the loop. Replies take exactly two wire shapes
//! ("complex" with one endpoint descriptor, or "simple" with a status
//! code) plus the pipe envelope. Clients branch on the shape, so it must
//! match the emulated platform for every success/failure case.

use bytes::Bytes;

use crate::error::CodecError;
use crate::port::{PortName, PortRight};
use crate::registry::ServiceName;
use crate::xpc::XpcValue;

use super::header::{self, MsgHeader};
use super::{classify, legacy, mig, pipe, Family};

/// One decoded inbound request
#[derive(Debug)]
pub struct Request {
    pub header: MsgHeader,
    pub body: RequestBody,
}

/// The decoded request variants, across all three families
#[derive(Debug)]
pub enum RequestBody {
    /// MIG 402: create a fresh endpoint and register it
    MigCheckIn { name: ServiceName },
    /// MIG 403: register a caller-supplied send right
    MigRegister { name: ServiceName, right: PortRight },
    /// MIG 404: resolve a name to a send right
    MigLookUp { name: ServiceName },
    /// MIG 406: parent bootstrap, unsupported
    MigParent,
    /// MIG 409: subset creation, unsupported
    MigSubset,
    /// Legacy 700: register with an explicit length prefix
    LegacyRegister { name: ServiceName, right: PortRight },
    /// Legacy 701: lookup with an explicit length prefix
    LegacyLookUp { name: ServiceName },
    /// Legacy 702: reserved, always answered "not implemented"
    LegacySpawnApp,
    /// XPC pipe rendezvous
    Pipe { routine: u64, payload: XpcValue },
}

impl Request {
    /// Decode a full frame: header, total-length validation, then the
    /// family-specific body
    pub fn decode(frame: &Bytes) -> Result<Self, CodecError> {
        let mut buf = frame.clone();
        let header = MsgHeader::decode(&mut buf)?;

        // The declared total length must match the bytes actually
        // received before any interior length field is trusted.
        if header.size as usize != frame.len() {
            return Err(CodecError::Truncated {
                declared: header.size as usize,
                actual: frame.len(),
            });
        }

        let body = Self::decode_body(&header, &mut buf)?;
        Ok(Request { header, body })
    }

    /// Decode the body once the header has been validated
    pub fn decode_body(header: &MsgHeader, buf: &mut Bytes) -> Result<RequestBody, CodecError> {
        match classify(header.id) {
            Some(Family::Pipe) => pipe::decode(header, buf),
            Some(Family::Mig) => mig::decode(header, buf),
            Some(Family::Legacy) => legacy::decode(header, buf),
            None => Err(CodecError::BadMessageId(header.id)),
        }
    }
}

/// One outbound reply
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Success carrying a transferred right (complex shape, one
    /// descriptor, no status field)
    Endpoint { right: PortRight },
    /// Status-only reply (simple shape); `status::BOOTSTRAP_SUCCESS`
    /// doubles as the success acknowledgment for register
    Error { code: i32 },
    /// Pipe envelope with a typed payload
    Pipe { payload: XpcValue },
}

impl Reply {
    /// Encode for the wire
    ///
    /// `reply_port` is the caller's one-shot right; `request_id` selects
    /// the reply ID (request + offset, or the pipe reply sentinel).
    pub fn encode(&self, reply_port: PortName, request_id: i32) -> Bytes {
        match self {
            Reply::Endpoint { right } => mig::encode_port_reply(
                reply_port,
                super::reply_id(request_id),
                right.name,
                header::disposition_for(right.ownership),
            ),
            Reply::Error { code } => {
                mig::encode_error_reply(reply_port, super::reply_id(request_id), *code)
            }
            Reply::Pipe { payload } => pipe::encode_reply(reply_port, payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::{self, status};

    use super::*;

    #[test]
    fn test_decode_rejects_size_mismatch() {
        let frame = mig::encode_look_up_request(PortName::from_raw(0x900), "svc").unwrap();
        // Truncate the frame without fixing the declared size
        let short = frame.slice(..frame.len() - 20);

        let err = Request::decode(&short).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { declared: 160, actual: 140 }));
    }

    #[test]
    fn test_decode_unknown_id() {
        let frame = mig::encode_look_up_request(PortName::from_raw(0x900), "svc").unwrap();
        let mut bytes = frame.to_vec();
        bytes[20..24].copy_from_slice(&9999i32.to_le_bytes());
        let frame = Bytes::from(bytes);

        let err = Request::decode(&frame).unwrap_err();
        assert_eq!(err, CodecError::BadMessageId(9999));
    }

    #[test]
    fn test_error_reply_shape_is_simple() {
        let reply = Reply::Error { code: status::BOOTSTRAP_UNKNOWN_SERVICE };
        let frame = reply.encode(PortName::from_raw(0x900), protocol::BOOTSTRAP_LOOK_UP);

        let mut buf = frame.clone();
        let header = MsgHeader::decode(&mut buf).unwrap();
        assert!(!header.is_complex());
        assert_eq!(header.id, 504);
        assert_eq!(frame.len(), 36);
    }

    #[test]
    fn test_endpoint_reply_shape_is_complex() {
        let reply = Reply::Endpoint { right: PortRight::borrowed(PortName::from_raw(0x2000)) };
        let frame = reply.encode(PortName::from_raw(0x900), protocol::BOOTSTRAP_LOOK_UP);

        let mut buf = frame.clone();
        let header = MsgHeader::decode(&mut buf).unwrap();
        assert!(header.is_complex());
        assert_eq!(frame.len(), 40);
    }
}
