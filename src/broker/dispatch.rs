//! Receive loop and error discipline
//!
//! One task drains the primary endpoint and processes requests strictly
//! one at a time; the registry needs no locking because nothing else
//! touches it. Malformed traffic is answered (when a reply right came
//! with it) and never tears the loop down: a broker that dies on a bad
//! frame takes every guest process down with it.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::CodecError;
use crate::port::{Inbound, PortSpace};
use crate::protocol::header::MsgHeader;
use crate::protocol::{status, Reply, Request, PIPE_REQUEST_ID};
use crate::xpc::XpcValue;

use super::handler::BrokerCore;

/// The dispatch loop around a [`BrokerCore`]
#[derive(Debug)]
pub struct Dispatcher<S: PortSpace> {
    core: BrokerCore<S>,
}

impl<S: PortSpace> Dispatcher<S> {
    /// Wrap a broker core
    pub fn new(core: BrokerCore<S>) -> Self {
        Dispatcher { core }
    }

    /// The wrapped core, for the readiness gate and tests
    pub fn core(&self) -> &BrokerCore<S> {
        &self.core
    }

    /// Drain the primary endpoint until every sender is gone
    pub async fn serve(mut self, mut receiver: mpsc::Receiver<Inbound>) {
        tracing::info!("dispatch loop running");
        while let Some(inbound) = receiver.recv().await {
            self.handle_inbound(inbound);
        }
        tracing::info!("primary endpoint closed, dispatch loop exiting");
    }

    /// Process one received message and deliver its reply, if any
    pub fn handle_inbound(&mut self, inbound: Inbound) {
        let reply = self.dispatch_frame(&inbound.frame);
        match (reply, inbound.reply) {
            (Some(frame), Some(tx)) => {
                if tx.send(frame).is_err() {
                    tracing::debug!("caller gone before reply delivery");
                }
            }
            (Some(_), None) => {
                tracing::debug!("dropping reply to a request without a reply right")
            }
            (None, Some(_)) => {} // dropping the sender signals no-reply
            (None, None) => {}
        }
    }

    /// Decode, handle, and encode one frame
    ///
    /// Returns `None` when no reply can or should be sent: an unreadable
    /// header, or a request carrying no reply right.
    pub fn dispatch_frame(&mut self, frame: &Bytes) -> Option<Bytes> {
        let header = match MsgHeader::decode(&mut frame.clone()) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!(error = %e, len = frame.len(), "unreadable frame dropped");
                return None;
            }
        };

        let reply = match Request::decode(frame) {
            Ok(request) => {
                tracing::debug!(id = request.header.id, "request received");
                self.core.handle(request.body)
            }
            Err(e) => {
                tracing::warn!(id = header.id, error = %e, "bad request");
                error_reply(&header, &e)
            }
        };

        if header.remote_port.is_null() {
            return None;
        }
        Some(reply.encode(header.remote_port, header.id))
    }
}

/// Reply for a request that failed to decode past its header
///
/// Pipe callers parse payloads, not status fields, so their errors ride
/// inside a payload; everything else gets the simple status shape.
fn error_reply(header: &MsgHeader, error: &CodecError) -> Reply {
    let code = match error {
        CodecError::BadMessageId(_) => status::MIG_BAD_ID,
        _ => status::MIG_BAD_ARGUMENTS,
    };
    if header.id == PIPE_REQUEST_ID {
        Reply::Pipe { payload: XpcValue::dictionary().with("error", i64::from(code)) }
    } else {
        Reply::Error { code }
    }
}
