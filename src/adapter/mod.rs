//! # Gateway adapters
//!
//! The controller reaches the swarm through a radio gateway, and the
//! gateway through a link. Adapters own that link: they turn its byte
//! stream into parsed [Frame]s pushed onto a channel, and turn outbound
//! frames into bytes on the wire. The controller is only ever handed the
//! channel, never the link itself.
//!
//! Adapters are polymorphic over the link kind (a real serial port, a
//! simulator, a broker bridge); this crate ships the serial implementation
//! as [SerialAdapter]. All adapters implement the same three operations.

use async_trait::async_trait;
use flume::{Receiver, Sender};
use log::warn;
use tokio::task::JoinHandle;

use crate::hdlc::{HdlcHandler, HdlcState};
use crate::protocol::Frame;
use crate::Result;

mod serial;

pub use serial::{SerialAdapter, SERIAL_BAUDRATE_DEFAULT, SERIAL_PORT_DEFAULT};

/// Payload announcing the controller to the gateway when the link opens.
pub(crate) const GATEWAY_ATTACH: [u8; 2] = [0x01, 0xFF];
/// Payload announcing the controller is leaving, sent before the link
/// closes.
pub(crate) const GATEWAY_DETACH: [u8; 2] = [0x01, 0xFE];

/// Drains a byte channel through the framing decoder and forwards every
/// well formed frame, in arrival order. There is exactly one decoder per
/// link; the pump runs until either channel closes. Codec errors drop the
/// frame and keep the pump alive.
pub fn spawn_frame_pump(bytes: Receiver<u8>, frames: Sender<Frame>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut handler = HdlcHandler::new();
        while let Ok(byte) = bytes.recv_async().await {
            handler.handle_byte(byte);
            if handler.state() != HdlcState::Ready {
                continue;
            }
            let payload = match handler.payload() {
                Ok(payload) => payload,
                Err(_) => continue,
            };
            if payload.is_empty() {
                continue;
            }
            match Frame::from_bytes(&payload) {
                Ok(frame) => {
                    if frames.send_async(frame).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!("Error parsing frame: {}", e),
            }
        }
    })
}

/// Interface between the controller and a gateway link.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// Opens the link and starts forwarding every decoded frame to
    /// `frames`, in arrival order.
    async fn start(&self, frames: Sender<Frame>) -> Result<()>;

    /// Serializes, frames and writes a packet to the link.
    async fn send_frame(&self, frame: &Frame) -> Result<()>;

    /// Closes the link and releases its resources.
    async fn close(&self);
}
