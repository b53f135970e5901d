//! Serial gateway adapter.
//!
//! The gateway is attached over a serial link running 8-N-1 at a high
//! baudrate (1 Mbit/s by default). Reading happens on a dedicated OS
//! thread, one byte at a time, so the blocking port handle never enters the
//! async runtime: the thread only pushes bytes onto a channel drained by
//! the decoder task. Writes are paced in small chunks to respect the
//! gateway's input buffer.

use std::io::{Read, Write};
use std::time::Duration;

use async_trait::async_trait;
use flume as channel;
use futures::lock::Mutex;
use log::{error, info, warn};
use serialport::SerialPort;

use super::{GatewayAdapter, GATEWAY_ATTACH, GATEWAY_DETACH};
use crate::hdlc::hdlc_encode;
use crate::protocol::Frame;
use crate::{Error, Result};

/// Default serial port.
pub const SERIAL_PORT_DEFAULT: &str = "/dev/ttyACM0";
/// Default serial baudrate.
pub const SERIAL_BAUDRATE_DEFAULT: u32 = 1_000_000;

// The gateway input buffer is small: send at most 64 bytes at a time and
// leave it 2 ms to drain between chunks
const PAYLOAD_CHUNK_SIZE: usize = 64;
const PAYLOAD_CHUNK_DELAY: Duration = Duration::from_millis(2);
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Gateway adapter backed by a serial port.
pub struct SerialAdapter {
    port_name: String,
    baudrate: u32,
    port: Mutex<Option<Box<dyn SerialPort>>>,
}

impl SerialAdapter {
    pub fn new(port: &str, baudrate: u32) -> Self {
        Self {
            port_name: port.to_owned(),
            baudrate,
            port: Mutex::new(None),
        }
    }

    /// HDLC-encodes a payload and writes it to the port in paced chunks.
    async fn write_payload(&self, payload: &[u8]) -> Result<()> {
        let mut guard = self.port.lock().await;
        let port = guard.as_mut().ok_or(Error::DispatchBlocked)?;
        let frame = hdlc_encode(payload);
        for chunk in frame.chunks(PAYLOAD_CHUNK_SIZE) {
            port.write_all(chunk)?;
            port.flush()?;
            tokio::time::sleep(PAYLOAD_CHUNK_DELAY).await;
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayAdapter for SerialAdapter {
    async fn start(&self, frames: channel::Sender<Frame>) -> Result<()> {
        let port = serialport::new(&self.port_name, self.baudrate)
            .timeout(READ_TIMEOUT)
            .open()?;
        let reader = port.try_clone()?;
        *self.port.lock().await = Some(port);

        // Dedicated reader thread: the only place the link is read. Bytes
        // cross to the async side through an unbounded channel.
        let (byte_tx, byte_rx) = channel::unbounded();
        std::thread::spawn(move || {
            let mut reader = reader;
            let mut buffer = [0u8; 1];
            loop {
                match reader.read(&mut buffer) {
                    Ok(1) => {
                        if byte_tx.send(buffer[0]).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {
                        info!("Serial port disconnected");
                        break;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!("Serial port read failed: {}", e);
                        break;
                    }
                }
            }
        });
        info!("Serial port thread started");

        super::spawn_frame_pump(byte_rx, frames);

        self.write_payload(&GATEWAY_ATTACH).await?;
        info!("Connected to gateway over serial");
        Ok(())
    }

    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.write_payload(&frame.to_bytes()).await
    }

    async fn close(&self) {
        if let Err(e) = self.write_payload(&GATEWAY_DETACH).await {
            warn!("Could not notify gateway on close: {}", e);
        }
        // Dropping the handle closes the port; the reader thread exits on
        // the next failed read
        *self.port.lock().await = None;
        info!("Disconnected from gateway");
    }
}
