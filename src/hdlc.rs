//! # HDLC-like framing
//!
//! Every payload crossing the serial link to the gateway is wrapped in an
//! HDLC-like frame: a `0x7E` flag on each side, a 16-bit frame check
//! sequence appended little-endian, and byte stuffing so that neither the
//! flag nor the escape byte appear literally inside the frame.
//!
//! [hdlc_encode] and [hdlc_decode] operate on complete frames. The gateway
//! delivers bytes one at a time, so reception goes through [HdlcHandler]
//! which reassembles frames from a byte stream:
//! ```
//! use dotbot_lib::hdlc::{hdlc_encode, HdlcHandler, HdlcState};
//!
//! let mut handler = HdlcHandler::new();
//! for byte in hdlc_encode(b"test") {
//!     handler.handle_byte(byte);
//! }
//! assert_eq!(handler.state(), HdlcState::Ready);
//! assert_eq!(handler.payload().unwrap(), b"test");
//! ```
//!
//! A frame with a corrupted check sequence is not an error at this level:
//! the payload comes back empty and the decoder re-synchronizes on the next
//! flag.

use log::warn;

use crate::{Error, Result};

/// Frame delimiter.
pub const HDLC_FLAG: u8 = 0x7E;
const HDLC_FLAG_ESCAPED: u8 = 0x5E;
const HDLC_ESCAPE: u8 = 0x7D;
const HDLC_ESCAPE_ESCAPED: u8 = 0x5D;
const HDLC_FCS_INIT: u16 = 0xFFFF;
const HDLC_FCS_OK: u16 = 0xF0B8;

#[rustfmt::skip]
const FCS16TAB: [u16; 256] = [
    0x0000, 0x1189, 0x2312, 0x329B, 0x4624, 0x57AD, 0x6536, 0x74BF,
    0x8C48, 0x9DC1, 0xAF5A, 0xBED3, 0xCA6C, 0xDBE5, 0xE97E, 0xF8F7,
    0x1081, 0x0108, 0x3393, 0x221A, 0x56A5, 0x472C, 0x75B7, 0x643E,
    0x9CC9, 0x8D40, 0xBFDB, 0xAE52, 0xDAED, 0xCB64, 0xF9FF, 0xE876,
    0x2102, 0x308B, 0x0210, 0x1399, 0x6726, 0x76AF, 0x4434, 0x55BD,
    0xAD4A, 0xBCC3, 0x8E58, 0x9FD1, 0xEB6E, 0xFAE7, 0xC87C, 0xD9F5,
    0x3183, 0x200A, 0x1291, 0x0318, 0x77A7, 0x662E, 0x54B5, 0x453C,
    0xBDCB, 0xAC42, 0x9ED9, 0x8F50, 0xFBEF, 0xEA66, 0xD8FD, 0xC974,
    0x4204, 0x538D, 0x6116, 0x709F, 0x0420, 0x15A9, 0x2732, 0x36BB,
    0xCE4C, 0xDFC5, 0xED5E, 0xFCD7, 0x8868, 0x99E1, 0xAB7A, 0xBAF3,
    0x5285, 0x430C, 0x7197, 0x601E, 0x14A1, 0x0528, 0x37B3, 0x263A,
    0xDECD, 0xCF44, 0xFDDF, 0xEC56, 0x98E9, 0x8960, 0xBBFB, 0xAA72,
    0x6306, 0x728F, 0x4014, 0x519D, 0x2522, 0x34AB, 0x0630, 0x17B9,
    0xEF4E, 0xFEC7, 0xCC5C, 0xDDD5, 0xA96A, 0xB8E3, 0x8A78, 0x9BF1,
    0x7387, 0x620E, 0x5095, 0x411C, 0x35A3, 0x242A, 0x16B1, 0x0738,
    0xFFCF, 0xEE46, 0xDCDD, 0xCD54, 0xB9EB, 0xA862, 0x9AF9, 0x8B70,
    0x8408, 0x9581, 0xA71A, 0xB693, 0xC22C, 0xD3A5, 0xE13E, 0xF0B7,
    0x0840, 0x19C9, 0x2B52, 0x3ADB, 0x4E64, 0x5FED, 0x6D76, 0x7CFF,
    0x9489, 0x8500, 0xB79B, 0xA612, 0xD2AD, 0xC324, 0xF1BF, 0xE036,
    0x18C1, 0x0948, 0x3BD3, 0x2A5A, 0x5EE5, 0x4F6C, 0x7DF7, 0x6C7E,
    0xA50A, 0xB483, 0x8618, 0x9791, 0xE32E, 0xF2A7, 0xC03C, 0xD1B5,
    0x2942, 0x38CB, 0x0A50, 0x1BD9, 0x6F66, 0x7EEF, 0x4C74, 0x5DFD,
    0xB58B, 0xA402, 0x9699, 0x8710, 0xF3AF, 0xE226, 0xD0BD, 0xC134,
    0x39C3, 0x284A, 0x1AD1, 0x0B58, 0x7FE7, 0x6E6E, 0x5CF5, 0x4D7C,
    0xC60C, 0xD785, 0xE51E, 0xF497, 0x8028, 0x91A1, 0xA33A, 0xB2B3,
    0x4A44, 0x5BCD, 0x6956, 0x78DF, 0x0C60, 0x1DE9, 0x2F72, 0x3EFB,
    0xD68D, 0xC704, 0xF59F, 0xE416, 0x90A9, 0x8120, 0xB3BB, 0xA232,
    0x5AC5, 0x4B4C, 0x79D7, 0x685E, 0x1CE1, 0x0D68, 0x3FF3, 0x2E7A,
    0xE70E, 0xF687, 0xC41C, 0xD595, 0xA12A, 0xB0A3, 0x8238, 0x93B1,
    0x6B46, 0x7ACF, 0x4854, 0x59DD, 0x2D62, 0x3CEB, 0x0E70, 0x1FF9,
    0xF78F, 0xE606, 0xD49D, 0xC514, 0xB1AB, 0xA022, 0x92B9, 0x8330,
    0x7BC7, 0x6A4E, 0x58D5, 0x495C, 0x3DE3, 0x2C6A, 0x1EF1, 0x0F78,
];

fn fcs_update(fcs: u16, byte: u8) -> u16 {
    (fcs >> 8) ^ FCS16TAB[usize::from((fcs ^ u16::from(byte)) & 0xFF)]
}

fn push_escaped(frame: &mut Vec<u8>, byte: u8) {
    match byte {
        HDLC_ESCAPE => {
            frame.push(HDLC_ESCAPE);
            frame.push(HDLC_ESCAPE_ESCAPED);
        }
        HDLC_FLAG => {
            frame.push(HDLC_ESCAPE);
            frame.push(HDLC_FLAG_ESCAPED);
        }
        _ => frame.push(byte),
    }
}

/// Encodes a payload in an HDLC frame.
pub fn hdlc_encode(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 4);
    let mut fcs = HDLC_FCS_INIT;

    frame.push(HDLC_FLAG);
    for &byte in payload {
        fcs = fcs_update(fcs, byte);
        push_escaped(&mut frame, byte);
    }
    // FCS is transmitted as one's complement, little-endian, escaped like
    // any other frame byte
    let fcs = !fcs;
    push_escaped(&mut frame, (fcs & 0xFF) as u8);
    push_escaped(&mut frame, (fcs >> 8) as u8);
    frame.push(HDLC_FLAG);

    frame
}

/// Decodes a complete HDLC frame and returns the payload it contains.
pub fn hdlc_decode(frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < 2 {
        return Err(Error::Framing("frame too short".to_owned()));
    }
    let mut output = Vec::with_capacity(frame.len());
    let mut fcs = HDLC_FCS_INIT;
    let mut escape = false;
    for &byte in &frame[1..frame.len() - 1] {
        if byte == HDLC_ESCAPE {
            escape = true;
        } else if escape {
            match byte {
                HDLC_ESCAPE_ESCAPED => {
                    output.push(HDLC_ESCAPE);
                    fcs = fcs_update(fcs, HDLC_ESCAPE);
                }
                HDLC_FLAG_ESCAPED => {
                    output.push(HDLC_FLAG);
                    fcs = fcs_update(fcs, HDLC_FLAG);
                }
                _ => (),
            }
            escape = false;
        } else {
            output.push(byte);
            fcs = fcs_update(fcs, byte);
        }
    }
    if output.len() < 2 {
        return Err(Error::Framing("invalid payload".to_owned()));
    }
    if fcs != HDLC_FCS_OK {
        return Err(Error::Framing("invalid FCS".to_owned()));
    }
    output.truncate(output.len() - 2);
    Ok(output)
}

/// State of the frame decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdlcState {
    /// Waiting for a start flag.
    Idle,
    /// Accumulating frame bytes.
    Receiving,
    /// A complete frame is buffered, waiting to be pulled.
    Ready,
}

/// Handles the reception of an HDLC frame byte by byte.
///
/// There is exactly one handler per link: the decoder is stateful and bytes
/// must be fed in arrival order.
#[derive(Debug)]
pub struct HdlcHandler {
    state: HdlcState,
    fcs: u16,
    output: Vec<u8>,
    escape: bool,
}

impl Default for HdlcHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl HdlcHandler {
    pub fn new() -> Self {
        Self {
            state: HdlcState::Idle,
            fcs: HDLC_FCS_INIT,
            output: Vec::new(),
            escape: false,
        }
    }

    pub fn state(&self) -> HdlcState {
        self.state
    }

    /// Handle new byte received.
    pub fn handle_byte(&mut self, byte: u8) {
        match (self.state, byte) {
            (HdlcState::Idle | HdlcState::Ready, HDLC_FLAG) => {
                self.output.clear();
                self.fcs = HDLC_FCS_INIT;
                self.escape = false;
                self.state = HdlcState::Receiving;
            }
            (HdlcState::Receiving, HDLC_FLAG) if !self.output.is_empty() => {
                self.state = HdlcState::Ready;
            }
            // A flag with an empty buffer is another start flag
            (HdlcState::Receiving, HDLC_FLAG) => (),
            (HdlcState::Receiving, HDLC_ESCAPE) => {
                self.escape = true;
            }
            (HdlcState::Receiving, byte) if self.escape => {
                match byte {
                    HDLC_ESCAPE_ESCAPED => {
                        self.output.push(HDLC_ESCAPE);
                        self.fcs = fcs_update(self.fcs, HDLC_ESCAPE);
                    }
                    HDLC_FLAG_ESCAPED => {
                        self.output.push(HDLC_FLAG);
                        self.fcs = fcs_update(self.fcs, HDLC_FLAG);
                    }
                    _ => (),
                }
                self.escape = false;
            }
            (HdlcState::Receiving, byte) => {
                self.output.push(byte);
                self.fcs = fcs_update(self.fcs, byte);
            }
            _ => (),
        }
    }

    /// Returns the payload contained in a received frame.
    ///
    /// Must be called when the handler is in [HdlcState::Ready], otherwise
    /// [Error::IncompleteFrame] is returned. A frame that is too short or
    /// fails the FCS check yields an empty payload; the handler goes back to
    /// [HdlcState::Idle] either way.
    pub fn payload(&mut self) -> Result<Vec<u8>> {
        if self.state != HdlcState::Ready {
            return Err(Error::IncompleteFrame);
        }
        self.state = HdlcState::Idle;
        let mut output = std::mem::take(&mut self.output);
        let fcs = std::mem::replace(&mut self.fcs, HDLC_FCS_INIT);
        if output.len() < 3 {
            warn!("Dropping frame: invalid payload");
            return Ok(Vec::new());
        }
        if fcs != HDLC_FCS_OK {
            warn!("Dropping frame: invalid FCS");
            return Ok(Vec::new());
        }
        output.truncate(output.len() - 2);
        Ok(output)
    }
}
