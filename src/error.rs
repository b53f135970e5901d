use std::array::TryFromSliceError;

use crate::protocol::Address;

/// [Result] alias for return types of the crate API
pub type Result<T> = std::result::Result<T, Error>;

/// Error enum type
#[derive(Debug)]
pub enum Error {
    /// Framing error on the serial link: bad frame check sequence or
    /// truncated frame. The String contains the reason.
    Framing(String),
    /// A frame payload was pulled from the decoder before a complete frame
    /// was received.
    IncompleteFrame,
    /// Invalid packet header: unsupported protocol version or invalid tag
    /// value. The String contains the reason.
    Header(String),
    /// Unknown payload type byte.
    UnsupportedPayload(u8),
    /// A payload body declares more bytes than are available. The String
    /// contains the reason.
    ShortPayload(String),
    /// Outbound command addressed to a robot that never advertised itself.
    UnknownDotBot(Address),
    /// The serial link failed or disconnected. The String contains the
    /// reason.
    LinkDown(String),
    /// A command was dispatched while no gateway adapter is running.
    DispatchBlocked,
    /// Error with the async runtime or task plumbing.
    SystemError(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Framing(reason) => write!(f, "framing error: {}", reason),
            Error::IncompleteFrame => write!(f, "incomplete HDLC frame"),
            Error::Header(reason) => write!(f, "invalid header: {}", reason),
            Error::UnsupportedPayload(tag) => {
                write!(f, "unsupported payload type '0x{:02x}'", tag)
            }
            Error::ShortPayload(reason) => write!(f, "short payload: {}", reason),
            Error::UnknownDotBot(address) => write!(f, "unknown dotbot '{}'", address),
            Error::LinkDown(reason) => write!(f, "link down: {}", reason),
            Error::DispatchBlocked => write!(f, "gateway adapter not started"),
            Error::SystemError(reason) => write!(f, "system error: {}", reason),
        }
    }
}

impl std::error::Error for Error {}

impl From<TryFromSliceError> for Error {
    fn from(e: TryFromSliceError) -> Self {
        Self::ShortPayload(format!("{:?}", e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::LinkDown(e.to_string())
    }
}

impl From<serialport::Error> for Error {
    fn from(e: serialport::Error) -> Self {
        Self::LinkDown(e.to_string())
    }
}
