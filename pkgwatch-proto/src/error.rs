//! Error types for the wire protocol.

use thiserror::Error;

/// All ways a frame can fail to decode (or a handshake to complete).
///
/// Every variant except `Io` means the peer broke framing: the
/// channel it occurred on is no longer trustworthy and must be torn
/// down by the caller.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Underlying I/O failure on the stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer disconnected (or a bug truncated a frame) mid-message.
    #[error("truncated message: stream ended inside a frame")]
    Truncated,

    /// A length field exceeded the decoder's ceiling.
    #[error("string of {len} bytes exceeds the {max}-byte limit")]
    OversizedString { len: u32, max: usize },

    /// A string payload was not valid UTF-8.
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,

    /// A boolean field held something other than 0 or 1.
    #[error("invalid boolean byte {0:#04x}")]
    BadBool(u8),

    /// An unrecognised command kind byte.
    #[error("unknown command id {0}")]
    UnknownCommand(u8),

    /// An unrecognised reply kind byte.
    #[error("unknown reply id {0}")]
    UnknownReply(u8),

    /// The peer claimed an older protocol version than ours; forward
    /// compatibility must be explicit, so the session is refused.
    #[error("peer speaks protocol version {peer}, but this end speaks the newer version {local}")]
    PeerTooOld { local: u32, peer: u32 },
}
