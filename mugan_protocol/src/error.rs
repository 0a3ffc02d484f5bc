// Errors raised while framing or decoding wire messages.

use crate::framing::MAX_MESSAGE_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})")]
    TooLarge { len: usize },
}

impl ProtocolError {
    /// The peer closed the stream, cleanly or mid-frame.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
