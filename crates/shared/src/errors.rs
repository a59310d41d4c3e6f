use std::fmt;

/// Failure while decoding an inbound WebSocket frame.
#[derive(Debug)]
pub enum FrameError {
    /// Violation of the framing rules (reserved bits, missing mask,
    /// stray continuation, oversized control frame).
    Protocol(&'static str),
    /// Reassembled payload exceeded the negotiated maximum.
    TooLarge { size: usize, limit: usize },
    /// The underlying transport failed or closed mid-frame.
    Io(std::io::Error),
}

impl std::error::Error for FrameError {}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Protocol(what) => write!(f, "websocket protocol error: {}", what),
            FrameError::TooLarge { size, limit } => {
                write!(f, "payload of {} bytes exceeds limit of {}", size, limit)
            }
            FrameError::Io(e) => write!(f, "websocket i/o error: {}", e),
        }
    }
}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        FrameError::Io(e)
    }
}

/// Failure while parsing an scmp command block.
#[derive(Debug)]
pub struct CommandError {
    pub message: String,
}

impl std::error::Error for CommandError {}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        CommandError {
            message: message.into(),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandError: {}", self.message)
    }
}
