use thiserror::Error;

/// All errors produced by the Riptide transport layer.
#[derive(Debug, Error)]
pub enum RiptideError {
    #[error("stream is closed for writing")]
    StreamClosed,

    #[error("push of {requested} bytes exceeds available capacity {available}")]
    CapacityExceeded { requested: usize, available: usize },

    #[error("datagram too short: expected at least {expected} bytes, got {actual}")]
    SegmentTooShort { expected: usize, actual: usize },

    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("retransmission limit ({0}) exceeded")]
    RetransmitLimitExceeded(u32),

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("socket is not connected to a peer")]
    NotConnected,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RiptideError>;
