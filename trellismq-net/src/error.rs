use trellismq_codec::error::{DecodeError, EncodeError, HandshakeError, ProtocolError};

#[derive(Debug, thiserror::Error)]
pub enum TmqError {
    /// Handshake error
    #[error("TMQ handshake error: {}", _0)]
    Handshake(#[from] HandshakeError),
    #[error("TMQ protocol error: {}", _0)]
    Protocol(#[from] ProtocolError),
    /// TMQ decoding error
    #[error("Decoding error: {0:?}")]
    Decode(#[from] DecodeError),
    /// TMQ encoding error
    #[error("Encoding error: {0:?}")]
    Encode(#[from] EncodeError),
    /// Read timeout
    #[error("Read timeout")]
    ReadTimeout,
    /// Write timeout
    #[error("Write timeout")]
    WriteTimeout,
    /// Flush timeout
    #[error("Flush timeout")]
    FlushTimeout,
    /// Close timeout
    #[error("Close timeout")]
    CloseTimeout,
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("invalid protocol")]
    InvalidProtocol,
    #[error("identifier rejected")]
    IdentifierRejected,
}
