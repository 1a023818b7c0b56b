use {
    crate::rtmp::{
        chunk::errors::UnpackError, handshake::errors::HandshakeError,
        messages::errors::MessageError,
    },
    std::io,
};

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct SessionError {
    pub value: SessionErrorValue,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionErrorValue {
    #[error("handshake error: {0}")]
    HandshakeError(#[source] HandshakeError),
    #[error("unpack error: {0}")]
    UnPackError(#[source] UnpackError),
    #[error("message error: {0}")]
    MessageError(#[source] MessageError),
    #[error("net io error: {0}")]
    IO(#[source] io::Error),
    #[error("publish before connect")]
    NoAppName,
    #[error("publish without a stream name")]
    NoStreamName,
    #[error("publish rejected: {0}")]
    PublishRejected(String),
    #[error("unexpected response to {0}")]
    UnexpectedResponse(String),
    #[error("peer closed the connection")]
    ConnectionClosed,
}

impl From<SessionErrorValue> for SessionError {
    fn from(val: SessionErrorValue) -> Self {
        Self { value: val }
    }
}

impl From<HandshakeError> for SessionError {
    fn from(error: HandshakeError) -> Self {
        Self {
            value: SessionErrorValue::HandshakeError(error),
        }
    }
}

impl From<UnpackError> for SessionError {
    fn from(error: UnpackError) -> Self {
        Self {
            value: SessionErrorValue::UnPackError(error),
        }
    }
}

impl From<MessageError> for SessionError {
    fn from(error: MessageError) -> Self {
        Self {
            value: SessionErrorValue::MessageError(error),
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(error: io::Error) -> Self {
        Self {
            value: SessionErrorValue::IO(error),
        }
    }
}
