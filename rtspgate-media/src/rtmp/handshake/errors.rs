use std::io;

#[derive(Debug, thiserror::Error)]
pub enum HandshakeErrorValue {
    #[error("io error: {0}")]
    IO(#[source] io::Error),
    #[error("unsupported rtmp version {0}")]
    VersionNotSupported(u8),
    #[error("handshake timed out")]
    Timeout,
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct HandshakeError {
    pub value: HandshakeErrorValue,
}

impl From<HandshakeErrorValue> for HandshakeError {
    fn from(val: HandshakeErrorValue) -> Self {
        Self { value: val }
    }
}

impl From<io::Error> for HandshakeError {
    fn from(error: io::Error) -> Self {
        Self {
            value: HandshakeErrorValue::IO(error),
        }
    }
}
