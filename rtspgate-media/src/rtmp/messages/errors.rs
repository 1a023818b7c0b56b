use crate::{bytesio::bytes_errors::BytesReadError, rtmp::amf0::errors::Amf0ReadError};

#[derive(Debug, thiserror::Error)]
pub enum MessageErrorValue {
    #[error("amf0 read error: {0}")]
    Amf0ReadError(#[source] Amf0ReadError),
    #[error("bytes read error: {0}")]
    BytesReadError(#[source] BytesReadError),
    #[error("command message without a name")]
    MissingCommandName,
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct MessageError {
    pub value: MessageErrorValue,
}

impl From<MessageErrorValue> for MessageError {
    fn from(val: MessageErrorValue) -> Self {
        Self { value: val }
    }
}

impl From<Amf0ReadError> for MessageError {
    fn from(error: Amf0ReadError) -> Self {
        Self {
            value: MessageErrorValue::Amf0ReadError(error),
        }
    }
}

impl From<BytesReadError> for MessageError {
    fn from(error: BytesReadError) -> Self {
        Self {
            value: MessageErrorValue::BytesReadError(error),
        }
    }
}
