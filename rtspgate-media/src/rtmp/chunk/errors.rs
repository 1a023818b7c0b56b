use crate::bytesio::bytes_errors::BytesReadError;

#[derive(Debug, thiserror::Error)]
pub enum UnpackErrorValue {
    #[error("bytes read error: {0}")]
    BytesReadError(#[source] BytesReadError),
    #[error("chunk stream {0} continues a message that was never started")]
    UnknownChunkStream(u32),
    #[error("message size {0} exceeds maximum {1}")]
    MessageTooLarge(usize, usize),
    #[error("too many chunk streams in flight (limit {0})")]
    TooManyChunkStreams(usize),
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct UnpackError {
    pub value: UnpackErrorValue,
}

impl From<UnpackErrorValue> for UnpackError {
    fn from(val: UnpackErrorValue) -> Self {
        Self { value: val }
    }
}

impl From<BytesReadError> for UnpackError {
    fn from(error: BytesReadError) -> Self {
        Self {
            value: UnpackErrorValue::BytesReadError(error),
        }
    }
}
