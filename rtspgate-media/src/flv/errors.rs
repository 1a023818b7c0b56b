use crate::bytesio::bytes_errors::BytesReadError;

#[derive(Debug, thiserror::Error)]
pub enum DemuxerErrorValue {
    #[error("bytes read error: {0}")]
    BytesReadError(#[source] BytesReadError),
    #[error("empty tag")]
    EmptyTag,
    #[error("invalid decoder configuration: {0}")]
    InvalidSequenceHeader(&'static str),
    #[error("frame arrived before the sequence header")]
    MissingSequenceHeader,
    #[error("nal unit length {length} exceeds remaining {remaining} bytes")]
    NaluLengthOverflow { length: usize, remaining: usize },
    #[error("unsupported sampling frequency index {0}")]
    UnsupportedSamplingFrequency(u8),
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct FlvDemuxerError {
    pub value: DemuxerErrorValue,
}

impl From<DemuxerErrorValue> for FlvDemuxerError {
    fn from(val: DemuxerErrorValue) -> Self {
        Self { value: val }
    }
}

impl From<BytesReadError> for FlvDemuxerError {
    fn from(error: BytesReadError) -> Self {
        Self {
            value: DemuxerErrorValue::BytesReadError(error),
        }
    }
}
