#[derive(Debug, thiserror::Error)]
pub enum RtspErrorValue {
    #[error("malformed start line: {0}")]
    MalformedStartLine(String),
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),
    #[error("message header exceeds {0} bytes")]
    HeaderTooLarge(usize),
    #[error("invalid content length")]
    InvalidContentLength,
    #[error("body of {0} bytes exceeds the limit")]
    BodyTooLarge(usize),
    #[error("message is not valid utf-8")]
    InvalidEncoding,
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct RtspError {
    pub value: RtspErrorValue,
}

impl From<RtspErrorValue> for RtspError {
    fn from(val: RtspErrorValue) -> Self {
        Self { value: val }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport header missing")]
    Missing,
    #[error("only RTP/AVP/TCP interleaved transport is supported")]
    Unsupported,
    #[error("malformed transport parameter: {0}")]
    Malformed(String),
}
