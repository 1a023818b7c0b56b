use {crate::bytesio::bytes_errors::BytesReadError, std::string};

#[derive(Debug, thiserror::Error)]
pub enum Amf0ReadErrorValue {
    #[error("encountered unknown marker: {marker}")]
    UnknownMarker { marker: u8 },
    #[error("parser string error: {0}")]
    StringParseError(#[source] string::FromUtf8Error),
    #[error("bytes read error: {0}")]
    BytesReadError(#[source] BytesReadError),
    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct Amf0ReadError {
    pub value: Amf0ReadErrorValue,
}

impl From<Amf0ReadErrorValue> for Amf0ReadError {
    fn from(val: Amf0ReadErrorValue) -> Self {
        Self { value: val }
    }
}

impl From<string::FromUtf8Error> for Amf0ReadError {
    fn from(error: string::FromUtf8Error) -> Self {
        Self {
            value: Amf0ReadErrorValue::StringParseError(error),
        }
    }
}

impl From<BytesReadError> for Amf0ReadError {
    fn from(error: BytesReadError) -> Self {
        Self {
            value: Amf0ReadErrorValue::BytesReadError(error),
        }
    }
}
