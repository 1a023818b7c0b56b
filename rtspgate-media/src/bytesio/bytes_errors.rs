#[derive(Debug, thiserror::Error)]
pub enum BytesReadErrorValue {
    #[error("not enough bytes to read: need {need}, have {have}")]
    NotEnoughBytes { need: usize, have: usize },
    #[error("index out of range")]
    IndexOutofRange,
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct BytesReadError {
    pub value: BytesReadErrorValue,
}

impl From<BytesReadErrorValue> for BytesReadError {
    fn from(val: BytesReadErrorValue) -> Self {
        Self { value: val }
    }
}
