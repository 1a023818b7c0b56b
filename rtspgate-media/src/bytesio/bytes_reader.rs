use {
    super::bytes_errors::{BytesReadError, BytesReadErrorValue},
    byteorder::ByteOrder,
    bytes::{Buf, BytesMut},
};

/// Cursor over an owned byte buffer; every read consumes what it returns.
#[derive(Debug, Default)]
pub struct BytesReader {
    buffer: BytesMut,
}

impl BytesReader {
    #[must_use]
    pub const fn new(input: BytesMut) -> Self {
        Self { buffer: input }
    }

    pub fn extend_from_slice(&mut self, extend: &[u8]) {
        self.buffer.extend_from_slice(extend);
    }

    fn ensure(&self, need: usize) -> Result<(), BytesReadError> {
        if self.buffer.len() < need {
            return Err(BytesReadErrorValue::NotEnoughBytes {
                need,
                have: self.buffer.len(),
            }
            .into());
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, bytes_num: usize) -> Result<BytesMut, BytesReadError> {
        self.ensure(bytes_num)?;
        Ok(self.buffer.split_to(bytes_num))
    }

    pub fn advance_bytes(&mut self, bytes_num: usize) -> Result<(), BytesReadError> {
        self.ensure(bytes_num)?;
        self.buffer.advance(bytes_num);
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, BytesReadError> {
        self.ensure(1)?;
        Ok(self.buffer.get_u8())
    }

    pub fn peek_u8(&self) -> Result<u8, BytesReadError> {
        self.ensure(1)?;
        Ok(self.buffer[0])
    }

    /// Byte at `index` without consuming anything.
    pub fn get(&self, index: usize) -> Result<u8, BytesReadError> {
        self.buffer
            .get(index)
            .copied()
            .ok_or_else(|| BytesReadErrorValue::IndexOutofRange.into())
    }

    pub fn read_u16<T: ByteOrder>(&mut self) -> Result<u16, BytesReadError> {
        self.ensure(2)?;
        let val = T::read_u16(&self.buffer[..2]);
        self.buffer.advance(2);
        Ok(val)
    }

    pub fn read_u24<T: ByteOrder>(&mut self) -> Result<u32, BytesReadError> {
        self.ensure(3)?;
        let val = T::read_u24(&self.buffer[..3]);
        self.buffer.advance(3);
        Ok(val)
    }

    pub fn read_u32<T: ByteOrder>(&mut self) -> Result<u32, BytesReadError> {
        self.ensure(4)?;
        let val = T::read_u32(&self.buffer[..4]);
        self.buffer.advance(4);
        Ok(val)
    }

    pub fn read_f64<T: ByteOrder>(&mut self) -> Result<f64, BytesReadError> {
        self.ensure(8)?;
        let val = T::read_f64(&self.buffer[..8]);
        self.buffer.advance(8);
        Ok(val)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn extract_remaining_bytes(&mut self) -> BytesMut {
        self.buffer.split_to(self.buffer.len())
    }

    #[must_use]
    pub fn get_remaining_bytes(&self) -> &[u8] {
        &self.buffer[..]
    }
}
