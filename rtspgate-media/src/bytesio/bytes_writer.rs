use {byteorder::ByteOrder, bytes::BytesMut};

/// Append-only big/little endian writer. Writing to memory cannot fail.
#[derive(Debug, Default)]
pub struct BytesWriter {
    bytes: BytesMut,
}

impl BytesWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, byte: u8) {
        self.bytes.extend_from_slice(&[byte]);
    }

    pub fn write_u16<T: ByteOrder>(&mut self, value: u16) {
        let mut buf = [0u8; 2];
        T::write_u16(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
    }

    pub fn write_u24<T: ByteOrder>(&mut self, value: u32) {
        let mut buf = [0u8; 3];
        T::write_u24(&mut buf, value & 0x00FF_FFFF);
        self.bytes.extend_from_slice(&buf);
    }

    pub fn write_u32<T: ByteOrder>(&mut self, value: u32) {
        let mut buf = [0u8; 4];
        T::write_u32(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
    }

    pub fn write_f64<T: ByteOrder>(&mut self, value: f64) {
        let mut buf = [0u8; 8];
        T::write_f64(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
    }

    pub fn write(&mut self, buf: &[u8]) {
        self.bytes.extend_from_slice(buf);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn extract_current_bytes(&mut self) -> BytesMut {
        self.bytes.split()
    }
}
