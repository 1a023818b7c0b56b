use {
    super::{marker, Amf0ValueType},
    crate::bytesio::bytes_writer::BytesWriter,
    byteorder::BigEndian,
    bytes::BytesMut,
    indexmap::IndexMap,
};

#[derive(Default)]
pub struct Amf0Writer {
    writer: BytesWriter,
}

impl Amf0Writer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_anys(&mut self, values: &[Amf0ValueType]) {
        for value in values {
            self.write_any(value);
        }
    }

    pub fn write_any(&mut self, value: &Amf0ValueType) {
        match value {
            Amf0ValueType::Number(n) => {
                self.writer.write_u8(marker::NUMBER);
                self.writer.write_f64::<BigEndian>(*n);
            }
            Amf0ValueType::Boolean(b) => {
                self.writer.write_u8(marker::BOOLEAN);
                self.writer.write_u8(u8::from(*b));
            }
            Amf0ValueType::UTF8String(s) | Amf0ValueType::LongUTF8String(s) => {
                self.write_string(s);
            }
            Amf0ValueType::Object(properties) => {
                self.writer.write_u8(marker::OBJECT);
                self.write_properties(properties);
            }
            Amf0ValueType::Null => self.writer.write_u8(marker::NULL),
            Amf0ValueType::Undefined => self.writer.write_u8(marker::UNDEFINED),
            Amf0ValueType::EcmaArray(properties) => {
                self.writer.write_u8(marker::ECMA_ARRAY);
                self.writer.write_u32::<BigEndian>(properties.len() as u32);
                self.write_properties(properties);
            }
            Amf0ValueType::StrictArray(values) => {
                self.writer.write_u8(marker::STRICT_ARRAY);
                self.writer.write_u32::<BigEndian>(values.len() as u32);
                for value in values {
                    self.write_any(value);
                }
            }
            Amf0ValueType::Date { millis, timezone } => {
                self.writer.write_u8(marker::DATE);
                self.writer.write_f64::<BigEndian>(*millis);
                self.writer.write_u16::<BigEndian>(*timezone as u16);
            }
            Amf0ValueType::END => {
                self.writer.write(&[0, 0, marker::OBJECT_END]);
            }
        }
    }

    /// Short strings get the 16-bit length form, longer ones the 32-bit form.
    fn write_string(&mut self, value: &str) {
        match u16::try_from(value.len()) {
            Ok(len) => {
                self.writer.write_u8(marker::STRING);
                self.writer.write_u16::<BigEndian>(len);
            }
            Err(_) => {
                self.writer.write_u8(marker::LONG_STRING);
                self.writer.write_u32::<BigEndian>(value.len() as u32);
            }
        }
        self.writer.write(value.as_bytes());
    }

    fn write_properties(&mut self, properties: &IndexMap<String, Amf0ValueType>) {
        for (key, value) in properties {
            // keys longer than u16::MAX cannot be encoded; drop them
            let Ok(len) = u16::try_from(key.len()) else {
                continue;
            };
            self.writer.write_u16::<BigEndian>(len);
            self.writer.write(key.as_bytes());
            self.write_any(value);
        }
        self.writer.write(&[0, 0, marker::OBJECT_END]);
    }

    pub fn extract_current_bytes(&mut self) -> BytesMut {
        self.writer.extract_current_bytes()
    }
}
