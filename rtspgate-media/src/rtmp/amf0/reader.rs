use {
    super::{
        errors::{Amf0ReadError, Amf0ReadErrorValue},
        marker, Amf0ValueType,
    },
    crate::bytesio::bytes_reader::BytesReader,
    byteorder::BigEndian,
    indexmap::IndexMap,
};

const MAX_DEPTH: usize = 32;

pub struct Amf0Reader {
    reader: BytesReader,
}

impl Amf0Reader {
    #[must_use]
    pub const fn new(reader: BytesReader) -> Self {
        Self { reader }
    }

    /// Decode every value remaining in the buffer.
    pub fn read_all(&mut self) -> Result<Vec<Amf0ValueType>, Amf0ReadError> {
        let mut results = Vec::new();
        while !self.reader.is_empty() {
            results.push(self.read_any()?);
        }
        Ok(results)
    }

    pub fn read_any(&mut self) -> Result<Amf0ValueType, Amf0ReadError> {
        self.read_value(0)
    }

    fn read_value(&mut self, depth: usize) -> Result<Amf0ValueType, Amf0ReadError> {
        if depth > MAX_DEPTH {
            return Err(Amf0ReadErrorValue::TooDeep(MAX_DEPTH).into());
        }
        let markers = self.reader.read_u8()?;
        match markers {
            marker::NUMBER => Ok(Amf0ValueType::Number(self.reader.read_f64::<BigEndian>()?)),
            marker::BOOLEAN => Ok(Amf0ValueType::Boolean(self.reader.read_u8()? != 0)),
            marker::STRING => Ok(Amf0ValueType::UTF8String(self.read_raw_string()?)),
            marker::OBJECT => Ok(Amf0ValueType::Object(self.read_properties(depth)?)),
            marker::NULL => Ok(Amf0ValueType::Null),
            marker::UNDEFINED => Ok(Amf0ValueType::Undefined),
            marker::ECMA_ARRAY => {
                // the count is advisory; properties run until the end marker
                self.reader.read_u32::<BigEndian>()?;
                Ok(Amf0ValueType::EcmaArray(self.read_properties(depth)?))
            }
            marker::OBJECT_END => Ok(Amf0ValueType::END),
            marker::STRICT_ARRAY => {
                let count = self.reader.read_u32::<BigEndian>()? as usize;
                let mut values = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    values.push(self.read_value(depth + 1)?);
                }
                Ok(Amf0ValueType::StrictArray(values))
            }
            marker::DATE => {
                let millis = self.reader.read_f64::<BigEndian>()?;
                let timezone = self.reader.read_u16::<BigEndian>()? as i16;
                Ok(Amf0ValueType::Date { millis, timezone })
            }
            marker::LONG_STRING => {
                let len = self.reader.read_u32::<BigEndian>()? as usize;
                let bytes = self.reader.read_bytes(len)?;
                Ok(Amf0ValueType::LongUTF8String(String::from_utf8(bytes.to_vec())?))
            }
            _ => Err(Amf0ReadErrorValue::UnknownMarker { marker: markers }.into()),
        }
    }

    fn read_raw_string(&mut self) -> Result<String, Amf0ReadError> {
        let len = self.reader.read_u16::<BigEndian>()? as usize;
        let bytes = self.reader.read_bytes(len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    fn is_object_end(&self) -> bool {
        matches!(
            (self.reader.get(0), self.reader.get(1), self.reader.get(2)),
            (Ok(0), Ok(0), Ok(marker::OBJECT_END))
        )
    }

    fn read_properties(
        &mut self,
        depth: usize,
    ) -> Result<IndexMap<String, Amf0ValueType>, Amf0ReadError> {
        let mut properties = IndexMap::new();
        loop {
            if self.is_object_end() {
                self.reader.advance_bytes(3)?;
                break;
            }
            // some encoders omit the terminator on the last value
            if self.reader.is_empty() {
                break;
            }
            let key = self.read_raw_string()?;
            let value = self.read_value(depth + 1)?;
            properties.insert(key, value);
        }
        Ok(properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtmp::amf0::writer::Amf0Writer;
    use bytes::BytesMut;

    #[test]
    fn test_reads_connect_command() {
        let mut writer = Amf0Writer::new();
        writer.write_any(&Amf0ValueType::string("connect"));
        writer.write_any(&Amf0ValueType::Number(1.0));
        writer.write_any(&Amf0ValueType::object([
            ("app", Amf0ValueType::string("live")),
            ("tcUrl", Amf0ValueType::string("rtmp://localhost/live")),
            ("fpad", Amf0ValueType::Boolean(false)),
        ]));

        let mut reader = Amf0Reader::new(BytesReader::new(writer.extract_current_bytes()));
        let values = reader.read_all().unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[0].as_str(), Some("connect"));
        assert_eq!(values[1].as_number(), Some(1.0));
        let obj = values[2].as_object().unwrap();
        assert_eq!(obj["app"].as_str(), Some("live"));
        assert_eq!(obj.keys().collect::<Vec<_>>(), vec!["app", "tcUrl", "fpad"]);
    }

    #[test]
    fn test_reads_ecma_array_metadata() {
        // ECMA array with count 1: {"width": 1280.0}
        let mut bytes = vec![marker::ECMA_ARRAY, 0, 0, 0, 1, 0, 5];
        bytes.extend_from_slice(b"width");
        bytes.push(marker::NUMBER);
        bytes.extend_from_slice(&1280.0f64.to_be_bytes());
        bytes.extend_from_slice(&[0, 0, marker::OBJECT_END]);

        let mut reader = Amf0Reader::new(BytesReader::new(BytesMut::from(&bytes[..])));
        let value = reader.read_any().unwrap();
        assert_eq!(value.as_object().unwrap()["width"].as_number(), Some(1280.0));
    }

    #[test]
    fn test_unknown_marker() {
        let mut reader = Amf0Reader::new(BytesReader::new(BytesMut::from(&[0x42u8][..])));
        let err = reader.read_any().unwrap_err();
        assert!(matches!(
            err.value,
            Amf0ReadErrorValue::UnknownMarker { marker: 0x42 }
        ));
    }

    #[test]
    fn test_truncated_string_fails() {
        let mut reader = Amf0Reader::new(BytesReader::new(BytesMut::from(
            &[marker::STRING, 0, 10, b'a'][..],
        )));
        assert!(reader.read_any().is_err());
    }
}
