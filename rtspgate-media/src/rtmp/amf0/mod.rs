//! AMF0, the value encoding used by RTMP commands and `onMetaData`.

pub mod errors;
pub mod reader;
pub mod writer;

use indexmap::IndexMap;

pub mod marker {
    pub const NUMBER: u8 = 0x00;
    pub const BOOLEAN: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const OBJECT: u8 = 0x03;
    pub const NULL: u8 = 0x05;
    pub const UNDEFINED: u8 = 0x06;
    pub const ECMA_ARRAY: u8 = 0x08;
    pub const OBJECT_END: u8 = 0x09;
    pub const STRICT_ARRAY: u8 = 0x0A;
    pub const DATE: u8 = 0x0B;
    pub const LONG_STRING: u8 = 0x0C;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Amf0ValueType {
    Number(f64),
    Boolean(bool),
    UTF8String(String),
    Object(IndexMap<String, Amf0ValueType>),
    Null,
    Undefined,
    EcmaArray(IndexMap<String, Amf0ValueType>),
    StrictArray(Vec<Amf0ValueType>),
    Date { millis: f64, timezone: i16 },
    LongUTF8String(String),
    /// Terminator emitted by the reader for the `00 00 09` sequence.
    END,
}

impl Amf0ValueType {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::UTF8String(s) | Self::LongUTF8String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_object(&self) -> Option<&IndexMap<String, Self>> {
        match self {
            Self::Object(map) | Self::EcmaArray(map) => Some(map),
            _ => None,
        }
    }

    /// Shorthand for building command objects.
    #[must_use]
    pub fn object<const N: usize>(fields: [(&str, Self); N]) -> Self {
        Self::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::UTF8String(value.into())
    }
}
