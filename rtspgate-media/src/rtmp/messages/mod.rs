pub mod errors;

use {
    super::{
        amf0::{reader::Amf0Reader, Amf0ValueType},
        chunk::ChunkInfo,
        define::msg_type_id,
    },
    crate::bytesio::{bytes_reader::BytesReader, bytes_writer::BytesWriter},
    byteorder::BigEndian,
    bytes::BytesMut,
    errors::{MessageError, MessageErrorValue},
};

/// A decoded RTMP message. Payload-carrying variants keep the raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpMessage {
    Amf0Command {
        command_name: String,
        transaction_id: f64,
        command_object: Amf0ValueType,
        others: Vec<Amf0ValueType>,
    },
    AmfData {
        values: Vec<Amf0ValueType>,
    },
    SetChunkSize {
        chunk_size: u32,
    },
    AbortMessage {
        chunk_stream_id: u32,
    },
    Acknowledgement {
        sequence_number: u32,
    },
    WindowAcknowledgementSize {
        size: u32,
    },
    SetPeerBandwidth {
        size: u32,
        limit_type: u8,
    },
    UserControl {
        event_type: u16,
        data: BytesMut,
    },
    Audio {
        data: BytesMut,
    },
    Video {
        data: BytesMut,
    },
    Unknown {
        msg_type_id: u8,
    },
}

impl RtmpMessage {
    pub fn parse(chunk: ChunkInfo) -> Result<Self, MessageError> {
        let type_id = chunk.message_header.msg_type_id;
        let mut reader = BytesReader::new(chunk.payload);

        let message = match type_id {
            msg_type_id::COMMAND_AMF0 | msg_type_id::COMMAND_AMF3 => {
                if type_id == msg_type_id::COMMAND_AMF3 {
                    // AMF3 commands carry a format byte, then AMF0 values
                    reader.read_u8()?;
                }
                let mut values = Amf0Reader::new(reader).read_all()?.into_iter();
                let command_name = values
                    .next()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .ok_or(MessageErrorValue::MissingCommandName)?;
                let transaction_id = values.next().and_then(|v| v.as_number()).unwrap_or(0.0);
                let command_object = values.next().unwrap_or(Amf0ValueType::Null);
                Self::Amf0Command {
                    command_name,
                    transaction_id,
                    command_object,
                    others: values.collect(),
                }
            }
            msg_type_id::DATA_AMF0 | msg_type_id::DATA_AMF3 => {
                if type_id == msg_type_id::DATA_AMF3 {
                    reader.read_u8()?;
                }
                Self::AmfData {
                    values: Amf0Reader::new(reader).read_all()?,
                }
            }
            msg_type_id::SET_CHUNK_SIZE => Self::SetChunkSize {
                // the high bit is reserved
                chunk_size: reader.read_u32::<BigEndian>()? & 0x7FFF_FFFF,
            },
            msg_type_id::ABORT => Self::AbortMessage {
                chunk_stream_id: reader.read_u32::<BigEndian>()?,
            },
            msg_type_id::ACKNOWLEDGEMENT => Self::Acknowledgement {
                sequence_number: reader.read_u32::<BigEndian>()?,
            },
            msg_type_id::WIN_ACKNOWLEDGEMENT_SIZE => Self::WindowAcknowledgementSize {
                size: reader.read_u32::<BigEndian>()?,
            },
            msg_type_id::SET_PEER_BANDWIDTH => Self::SetPeerBandwidth {
                size: reader.read_u32::<BigEndian>()?,
                limit_type: reader.read_u8()?,
            },
            msg_type_id::USER_CONTROL_EVENT => Self::UserControl {
                event_type: reader.read_u16::<BigEndian>()?,
                data: reader.extract_remaining_bytes(),
            },
            msg_type_id::AUDIO => Self::Audio {
                data: reader.extract_remaining_bytes(),
            },
            msg_type_id::VIDEO => Self::Video {
                data: reader.extract_remaining_bytes(),
            },
            _ => Self::Unknown {
                msg_type_id: type_id,
            },
        };
        Ok(message)
    }
}

/// Payload builders for the protocol control and user control messages the
/// server sends.
pub mod control {
    use super::{BigEndian, BytesMut, BytesWriter};

    fn u32_payload(value: u32) -> BytesMut {
        let mut writer = BytesWriter::with_capacity(4);
        writer.write_u32::<BigEndian>(value);
        writer.extract_current_bytes()
    }

    #[must_use]
    pub fn set_chunk_size(chunk_size: u32) -> BytesMut {
        u32_payload(chunk_size & 0x7FFF_FFFF)
    }

    #[must_use]
    pub fn window_acknowledgement_size(size: u32) -> BytesMut {
        u32_payload(size)
    }

    #[must_use]
    pub fn acknowledgement(sequence_number: u32) -> BytesMut {
        u32_payload(sequence_number)
    }

    #[must_use]
    pub fn set_peer_bandwidth(size: u32, limit_type: u8) -> BytesMut {
        let mut writer = BytesWriter::with_capacity(5);
        writer.write_u32::<BigEndian>(size);
        writer.write_u8(limit_type);
        writer.extract_current_bytes()
    }

    #[must_use]
    pub fn user_control(event_type: u16, value: u32) -> BytesMut {
        let mut writer = BytesWriter::with_capacity(6);
        writer.write_u16::<BigEndian>(event_type);
        writer.write_u32::<BigEndian>(value);
        writer.extract_current_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtmp::amf0::writer::Amf0Writer;

    #[test]
    fn test_parses_command() {
        let mut writer = Amf0Writer::new();
        writer.write_anys(&[
            Amf0ValueType::string("publish"),
            Amf0ValueType::Number(5.0),
            Amf0ValueType::Null,
            Amf0ValueType::string("cam1"),
            Amf0ValueType::string("live"),
        ]);
        let chunk = ChunkInfo::new(
            3,
            0,
            0,
            msg_type_id::COMMAND_AMF0,
            1,
            writer.extract_current_bytes(),
        );

        match RtmpMessage::parse(chunk).unwrap() {
            RtmpMessage::Amf0Command {
                command_name,
                transaction_id,
                command_object,
                others,
            } => {
                assert_eq!(command_name, "publish");
                assert_eq!(transaction_id, 5.0);
                assert_eq!(command_object, Amf0ValueType::Null);
                assert_eq!(others[0].as_str(), Some("cam1"));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_parses_set_chunk_size() {
        let chunk = ChunkInfo::new(
            2,
            0,
            0,
            msg_type_id::SET_CHUNK_SIZE,
            0,
            control::set_chunk_size(4096),
        );
        assert_eq!(
            RtmpMessage::parse(chunk).unwrap(),
            RtmpMessage::SetChunkSize { chunk_size: 4096 }
        );
    }

    #[test]
    fn test_command_without_name_is_rejected() {
        let mut writer = Amf0Writer::new();
        writer.write_any(&Amf0ValueType::Number(1.0));
        let chunk = ChunkInfo::new(
            3,
            0,
            0,
            msg_type_id::COMMAND_AMF0,
            0,
            writer.extract_current_bytes(),
        );
        assert!(RtmpMessage::parse(chunk).is_err());
    }
}
