use {
    super::EXTENDED_TIMESTAMP_MARKER,
    crate::{bytesio::bytes_writer::BytesWriter, rtmp::define},
    byteorder::{BigEndian, LittleEndian},
    bytes::BytesMut,
};

/// Splits outgoing messages into chunks. Every message starts with a
/// type 0 header; continuation chunks use type 3.
pub struct ChunkPacketizer {
    max_chunk_size: usize,
}

impl Default for ChunkPacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkPacketizer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_chunk_size: define::INIT_CHUNK_SIZE as usize,
        }
    }

    pub fn update_max_chunk_size(&mut self, chunk_size: usize) {
        self.max_chunk_size = chunk_size.max(1);
    }

    fn write_basic_header(writer: &mut BytesWriter, format: u8, csid: u32) {
        let format = format << 6;
        match csid {
            0..=63 => writer.write_u8(format | csid as u8),
            64..=319 => {
                writer.write_u8(format);
                writer.write_u8((csid - 64) as u8);
            }
            _ => {
                writer.write_u8(format | 1);
                writer.write_u16::<LittleEndian>((csid - 64) as u16);
            }
        }
    }

    pub fn write_message(
        &mut self,
        csid: u32,
        msg_type_id: u8,
        msg_stream_id: u32,
        timestamp: u32,
        payload: &[u8],
    ) -> BytesMut {
        let chunks = payload.len().div_ceil(self.max_chunk_size).max(1);
        let mut writer = BytesWriter::with_capacity(payload.len() + 18 + chunks * 5);
        let extended = timestamp >= EXTENDED_TIMESTAMP_MARKER;

        Self::write_basic_header(&mut writer, 0, csid);
        writer.write_u24::<BigEndian>(timestamp.min(EXTENDED_TIMESTAMP_MARKER));
        writer.write_u24::<BigEndian>(payload.len() as u32);
        writer.write_u8(msg_type_id);
        writer.write_u32::<LittleEndian>(msg_stream_id);
        if extended {
            writer.write_u32::<BigEndian>(timestamp);
        }

        for (index, piece) in payload.chunks(self.max_chunk_size).enumerate() {
            if index > 0 {
                Self::write_basic_header(&mut writer, 3, csid);
                if extended {
                    writer.write_u32::<BigEndian>(timestamp);
                }
            }
            writer.write(piece);
        }

        writer.extract_current_bytes()
    }
}
