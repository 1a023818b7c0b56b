pub mod errors;
pub mod packetizer;
pub mod unpacketizer;

use bytes::BytesMut;

/// Timestamp field value that announces a trailing 4-byte extended timestamp.
pub const EXTENDED_TIMESTAMP_MARKER: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkBasicHeader {
    pub format: u8,
    pub chunk_stream_id: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkMessageHeader {
    /// Absolute message timestamp in milliseconds.
    pub timestamp: u32,
    pub msg_length: u32,
    pub msg_type_id: u8,
    pub msg_stream_id: u32,
    pub timestamp_delta: u32,
}

/// A fully reassembled RTMP message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkInfo {
    pub basic_header: ChunkBasicHeader,
    pub message_header: ChunkMessageHeader,
    pub payload: BytesMut,
}

impl ChunkInfo {
    #[must_use]
    pub fn new(
        csid: u32,
        format: u8,
        timestamp: u32,
        msg_type_id: u8,
        msg_stream_id: u32,
        payload: BytesMut,
    ) -> Self {
        Self {
            basic_header: ChunkBasicHeader {
                format,
                chunk_stream_id: csid,
            },
            message_header: ChunkMessageHeader {
                timestamp,
                msg_length: payload.len() as u32,
                msg_type_id,
                msg_stream_id,
                timestamp_delta: 0,
            },
            payload,
        }
    }
}
