use {
    super::{
        errors::{UnpackError, UnpackErrorValue},
        ChunkBasicHeader, ChunkInfo, ChunkMessageHeader, EXTENDED_TIMESTAMP_MARKER,
    },
    crate::{bytesio::bytes_reader::BytesReader, rtmp::define},
    byteorder::{BigEndian, LittleEndian},
    bytes::BytesMut,
    std::collections::HashMap,
};

/// Chunk streams tracked at once before the peer is considered abusive.
const MAX_CHUNK_STREAMS: usize = 256;
/// Largest message we are willing to reassemble.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Default)]
struct ChunkStreamState {
    header: ChunkMessageHeader,
    /// Whether the last fmt 0-2 header carried an extended timestamp; fmt 3
    /// chunks then repeat it.
    extended: bool,
    payload: BytesMut,
}

/// Layout of the chunk at the head of the buffer, computed without
/// consuming anything.
struct ChunkLayout {
    format: u8,
    csid: u32,
    basic_len: usize,
    extended: bool,
    payload_len: usize,
}

impl ChunkLayout {
    const fn message_header_len(&self) -> usize {
        match self.format {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        }
    }

    const fn total_len(&self) -> usize {
        self.basic_len
            + self.message_header_len()
            + if self.extended { 4 } else { 0 }
            + self.payload_len
    }
}

/// Reassembles RTMP messages from the chunk stream.
///
/// Only complete chunks are consumed, so a read that runs out of bytes can
/// simply be retried after more data arrives.
pub struct ChunkUnpacketizer {
    reader: BytesReader,
    streams: HashMap<u32, ChunkStreamState>,
    max_chunk_size: usize,
}

impl Default for ChunkUnpacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkUnpacketizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            reader: BytesReader::new(BytesMut::new()),
            streams: HashMap::new(),
            max_chunk_size: define::INIT_CHUNK_SIZE as usize,
        }
    }

    pub fn extend_data(&mut self, data: &[u8]) {
        self.reader.extend_from_slice(data);
    }

    pub fn update_max_chunk_size(&mut self, chunk_size: usize) {
        tracing::trace!(chunk_size, "update max chunk size");
        self.max_chunk_size = chunk_size.max(1);
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.reader.len()
    }

    /// Consume chunks until a message completes or the buffer runs dry.
    pub fn read_chunk(&mut self) -> Result<Option<ChunkInfo>, UnpackError> {
        loop {
            let Some(layout) = self.peek_layout()? else {
                return Ok(None);
            };
            if self.reader.len() < layout.total_len() {
                return Ok(None);
            }
            if let Some(chunk) = self.consume_chunk(&layout)? {
                return Ok(Some(chunk));
            }
        }
    }

    fn peek_layout(&self) -> Result<Option<ChunkLayout>, UnpackError> {
        if self.reader.is_empty() {
            return Ok(None);
        }
        let first = self.reader.get(0)?;
        let format = first >> 6;
        let (csid, basic_len) = match first & 0x3F {
            0 => {
                if self.reader.len() < 2 {
                    return Ok(None);
                }
                (u32::from(self.reader.get(1)?) + 64, 2)
            }
            1 => {
                if self.reader.len() < 3 {
                    return Ok(None);
                }
                let low = u32::from(self.reader.get(1)?);
                let high = u32::from(self.reader.get(2)?);
                (high * 256 + low + 64, 3)
            }
            id => (u32::from(id), 1),
        };

        let state = self.streams.get(&csid);
        if format != 0 && state.is_none() {
            return Err(UnpackErrorValue::UnknownChunkStream(csid).into());
        }
        if format == 0 && state.is_none() && self.streams.len() >= MAX_CHUNK_STREAMS {
            return Err(UnpackErrorValue::TooManyChunkStreams(MAX_CHUNK_STREAMS).into());
        }

        let mut layout = ChunkLayout {
            format,
            csid,
            basic_len,
            extended: false,
            payload_len: 0,
        };
        let header_len = layout.message_header_len();
        if self.reader.len() < basic_len + header_len {
            return Ok(None);
        }

        let msg_length = if format <= 1 {
            self.peek_u24(basic_len + 3)?
        } else {
            state.map_or(0, |s| s.header.msg_length)
        };
        if msg_length as usize > MAX_MESSAGE_SIZE {
            return Err(
                UnpackErrorValue::MessageTooLarge(msg_length as usize, MAX_MESSAGE_SIZE).into(),
            );
        }

        layout.extended = if format <= 2 {
            self.peek_u24(basic_len)? == EXTENDED_TIMESTAMP_MARKER
        } else {
            state.is_some_and(|s| s.extended)
        };

        // a fmt 0/1 header always starts a fresh message on this stream
        let received = match (format, state) {
            (0 | 1, _) | (_, None) => 0,
            (_, Some(s)) => s.payload.len(),
        };
        layout.payload_len = (msg_length as usize)
            .saturating_sub(received)
            .min(self.max_chunk_size);
        Ok(Some(layout))
    }

    fn peek_u24(&self, offset: usize) -> Result<u32, UnpackError> {
        Ok(u32::from(self.reader.get(offset)?) << 16
            | u32::from(self.reader.get(offset + 1)?) << 8
            | u32::from(self.reader.get(offset + 2)?))
    }

    fn consume_chunk(&mut self, layout: &ChunkLayout) -> Result<Option<ChunkInfo>, UnpackError> {
        self.reader.advance_bytes(layout.basic_len)?;
        let state = self.streams.entry(layout.csid).or_default();
        let starts_message = layout.format <= 1 || state.payload.is_empty();

        let mut timestamp_field = 0;
        match layout.format {
            0 => {
                timestamp_field = self.reader.read_u24::<BigEndian>()?;
                state.header.msg_length = self.reader.read_u24::<BigEndian>()?;
                state.header.msg_type_id = self.reader.read_u8()?;
                state.header.msg_stream_id = self.reader.read_u32::<LittleEndian>()?;
            }
            1 => {
                timestamp_field = self.reader.read_u24::<BigEndian>()?;
                state.header.msg_length = self.reader.read_u24::<BigEndian>()?;
                state.header.msg_type_id = self.reader.read_u8()?;
            }
            2 => {
                timestamp_field = self.reader.read_u24::<BigEndian>()?;
            }
            _ => {}
        }

        let extended_value = if layout.extended {
            Some(self.reader.read_u32::<BigEndian>()?)
        } else {
            None
        };
        if layout.format <= 2 {
            state.extended = layout.extended;
        }

        match layout.format {
            0 => {
                state.header.timestamp = extended_value.unwrap_or(timestamp_field);
                state.header.timestamp_delta = 0;
            }
            1 | 2 => {
                let delta = extended_value.unwrap_or(timestamp_field);
                state.header.timestamp_delta = delta;
                state.header.timestamp = state.header.timestamp.wrapping_add(delta);
            }
            _ => {
                if starts_message {
                    state.header.timestamp = state
                        .header
                        .timestamp
                        .wrapping_add(state.header.timestamp_delta);
                }
            }
        }

        if starts_message {
            state.payload.clear();
        }
        let payload = self.reader.read_bytes(layout.payload_len)?;
        state.payload.extend_from_slice(&payload);

        if state.payload.len() < state.header.msg_length as usize {
            return Ok(None);
        }

        Ok(Some(ChunkInfo {
            basic_header: ChunkBasicHeader {
                format: layout.format,
                chunk_stream_id: layout.csid,
            },
            message_header: state.header,
            payload: state.payload.split(),
        }))
    }
}
