use {
    super::errors::SessionError,
    crate::rtmp::{
        amf0::{writer::Amf0Writer, Amf0ValueType},
        chunk::{packetizer::ChunkPacketizer, unpacketizer::ChunkUnpacketizer, ChunkInfo},
        define::{csid_type, msg_type_id},
        messages::control,
    },
    byteorder::{BigEndian, ByteOrder},
    tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Message-level I/O over a byte stream shared by the server and client
/// sessions. Protocol control messages that change the chunking state
/// (Set Chunk Size, Window Acknowledgement Size) are applied here before the
/// message is handed up.
pub struct ChunkIo<S> {
    io: S,
    unpacketizer: ChunkUnpacketizer,
    packetizer: ChunkPacketizer,
    read_buf: Vec<u8>,
    bytes_received: u64,
    ack_window: u32,
    last_ack: u64,
}

impl<S> ChunkIo<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: S) -> Self {
        Self {
            io,
            unpacketizer: ChunkUnpacketizer::new(),
            packetizer: ChunkPacketizer::new(),
            read_buf: vec![0u8; READ_BUFFER_SIZE],
            bytes_received: 0,
            ack_window: 0,
            last_ack: 0,
        }
    }

    /// Raw stream access for the handshake, before any chunk is exchanged.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.io
    }

    #[must_use]
    pub const fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Next complete message, or `None` once the peer has closed the stream.
    pub async fn read_chunk(&mut self) -> Result<Option<ChunkInfo>, SessionError> {
        loop {
            if let Some(chunk) = self.unpacketizer.read_chunk()? {
                self.apply_control(&chunk);
                return Ok(Some(chunk));
            }

            let n = self.io.read(&mut self.read_buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.unpacketizer.extend_data(&self.read_buf[..n]);
            self.bytes_received += n as u64;

            if self.ack_window > 0 && self.bytes_received - self.last_ack >= u64::from(self.ack_window)
            {
                self.last_ack = self.bytes_received;
                let sequence = self.bytes_received as u32;
                self.write_message(
                    csid_type::PROTOCOL_USER_CONTROL,
                    msg_type_id::ACKNOWLEDGEMENT,
                    0,
                    0,
                    &control::acknowledgement(sequence),
                )
                .await?;
            }
        }
    }

    fn apply_control(&mut self, chunk: &ChunkInfo) {
        if chunk.payload.len() < 4 {
            return;
        }
        let value = BigEndian::read_u32(&chunk.payload[..4]);
        match chunk.message_header.msg_type_id {
            msg_type_id::SET_CHUNK_SIZE => {
                let chunk_size = value & 0x7FFF_FFFF;
                tracing::debug!(chunk_size, "peer changed chunk size");
                self.unpacketizer.update_max_chunk_size(chunk_size as usize);
            }
            msg_type_id::WIN_ACKNOWLEDGEMENT_SIZE => {
                self.ack_window = value;
            }
            _ => {}
        }
    }

    pub async fn write_message(
        &mut self,
        csid: u32,
        msg_type_id: u8,
        msg_stream_id: u32,
        timestamp: u32,
        payload: &[u8],
    ) -> Result<(), SessionError> {
        let bytes = self
            .packetizer
            .write_message(csid, msg_type_id, msg_stream_id, timestamp, payload);
        self.io.write_all(&bytes).await?;
        self.io.flush().await?;
        Ok(())
    }

    pub async fn write_command(
        &mut self,
        csid: u32,
        msg_stream_id: u32,
        values: &[Amf0ValueType],
    ) -> Result<(), SessionError> {
        let mut writer = Amf0Writer::new();
        writer.write_anys(values);
        let payload = writer.extract_current_bytes();
        self.write_message(csid, msg_type_id::COMMAND_AMF0, msg_stream_id, 0, &payload)
            .await
    }

    /// Announce a new outgoing chunk size and switch to it.
    pub async fn set_chunk_size(&mut self, chunk_size: u32) -> Result<(), SessionError> {
        self.write_message(
            csid_type::PROTOCOL_USER_CONTROL,
            msg_type_id::SET_CHUNK_SIZE,
            0,
            0,
            &control::set_chunk_size(chunk_size),
        )
        .await?;
        self.packetizer.update_max_chunk_size(chunk_size as usize);
        Ok(())
    }

    pub async fn write_user_control(
        &mut self,
        event_type: u16,
        value: u32,
    ) -> Result<(), SessionError> {
        self.write_message(
            csid_type::PROTOCOL_USER_CONTROL,
            msg_type_id::USER_CONTROL_EVENT,
            0,
            0,
            &control::user_control(event_type, value),
        )
        .await
    }

    pub async fn shutdown(&mut self) {
        let _ = self.io.shutdown().await;
    }
}
