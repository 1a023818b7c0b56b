//! RTP packetization for the egress tracks.

pub mod aac;
pub mod h264;

use {
    crate::{bytesio::bytes_writer::BytesWriter, frame::EgressFrame},
    byteorder::BigEndian,
    bytes::Bytes,
};

pub const RTP_VERSION: u8 = 2;
/// Largest RTP payload we emit, leaving room for the interleaved and IP
/// framing under a 1500-byte MTU.
pub const MAX_PAYLOAD_SIZE: usize = 1400;
pub const RTP_HEADER_SIZE: usize = 12;

pub const H264_PAYLOAD_TYPE: u8 = 96;
pub const AAC_PAYLOAD_TYPE: u8 = 97;
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn marshal(&self, writer: &mut BytesWriter) {
        // V=2, no padding, no extension, no CSRCs
        writer.write_u8(RTP_VERSION << 6);
        writer.write_u8((u8::from(self.marker) << 7) | (self.payload_type & 0x7F));
        writer.write_u16::<BigEndian>(self.sequence_number);
        writer.write_u32::<BigEndian>(self.timestamp);
        writer.write_u32::<BigEndian>(self.ssrc);
    }

    #[must_use]
    pub fn unmarshal(packet: &[u8]) -> Option<Self> {
        if packet.len() < RTP_HEADER_SIZE || packet[0] >> 6 != RTP_VERSION {
            return None;
        }
        Some(Self {
            marker: packet[1] & 0x80 != 0,
            payload_type: packet[1] & 0x7F,
            sequence_number: u16::from_be_bytes([packet[2], packet[3]]),
            timestamp: u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
            ssrc: u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]),
        })
    }
}

/// Sequence and SSRC state of one outgoing RTP stream.
#[derive(Debug)]
pub struct RtpSequencer {
    payload_type: u8,
    ssrc: u32,
    sequence_number: u16,
}

impl RtpSequencer {
    #[must_use]
    pub fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            ssrc: rand::random(),
            sequence_number: rand::random(),
        }
    }

    #[must_use]
    pub const fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next packet will carry.
    #[must_use]
    pub const fn next_sequence_number(&self) -> u16 {
        self.sequence_number
    }

    /// Build one packet from the concatenation of `parts`.
    pub fn packet(&mut self, marker: bool, timestamp: u32, parts: &[&[u8]]) -> Bytes {
        let size = RTP_HEADER_SIZE + parts.iter().map(|p| p.len()).sum::<usize>();
        let mut writer = BytesWriter::with_capacity(size);
        RtpHeader {
            marker,
            payload_type: self.payload_type,
            sequence_number: self.sequence_number,
            timestamp,
            ssrc: self.ssrc,
        }
        .marshal(&mut writer);
        for part in parts {
            writer.write(part);
        }
        self.sequence_number = self.sequence_number.wrapping_add(1);
        writer.extract_current_bytes().freeze()
    }
}

/// Turns egress frames of one track into RTP packets.
pub trait Packetizer: Send {
    fn packetize(&mut self, frame: &EgressFrame) -> Vec<Bytes>;

    fn ssrc(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut sequencer = RtpSequencer::new(96);
        let first_seq = sequencer.next_sequence_number();
        let packet = sequencer.packet(true, 0x0102_0304, &[&[0xAA], &[0xBB, 0xCC]]);

        assert_eq!(packet.len(), RTP_HEADER_SIZE + 3);
        assert_eq!(packet[0], 0x80);
        assert_eq!(packet[1], 0x80 | 96);
        let header = RtpHeader::unmarshal(&packet).unwrap();
        assert!(header.marker);
        assert_eq!(header.sequence_number, first_seq);
        assert_eq!(header.timestamp, 0x0102_0304);
        assert_eq!(header.ssrc, sequencer.ssrc());
        assert_eq!(&packet[RTP_HEADER_SIZE..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_sequence_wraps() {
        let mut sequencer = RtpSequencer::new(97);
        sequencer.sequence_number = u16::MAX;
        let a = sequencer.packet(false, 0, &[]);
        let b = sequencer.packet(false, 0, &[]);
        assert_eq!(RtpHeader::unmarshal(&a).unwrap().sequence_number, u16::MAX);
        assert_eq!(RtpHeader::unmarshal(&b).unwrap().sequence_number, 0);
    }
}
