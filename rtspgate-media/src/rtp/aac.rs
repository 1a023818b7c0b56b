//! MPEG-4 generic payload format (RFC 3640) in AAC-hbr mode: one access
//! unit per packet behind a 16-bit AU header (13-bit size, 3-bit index).

use {
    super::{Packetizer, RtpSequencer, AAC_PAYLOAD_TYPE},
    crate::frame::EgressFrame,
    bytes::Bytes,
};

/// Largest AU expressible in the 13-bit size field.
pub const MAX_AU_SIZE: usize = 8191;

pub struct AacPacketizer {
    sequencer: RtpSequencer,
}

impl AacPacketizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sequencer: RtpSequencer::new(AAC_PAYLOAD_TYPE),
        }
    }
}

impl Default for AacPacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Packetizer for AacPacketizer {
    fn packetize(&mut self, frame: &EgressFrame) -> Vec<Bytes> {
        let EgressFrame::Audio { timestamp, data } = frame else {
            return Vec::new();
        };
        if data.is_empty() {
            return Vec::new();
        }
        if data.len() > MAX_AU_SIZE {
            tracing::warn!(size = data.len(), "AAC access unit too large, dropping");
            return Vec::new();
        }

        let au_header = ((data.len() as u16) << 3).to_be_bytes();
        // AU-headers-length in bits: one 16-bit header
        let headers_length = 16u16.to_be_bytes();
        vec![self
            .sequencer
            .packet(true, *timestamp, &[&headers_length, &au_header, data])]
    }

    fn ssrc(&self) -> u32 {
        self.sequencer.ssrc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::{RtpHeader, RTP_HEADER_SIZE};

    #[test]
    fn test_au_header() {
        let mut packetizer = AacPacketizer::new();
        let packets = packetizer.packetize(&EgressFrame::Audio {
            timestamp: 1024,
            data: Bytes::from(vec![0x21; 300]),
        });
        assert_eq!(packets.len(), 1);
        let packet = &packets[0];
        let header = RtpHeader::unmarshal(packet).unwrap();
        assert!(header.marker);
        assert_eq!(header.payload_type, AAC_PAYLOAD_TYPE);
        assert_eq!(header.timestamp, 1024);
        // 300 << 3 = 0x0960
        assert_eq!(&packet[RTP_HEADER_SIZE..RTP_HEADER_SIZE + 4], &[0x00, 0x10, 0x09, 0x60]);
        assert_eq!(packet.len(), RTP_HEADER_SIZE + 4 + 300);
    }

    #[test]
    fn test_oversized_and_video_frames_are_skipped() {
        let mut packetizer = AacPacketizer::new();
        assert!(packetizer
            .packetize(&EgressFrame::Audio {
                timestamp: 0,
                data: Bytes::from(vec![0; MAX_AU_SIZE + 1]),
            })
            .is_empty());
        assert!(packetizer
            .packetize(&EgressFrame::Video {
                timestamp: 0,
                key_frame: true,
                nalus: vec![Bytes::from_static(&[0x65])],
            })
            .is_empty());
    }
}
