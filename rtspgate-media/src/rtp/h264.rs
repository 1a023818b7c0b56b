//! H.264 payload format (RFC 6184), packetization mode 1: single NAL unit
//! packets and FU-A fragments. STAP-A is never emitted.

use {
    super::{Packetizer, RtpSequencer, H264_PAYLOAD_TYPE, MAX_PAYLOAD_SIZE},
    crate::frame::EgressFrame,
    bytes::Bytes,
};

pub const NAL_TYPE_IDR: u8 = 5;
pub const NAL_TYPE_SPS: u8 = 7;
pub const NAL_TYPE_PPS: u8 = 8;
pub const NAL_TYPE_AUD: u8 = 9;
const NAL_TYPE_FU_A: u8 = 28;

pub struct H264Packetizer {
    sequencer: RtpSequencer,
    max_payload: usize,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

impl H264Packetizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sequencer: RtpSequencer::new(H264_PAYLOAD_TYPE),
            max_payload: MAX_PAYLOAD_SIZE,
            sps: None,
            pps: None,
        }
    }

    /// Parameter sets repeated in-band ahead of IDR pictures that lack them.
    #[must_use]
    pub fn with_parameter_sets(mut self, sps: Bytes, pps: Bytes) -> Self {
        self.sps = Some(sps);
        self.pps = Some(pps);
        self
    }

    #[must_use]
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        // an FU-A needs room for its two header bytes plus payload
        self.max_payload = max_payload.max(3);
        self
    }

    fn packetize_nalus(&mut self, timestamp: u32, nalus: &[Bytes]) -> Vec<Bytes> {
        let mut units: Vec<&Bytes> = nalus
            .iter()
            .filter(|nal| !nal.is_empty() && nal[0] & 0x1F != NAL_TYPE_AUD)
            .collect();

        let has_idr = units.iter().any(|nal| nal[0] & 0x1F == NAL_TYPE_IDR);
        let has_sps = units.iter().any(|nal| nal[0] & 0x1F == NAL_TYPE_SPS);
        let parameter_sets = if has_idr && !has_sps {
            self.sps.clone().zip(self.pps.clone())
        } else {
            None
        };
        if let Some((sps, pps)) = parameter_sets.as_ref() {
            units.insert(0, pps);
            units.insert(0, sps);
        }

        let mut packets = Vec::new();
        let last = units.len().saturating_sub(1);
        for (index, nal) in units.into_iter().enumerate() {
            self.packetize_nal(timestamp, nal, index == last, &mut packets);
        }
        packets
    }

    fn packetize_nal(&mut self, timestamp: u32, nal: &[u8], last_nal: bool, out: &mut Vec<Bytes>) {
        if nal.len() <= self.max_payload {
            out.push(self.sequencer.packet(last_nal, timestamp, &[nal]));
            return;
        }

        let header = nal[0];
        let indicator = (header & 0xE0) | NAL_TYPE_FU_A;
        let nal_type = header & 0x1F;
        let fragments: Vec<&[u8]> = nal[1..].chunks(self.max_payload - 2).collect();
        let count = fragments.len();
        for (index, fragment) in fragments.into_iter().enumerate() {
            let start = index == 0;
            let end = index + 1 == count;
            let fu_header = (u8::from(start) << 7) | (u8::from(end) << 6) | nal_type;
            out.push(self.sequencer.packet(
                end && last_nal,
                timestamp,
                &[&[indicator, fu_header], fragment],
            ));
        }
    }
}

impl Default for H264Packetizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Packetizer for H264Packetizer {
    fn packetize(&mut self, frame: &EgressFrame) -> Vec<Bytes> {
        match frame {
            EgressFrame::Video {
                timestamp, nalus, ..
            } => self.packetize_nalus(*timestamp, nalus),
            EgressFrame::Audio { .. } => Vec::new(),
        }
    }

    fn ssrc(&self) -> u32 {
        self.sequencer.ssrc()
    }
}
