use rtspgate_core::models::{AudioCodec, EncodingProfile, VideoCodec};
use rtspgate_media::flv::demuxer::{AacFrame, VideoAccessUnit};
use rtspgate_media::rtp::VIDEO_CLOCK_RATE;
use rtspgate_media::EgressFrame;
use tracing::warn;

/// Maps demuxed access units onto egress frames in RTP clock units.
pub trait Transcoder: Send {
    fn name(&self) -> &'static str;

    fn video(&mut self, unit: VideoAccessUnit) -> Option<EgressFrame>;

    fn audio(&mut self, frame: AacFrame, sample_rate: u32) -> Option<EgressFrame>;
}

/// Repackages H.264/AAC as received; only timestamps are rescaled.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Transcoder for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn video(&mut self, unit: VideoAccessUnit) -> Option<EgressFrame> {
        if unit.nalus.is_empty() {
            return None;
        }
        Some(EgressFrame::Video {
            timestamp: ms_to_clock(unit.pts, VIDEO_CLOCK_RATE),
            key_frame: unit.key_frame,
            nalus: unit.nalus,
        })
    }

    fn audio(&mut self, frame: AacFrame, sample_rate: u32) -> Option<EgressFrame> {
        if frame.data.is_empty() {
            return None;
        }
        Some(EgressFrame::Audio {
            timestamp: ms_to_clock(frame.timestamp, sample_rate),
            data: frame.data,
        })
    }
}

/// RTP timestamps wrap modulo 2^32 like the RTMP clock they come from.
fn ms_to_clock(ms: u32, clock_rate: u32) -> u32 {
    (u64::from(ms) * u64::from(clock_rate) / 1000) as u32
}

/// Transcoder for a session's profile. Only passthrough is built in, so a
/// profile asking for other codecs is served as H.264/AAC.
#[must_use]
pub fn transcoder_for(profile: &EncodingProfile) -> Box<dyn Transcoder> {
    if profile.video_codec != VideoCodec::H264 || profile.audio_codec != AudioCodec::Aac {
        warn!(
            video_codec = ?profile.video_codec,
            audio_codec = ?profile.audio_codec,
            "Requested codecs are not available, passing H.264/AAC through"
        );
    }
    Box::new(Passthrough)
}
