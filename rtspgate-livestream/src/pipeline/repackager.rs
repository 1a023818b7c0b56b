use rtspgate_media::flv::demuxer::{
    AudioTag, FlvAudioTagDemuxer, FlvVideoTagDemuxer, VideoTag,
};
use rtspgate_media::flv::errors::FlvDemuxerError;
use rtspgate_media::rtsp::sdp::TrackDescription;
use rtspgate_media::{EgressFrame, MediaFrame};
use tracing::{debug, info};

use super::transcoder::Transcoder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repackaged {
    Nothing,
    /// A sequence header changed the track list.
    TracksChanged,
    Frame(EgressFrame),
}

/// FLV tags in, egress frames out. Owns the demuxer state of one publisher.
pub struct Repackager {
    video: FlvVideoTagDemuxer,
    audio: FlvAudioTagDemuxer,
    transcoder: Box<dyn Transcoder>,
    enable_audio: bool,
    video_track: Option<TrackDescription>,
    audio_track: Option<TrackDescription>,
    unsupported_logged: bool,
}

impl Repackager {
    #[must_use]
    pub fn new(transcoder: Box<dyn Transcoder>, enable_audio: bool) -> Self {
        Self {
            video: FlvVideoTagDemuxer::new(),
            audio: FlvAudioTagDemuxer::new(),
            transcoder,
            enable_audio,
            video_track: None,
            audio_track: None,
            unsupported_logged: false,
        }
    }

    /// Known tracks, video first. Track `n` is `trackID=n` in the SDP.
    #[must_use]
    pub fn tracks(&self) -> Vec<TrackDescription> {
        self.video_track
            .iter()
            .chain(self.audio_track.iter())
            .cloned()
            .collect()
    }

    pub fn push(&mut self, frame: MediaFrame) -> Result<Repackaged, FlvDemuxerError> {
        match frame {
            MediaFrame::Video { timestamp, data } => match self.video.demux(timestamp, data)? {
                VideoTag::SequenceHeader(config) => {
                    let (Some(sps), Some(pps)) = (config.sps.first(), config.pps.first()) else {
                        return Ok(Repackaged::Nothing);
                    };
                    let track = TrackDescription::H264 {
                        sps: sps.clone(),
                        pps: pps.clone(),
                    };
                    Ok(self.replace_track(true, track))
                }
                VideoTag::AccessUnit(unit) => Ok(self
                    .transcoder
                    .video(unit)
                    .map_or(Repackaged::Nothing, Repackaged::Frame)),
                VideoTag::EndOfSequence => Ok(Repackaged::Nothing),
                VideoTag::Unsupported(codec) => {
                    self.log_unsupported("video", codec);
                    Ok(Repackaged::Nothing)
                }
            },
            MediaFrame::Audio { .. } if !self.enable_audio => Ok(Repackaged::Nothing),
            MediaFrame::Audio { timestamp, data } => match self.audio.demux(timestamp, data)? {
                AudioTag::SequenceHeader(config) => {
                    let track = TrackDescription::Aac {
                        sample_rate: config.sample_rate,
                        channels: config.channels,
                        config: config.raw,
                    };
                    Ok(self.replace_track(false, track))
                }
                AudioTag::Frame(frame) => {
                    let Some(sample_rate) = self.audio.config().map(|c| c.sample_rate) else {
                        return Ok(Repackaged::Nothing);
                    };
                    Ok(self
                        .transcoder
                        .audio(frame, sample_rate)
                        .map_or(Repackaged::Nothing, Repackaged::Frame))
                }
                AudioTag::Unsupported(format) => {
                    self.log_unsupported("audio", format);
                    Ok(Repackaged::Nothing)
                }
            },
            MediaFrame::MetaData { .. } => Ok(Repackaged::Nothing),
        }
    }

    fn replace_track(&mut self, video: bool, track: TrackDescription) -> Repackaged {
        let slot = if video {
            &mut self.video_track
        } else {
            &mut self.audio_track
        };
        if slot.as_ref() == Some(&track) {
            return Repackaged::Nothing;
        }
        info!(track = ?track, transcoder = self.transcoder.name(), "Track described");
        *slot = Some(track);
        Repackaged::TracksChanged
    }

    fn log_unsupported(&mut self, kind: &str, codec: u8) {
        if !self.unsupported_logged {
            self.unsupported_logged = true;
            info!(kind, codec, "Ignoring unsupported codec");
        } else {
            debug!(kind, codec, "Ignoring unsupported codec");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_tags::*;
    use crate::pipeline::Passthrough;

    fn repackager(enable_audio: bool) -> Repackager {
        Repackager::new(Box::new(Passthrough), enable_audio)
    }

    #[test]
    fn test_sequence_headers_describe_tracks() {
        let mut repackager = repackager(true);
        assert_eq!(repackager.push(video_header(0)).unwrap(), Repackaged::TracksChanged);
        assert_eq!(repackager.push(audio_header(0)).unwrap(), Repackaged::TracksChanged);
        // repeated headers change nothing
        assert_eq!(repackager.push(video_header(40)).unwrap(), Repackaged::Nothing);

        let tracks = repackager.tracks();
        assert_eq!(tracks.len(), 2);
        assert!(tracks[0].is_video());
        assert_eq!(tracks[1].clock_rate(), 44_100);
    }

    #[test]
    fn test_access_units_become_frames() {
        let mut repackager = repackager(true);
        repackager.push(video_header(0)).unwrap();

        match repackager.push(video_keyframe(1000)).unwrap() {
            Repackaged::Frame(EgressFrame::Video {
                timestamp,
                key_frame,
                nalus,
            }) => {
                assert_eq!(timestamp, 90_000);
                assert!(key_frame);
                assert_eq!(nalus.len(), 1);
            }
            other => panic!("expected a video frame, got {other:?}"),
        }
    }

    #[test]
    fn test_audio_disabled() {
        let mut repackager = repackager(false);
        assert_eq!(repackager.push(audio_header(0)).unwrap(), Repackaged::Nothing);
        assert_eq!(repackager.push(audio_frame(23)).unwrap(), Repackaged::Nothing);
        assert!(repackager.tracks().is_empty());
    }

    #[test]
    fn test_nalu_before_sequence_header_is_an_error() {
        let mut repackager = repackager(true);
        assert!(repackager.push(video_keyframe(0)).is_err());
    }
}
