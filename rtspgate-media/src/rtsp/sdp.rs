use {
    crate::rtp::{AAC_PAYLOAD_TYPE, H264_PAYLOAD_TYPE, VIDEO_CLOCK_RATE},
    base64::{engine::general_purpose::STANDARD, Engine},
    bytes::Bytes,
    std::fmt::Write,
};

/// A track the egress side can describe and packetize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackDescription {
    H264 { sps: Bytes, pps: Bytes },
    Aac { sample_rate: u32, channels: u8, config: Bytes },
}

impl TrackDescription {
    #[must_use]
    pub const fn clock_rate(&self) -> u32 {
        match self {
            Self::H264 { .. } => VIDEO_CLOCK_RATE,
            Self::Aac { sample_rate, .. } => *sample_rate,
        }
    }

    #[must_use]
    pub const fn payload_type(&self) -> u8 {
        match self {
            Self::H264 { .. } => H264_PAYLOAD_TYPE,
            Self::Aac { .. } => AAC_PAYLOAD_TYPE,
        }
    }

    #[must_use]
    pub const fn is_video(&self) -> bool {
        matches!(self, Self::H264 { .. })
    }

    fn write_media(&self, sdp: &mut String, track_id: usize) {
        let pt = self.payload_type();
        // writing into a String cannot fail
        let _ = match self {
            Self::H264 { sps, pps } => {
                let profile_level_id = sps.get(1..4).map(hex::encode_upper).unwrap_or_default();
                write!(
                    sdp,
                    "m=video 0 RTP/AVP {pt}\r\n\
                     a=rtpmap:{pt} H264/{VIDEO_CLOCK_RATE}\r\n\
                     a=fmtp:{pt} packetization-mode=1;profile-level-id={profile_level_id};sprop-parameter-sets={},{}\r\n",
                    STANDARD.encode(sps),
                    STANDARD.encode(pps),
                )
            }
            Self::Aac {
                sample_rate,
                channels,
                config,
            } => write!(
                sdp,
                "m=audio 0 RTP/AVP {pt}\r\n\
                 a=rtpmap:{pt} MPEG4-GENERIC/{sample_rate}/{channels}\r\n\
                 a=fmtp:{pt} streamtype=5;profile-level-id=1;mode=AAC-hbr;sizelength=13;indexlength=3;indexdeltalength=3;config={}\r\n",
                hex::encode(config),
            ),
        };
        let _ = write!(sdp, "a=control:trackID={track_id}\r\n");
    }
}

/// Session description for DESCRIBE. Track `n` is controlled as
/// `trackID=n`.
#[must_use]
pub fn build_sdp(session_name: &str, origin_host: &str, tracks: &[TrackDescription]) -> String {
    let session_id: u32 = rand::random();
    let mut sdp = String::with_capacity(512);
    let _ = write!(
        sdp,
        "v=0\r\n\
         o=- {session_id} 1 IN IP4 {origin_host}\r\n\
         s={session_name}\r\n\
         c=IN IP4 0.0.0.0\r\n\
         t=0 0\r\n\
         a=tool:rtspgate\r\n\
         a=control:*\r\n\
         a=range:npt=0-\r\n"
    );
    for (track_id, track) in tracks.iter().enumerate() {
        track.write_media(&mut sdp, track_id);
    }
    sdp
}

/// Track index addressed by a SETUP URI ending in `trackID=n`.
#[must_use]
pub fn track_id_from_uri(uri: &str) -> Option<usize> {
    let (_, tail) = uri.rsplit_once("trackID=")?;
    tail.trim_end_matches('/').parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_h264_and_aac_tracks() {
        let tracks = [
            TrackDescription::H264 {
                sps: Bytes::from_static(&[0x67, 0x64, 0x00, 0x1F]),
                pps: Bytes::from_static(&[0x68, 0xEE]),
            },
            TrackDescription::Aac {
                sample_rate: 44100,
                channels: 2,
                config: Bytes::from_static(&[0x12, 0x10]),
            },
        ];
        let sdp = build_sdp("cam1", "127.0.0.1", &tracks);

        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.contains("s=cam1\r\n"));
        assert!(sdp.contains("m=video 0 RTP/AVP 96\r\n"));
        assert!(sdp.contains("a=rtpmap:96 H264/90000\r\n"));
        assert!(sdp.contains(
            "a=fmtp:96 packetization-mode=1;profile-level-id=64001F;sprop-parameter-sets=Z2QAHw==,aO4=\r\n"
        ));
        assert!(sdp.contains("a=control:trackID=0\r\n"));
        assert!(sdp.contains("a=rtpmap:97 MPEG4-GENERIC/44100/2\r\n"));
        assert!(sdp.contains("config=1210\r\n"));
        assert!(sdp.contains("a=control:trackID=1\r\n"));
    }

    #[test]
    fn test_track_id_from_uri() {
        assert_eq!(track_id_from_uri("rtsp://h:8554/cam1/trackID=1"), Some(1));
        assert_eq!(track_id_from_uri("rtsp://h:8554/cam1"), None);
    }
}
