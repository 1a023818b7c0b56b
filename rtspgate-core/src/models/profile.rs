use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const MAX_WIDTH: u32 = 7680;
const MAX_HEIGHT: u32 = 4320;
const MIN_BITRATE_KBPS: u32 = 64;
const MAX_BITRATE_KBPS: u32 = 100_000;
const MAX_FPS: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| Error::ConfigurationInvalid(format!("resolution {s:?} is not WxH")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| Error::ConfigurationInvalid(format!("resolution {s:?} is not WxH")))
        };
        Ok(Self::new(parse(w)?, parse(h)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    #[default]
    Aac,
    Opus,
    Pcm,
    Mp3,
}

/// Desired output parameters for a session.
///
/// Profiles are immutable values: a session that needs different parameters
/// is recreated with a new profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingProfile {
    pub resolution: Resolution,
    pub bitrate_kbps: u32,
    pub fps: u32,
    #[serde(default)]
    pub video_codec: VideoCodec,
    #[serde(default)]
    pub audio_codec: AudioCodec,
}

impl EncodingProfile {
    #[must_use]
    pub const fn new(resolution: Resolution, bitrate_kbps: u32, fps: u32) -> Self {
        Self {
            resolution,
            bitrate_kbps,
            fps,
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let Resolution { width, height } = self.resolution;
        if width == 0 || height == 0 {
            return Err(Error::ConfigurationInvalid(format!(
                "resolution {} has a zero dimension",
                self.resolution
            )));
        }
        if width % 2 != 0 || height % 2 != 0 {
            return Err(Error::ConfigurationInvalid(format!(
                "resolution {} must have even dimensions",
                self.resolution
            )));
        }
        if width > MAX_WIDTH || height > MAX_HEIGHT {
            return Err(Error::ConfigurationInvalid(format!(
                "resolution {} exceeds {MAX_WIDTH}x{MAX_HEIGHT}",
                self.resolution
            )));
        }
        if !(MIN_BITRATE_KBPS..=MAX_BITRATE_KBPS).contains(&self.bitrate_kbps) {
            return Err(Error::ConfigurationInvalid(format!(
                "bitrate {} kbps outside {MIN_BITRATE_KBPS}..={MAX_BITRATE_KBPS}",
                self.bitrate_kbps
            )));
        }
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(Error::ConfigurationInvalid(format!(
                "frame rate {} outside 1..={MAX_FPS}",
                self.fps
            )));
        }
        Ok(())
    }
}

/// Named, reusable profile template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub label: String,
    pub profile: EncodingProfile,
}

impl Preset {
    fn builtin(name: &str, label: &str, width: u32, height: u32, kbps: u32, fps: u32) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            profile: EncodingProfile::new(Resolution::new(width, height), kbps, fps),
        }
    }
}

#[must_use]
pub fn builtin_presets() -> Vec<Preset> {
    vec![
        Preset::builtin("high-quality", "High Quality", 1920, 1080, 5000, 30),
        Preset::builtin("balanced", "Balanced", 1280, 720, 2500, 30),
        Preset::builtin("low-bandwidth", "Low Bandwidth", 854, 480, 1000, 25),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_presets_are_valid() {
        let presets = builtin_presets();
        assert_eq!(presets.len(), 3);
        for preset in &presets {
            assert!(preset.profile.validate().is_ok(), "{}", preset.name);
        }
        assert_eq!(presets[0].profile.resolution, Resolution::new(1920, 1080));
        assert_eq!(presets[2].profile.fps, 25);
    }

    #[test]
    fn test_resolution_parse_and_display() {
        let r: Resolution = "1280x720".parse().unwrap();
        assert_eq!(r, Resolution::new(1280, 720));
        assert_eq!(r.to_string(), "1280x720");
        assert!("1280".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_profiles() {
        let ok = EncodingProfile::new(Resolution::new(1920, 1080), 2500, 30);
        assert!(ok.validate().is_ok());

        let odd = EncodingProfile::new(Resolution::new(1919, 1080), 2500, 30);
        assert!(odd.validate().is_err());

        let zero_fps = EncodingProfile { fps: 0, ..ok };
        assert!(zero_fps.validate().is_err());

        let huge_bitrate = EncodingProfile { bitrate_kbps: 500_000, ..ok };
        assert!(huge_bitrate.validate().is_err());

        let too_wide = EncodingProfile::new(Resolution::new(8192, 4320), 2500, 30);
        assert!(too_wide.validate().is_err());
    }

    #[test]
    fn test_profile_deserializes_with_codec_defaults() {
        let profile: EncodingProfile = serde_json::from_str(
            r#"{"resolution":{"width":1280,"height":720},"bitrate_kbps":2500,"fps":30}"#,
        )
        .unwrap();
        assert_eq!(profile.video_codec, VideoCodec::H264);
        assert_eq!(profile.audio_codec, AudioCodec::Aac);
    }
}
