use {
    super::{
        define::{aac_packet_type, avc_packet_type, codec_id, frame_type, sound_format, AAC_SAMPLE_RATES},
        errors::{DemuxerErrorValue, FlvDemuxerError},
    },
    crate::bytesio::bytes_reader::BytesReader,
    byteorder::BigEndian,
    bytes::{Bytes, BytesMut},
};

/// Parameters from an `AVCDecoderConfigurationRecord`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcDecoderConfig {
    pub profile_idc: u8,
    pub profile_compatibility: u8,
    pub level_idc: u8,
    pub nal_length_size: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
}

impl AvcDecoderConfig {
    fn parse(reader: &mut BytesReader) -> Result<Self, FlvDemuxerError> {
        let version = reader.read_u8()?;
        if version != 1 {
            return Err(DemuxerErrorValue::InvalidSequenceHeader("configuration version").into());
        }
        let profile_idc = reader.read_u8()?;
        let profile_compatibility = reader.read_u8()?;
        let level_idc = reader.read_u8()?;
        let nal_length_size = (reader.read_u8()? & 0x03) + 1;
        if nal_length_size == 3 {
            return Err(DemuxerErrorValue::InvalidSequenceHeader("nal length size").into());
        }

        let sps_count = reader.read_u8()? & 0x1F;
        let mut sps = Vec::with_capacity(sps_count as usize);
        for _ in 0..sps_count {
            let len = reader.read_u16::<BigEndian>()? as usize;
            sps.push(reader.read_bytes(len)?.freeze());
        }
        let pps_count = reader.read_u8()?;
        let mut pps = Vec::with_capacity(pps_count as usize);
        for _ in 0..pps_count {
            let len = reader.read_u16::<BigEndian>()? as usize;
            pps.push(reader.read_bytes(len)?.freeze());
        }
        if sps.is_empty() || pps.is_empty() {
            return Err(DemuxerErrorValue::InvalidSequenceHeader("missing sps or pps").into());
        }

        Ok(Self {
            profile_idc,
            profile_compatibility,
            level_idc,
            nal_length_size,
            sps,
            pps,
        })
    }
}

/// One decodable picture: all NAL units sharing a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoAccessUnit {
    /// Decode timestamp in milliseconds.
    pub dts: u32,
    /// Presentation timestamp in milliseconds.
    pub pts: u32,
    pub key_frame: bool,
    pub nalus: Vec<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoTag {
    SequenceHeader(AvcDecoderConfig),
    AccessUnit(VideoAccessUnit),
    EndOfSequence,
    /// A codec we do not repackage; carries the FLV codec id.
    Unsupported(u8),
}

/// Stateful video demuxer; the NALU length size comes from the last
/// sequence header.
#[derive(Default)]
pub struct FlvVideoTagDemuxer {
    config: Option<AvcDecoderConfig>,
}

impl FlvVideoTagDemuxer {
    #[must_use]
    pub const fn new() -> Self {
        Self { config: None }
    }

    #[must_use]
    pub const fn config(&self) -> Option<&AvcDecoderConfig> {
        self.config.as_ref()
    }

    pub fn demux(&mut self, timestamp: u32, data: Bytes) -> Result<VideoTag, FlvDemuxerError> {
        let mut reader = BytesReader::new(BytesMut::from(&data[..]));
        if reader.is_empty() {
            return Err(DemuxerErrorValue::EmptyTag.into());
        }
        let first = reader.read_u8()?;
        let frame_kind = first >> 4;
        let codec = first & 0x0F;
        if codec != codec_id::H264 {
            return Ok(VideoTag::Unsupported(codec));
        }

        let packet_type = reader.read_u8()?;
        // composition time is a signed 24-bit value
        let raw_cts = reader.read_u24::<BigEndian>()?;
        let composition_time = ((raw_cts << 8) as i32) >> 8;

        match packet_type {
            avc_packet_type::AVC_SEQHDR => {
                let config = AvcDecoderConfig::parse(&mut reader)?;
                self.config = Some(config.clone());
                Ok(VideoTag::SequenceHeader(config))
            }
            avc_packet_type::AVC_NALU => {
                let config = self
                    .config
                    .as_ref()
                    .ok_or(DemuxerErrorValue::MissingSequenceHeader)?;
                let nalus = split_avcc(&mut reader, config.nal_length_size)?;
                Ok(VideoTag::AccessUnit(VideoAccessUnit {
                    dts: timestamp,
                    pts: timestamp.wrapping_add_signed(composition_time),
                    key_frame: frame_kind == frame_type::KEY_FRAME,
                    nalus,
                }))
            }
            avc_packet_type::AVC_EOS => Ok(VideoTag::EndOfSequence),
            _ => Err(DemuxerErrorValue::InvalidSequenceHeader("avc packet type").into()),
        }
    }
}

fn split_avcc(reader: &mut BytesReader, length_size: u8) -> Result<Vec<Bytes>, FlvDemuxerError> {
    let mut nalus = Vec::new();
    while !reader.is_empty() {
        let length = match length_size {
            1 => u32::from(reader.read_u8()?),
            2 => u32::from(reader.read_u16::<BigEndian>()?),
            _ => reader.read_u32::<BigEndian>()?,
        } as usize;
        if length > reader.len() {
            return Err(DemuxerErrorValue::NaluLengthOverflow {
                length,
                remaining: reader.len(),
            }
            .into());
        }
        if length > 0 {
            nalus.push(reader.read_bytes(length)?.freeze());
        }
    }
    Ok(nalus)
}

/// Fields decoded from an MPEG-4 `AudioSpecificConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AacConfig {
    pub object_type: u8,
    pub sample_rate: u32,
    pub channels: u8,
    /// The raw config bytes, advertised verbatim in the SDP.
    pub raw: Bytes,
}

impl AacConfig {
    pub fn parse(raw: Bytes) -> Result<Self, FlvDemuxerError> {
        if raw.len() < 2 {
            return Err(DemuxerErrorValue::InvalidSequenceHeader("audio specific config").into());
        }
        let object_type = raw[0] >> 3;
        let frequency_index = ((raw[0] & 0x07) << 1) | (raw[1] >> 7);
        let (sample_rate, channel_byte, channel_shift) = if frequency_index == 15 {
            // explicit 24-bit frequency follows the index
            if raw.len() < 5 {
                return Err(
                    DemuxerErrorValue::InvalidSequenceHeader("explicit sampling frequency").into(),
                );
            }
            let rate = (u32::from(raw[1] & 0x7F) << 17)
                | (u32::from(raw[2]) << 9)
                | (u32::from(raw[3]) << 1)
                | u32::from(raw[4] >> 7);
            (rate, raw[4], 3)
        } else {
            let rate = *AAC_SAMPLE_RATES
                .get(frequency_index as usize)
                .ok_or(DemuxerErrorValue::UnsupportedSamplingFrequency(frequency_index))?;
            (rate, raw[1], 3)
        };
        let channels = (channel_byte >> channel_shift) & 0x0F;

        Ok(Self {
            object_type,
            sample_rate,
            channels,
            raw,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AacFrame {
    pub timestamp: u32,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioTag {
    SequenceHeader(AacConfig),
    Frame(AacFrame),
    /// Carries the FLV sound format.
    Unsupported(u8),
}

#[derive(Default)]
pub struct FlvAudioTagDemuxer {
    config: Option<AacConfig>,
}

impl FlvAudioTagDemuxer {
    #[must_use]
    pub const fn new() -> Self {
        Self { config: None }
    }

    #[must_use]
    pub const fn config(&self) -> Option<&AacConfig> {
        self.config.as_ref()
    }

    pub fn demux(&mut self, timestamp: u32, data: Bytes) -> Result<AudioTag, FlvDemuxerError> {
        let Some(&first) = data.first() else {
            return Err(DemuxerErrorValue::EmptyTag.into());
        };
        let format = first >> 4;
        if format != sound_format::AAC {
            return Ok(AudioTag::Unsupported(format));
        }
        let Some(&packet_type) = data.get(1) else {
            return Err(DemuxerErrorValue::EmptyTag.into());
        };
        let payload = data.slice(2..);

        match packet_type {
            aac_packet_type::AAC_SEQHDR => {
                let config = AacConfig::parse(payload)?;
                self.config = Some(config.clone());
                Ok(AudioTag::SequenceHeader(config))
            }
            aac_packet_type::AAC_RAW => {
                if self.config.is_none() {
                    return Err(DemuxerErrorValue::MissingSequenceHeader.into());
                }
                Ok(AudioTag::Frame(AacFrame {
                    timestamp,
                    data: payload,
                }))
            }
            _ => Err(DemuxerErrorValue::InvalidSequenceHeader("aac packet type").into()),
        }
    }
}
