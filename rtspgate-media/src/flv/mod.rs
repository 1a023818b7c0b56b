//! FLV tag body demuxing for the RTMP payloads we accept: AVC video and AAC
//! audio.
//!
//! ```text
//! video tag body: FrameType(4) CodecID(4) | AVCPacketType(8) CompositionTime(24) | payload
//! audio tag body: SoundFormat(4) SoundRate(2) SoundSize(1) SoundType(1) | AACPacketType(8) | payload
//! ```
//!
//! The AVC sequence header payload is an `AVCDecoderConfigurationRecord`;
//! NALU payloads are length-prefixed (AVCC). The AAC sequence header payload
//! is an `AudioSpecificConfig`.

pub mod define;
pub mod demuxer;
pub mod errors;
