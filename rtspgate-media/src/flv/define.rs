pub mod codec_id {
    pub const H264: u8 = 7;
    pub const HEVC: u8 = 12;
}

pub mod frame_type {
    pub const KEY_FRAME: u8 = 1;
    pub const INTER_FRAME: u8 = 2;
}

pub mod avc_packet_type {
    pub const AVC_SEQHDR: u8 = 0;
    pub const AVC_NALU: u8 = 1;
    pub const AVC_EOS: u8 = 2;
}

pub mod sound_format {
    pub const MP3: u8 = 2;
    pub const AAC: u8 = 10;
}

pub mod aac_packet_type {
    pub const AAC_SEQHDR: u8 = 0;
    pub const AAC_RAW: u8 = 1;
}

/// MPEG-4 sampling frequency table indexed by `samplingFrequencyIndex`.
pub const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];
