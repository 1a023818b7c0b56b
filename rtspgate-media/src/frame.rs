use bytes::Bytes;

/// One RTMP media message as received from a publisher.
///
/// Payloads are FLV tag bodies (the tag header is not included); timestamps
/// are RTMP milliseconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaFrame {
    Video { timestamp: u32, data: Bytes },
    Audio { timestamp: u32, data: Bytes },
    MetaData { timestamp: u32, data: Bytes },
}

impl MediaFrame {
    #[must_use]
    pub const fn timestamp(&self) -> u32 {
        match self {
            Self::Video { timestamp, .. }
            | Self::Audio { timestamp, .. }
            | Self::MetaData { timestamp, .. } => *timestamp,
        }
    }

    #[must_use]
    pub fn data(&self) -> &Bytes {
        match self {
            Self::Video { data, .. } | Self::Audio { data, .. } | Self::MetaData { data, .. } => {
                data
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// FLV frame type 1 in the high nibble of the first video byte.
    #[must_use]
    pub fn is_key_frame(&self) -> bool {
        match self {
            Self::Video { data, .. } => data.first().is_some_and(|b| b >> 4 == 1),
            _ => false,
        }
    }
}

/// A repackaged access unit ready for RTP packetization.
///
/// Timestamps are in the track's RTP clock (90 kHz for video, the sample
/// rate for audio).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EgressFrame {
    Video {
        timestamp: u32,
        key_frame: bool,
        nalus: Vec<Bytes>,
    },
    Audio {
        timestamp: u32,
        data: Bytes,
    },
}

impl EgressFrame {
    #[must_use]
    pub const fn is_key_frame(&self) -> bool {
        matches!(self, Self::Video { key_frame: true, .. })
    }

    #[must_use]
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Video { nalus, .. } => nalus.iter().map(Bytes::len).sum(),
            Self::Audio { data, .. } => data.len(),
        }
    }
}
