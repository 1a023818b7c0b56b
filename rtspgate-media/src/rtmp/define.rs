pub const RTMP_VERSION: u8 = 3;
pub const RTMP_HANDSHAKE_SIZE: usize = 1536;

pub const INIT_CHUNK_SIZE: u32 = 128;
/// Largest chunk size a peer may announce (the high bit must be zero).
pub const MAX_CHUNK_SIZE: u32 = 0x7FFF_FFFF;
pub const WINDOW_ACKNOWLEDGEMENT_SIZE: u32 = 5_000_000;
pub const PEER_BANDWIDTH: u32 = 5_000_000;
/// Message stream id handed out by `createStream`.
pub const PUBLISH_STREAM_ID: u32 = 1;

pub mod msg_type_id {
    pub const SET_CHUNK_SIZE: u8 = 1;
    pub const ABORT: u8 = 2;
    pub const ACKNOWLEDGEMENT: u8 = 3;
    pub const USER_CONTROL_EVENT: u8 = 4;
    pub const WIN_ACKNOWLEDGEMENT_SIZE: u8 = 5;
    pub const SET_PEER_BANDWIDTH: u8 = 6;

    pub const AUDIO: u8 = 8;
    pub const VIDEO: u8 = 9;

    pub const DATA_AMF3: u8 = 15;
    pub const COMMAND_AMF3: u8 = 17;
    pub const DATA_AMF0: u8 = 18;
    pub const COMMAND_AMF0: u8 = 20;

    pub const AGGREGATE: u8 = 22;
}

pub mod csid_type {
    pub const PROTOCOL_USER_CONTROL: u32 = 2;
    pub const COMMAND_AMF0_AMF3: u32 = 3;
    pub const DATA_AMF0_AMF3: u32 = 5;
    pub const AUDIO: u32 = 4;
    pub const VIDEO: u32 = 6;
}

pub mod user_control_event {
    pub const STREAM_BEGIN: u16 = 0;
    pub const STREAM_EOF: u16 = 1;
    pub const PING_REQUEST: u16 = 6;
    pub const PING_RESPONSE: u16 = 7;
}

pub mod peer_bandwidth_limit_type {
    pub const HARD: u8 = 0;
    pub const SOFT: u8 = 1;
    pub const DYNAMIC: u8 = 2;
}
