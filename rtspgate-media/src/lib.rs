//! Wire formats spoken by the gateway.
//!
//! RTMP (handshake, chunk stream, AMF0 commands) on the ingest side, FLV tag
//! demuxing in the middle, RTP packetization plus RTSP/SDP on the egress side.

pub mod bytesio;
pub mod cache;
pub mod flv;
pub mod frame;
pub mod rtmp;
pub mod rtp;
pub mod rtsp;

pub use frame::{EgressFrame, MediaFrame};
