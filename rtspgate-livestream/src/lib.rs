// rtspgate-livestream - media plane of the RTMP to RTSP gateway
//
// Layout:
// - ingest/     - RTMP listener and the path router that hands publishers to pipelines
// - pipeline/   - one repackaging unit per running session (FLV demux -> transcoder -> egress)
// - egress/     - per-path fan-out hub and the RTSP listener serving it
// - supervisor  - resource polling, admission control and restart backoff
// - gateway     - single entry point wiring everything to a SessionRegistry

pub mod egress;
pub mod gateway;
pub mod ingest;
pub mod pipeline;
pub mod supervisor;

pub use egress::{EgressHub, RtspServer};
pub use gateway::{Gateway, GatewayHandle};
pub use ingest::{IngestRouter, RtmpServer};
pub use pipeline::{GatewayLauncher, Passthrough, Transcoder};
pub use supervisor::{ServiceBoard, Supervisor};
