//! RTMP ingest: the listener and the router that hands each accepted
//! publisher to the pipeline owning its path.

mod router;
mod server;

pub use router::{IngestRegistration, IngestRouter, PublisherFeed};
pub use server::RtmpServer;
