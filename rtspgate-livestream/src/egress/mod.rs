//! RTSP egress: the per-path fan-out hub and the listener serving it.

mod connection;
mod hub;
mod server;

pub use connection::RtspConnection;
pub use hub::{EgressHub, EgressPath, EgressPublisher, SubscribeError, Subscription};
pub use server::RtspServer;
