pub mod amf0;
pub mod chunk;
pub mod define;
pub mod handshake;
pub mod messages;
pub mod session;
