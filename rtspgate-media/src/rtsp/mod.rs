//! RTSP 1.0 message codec, Transport negotiation and SDP generation.

pub mod errors;
pub mod message;
pub mod sdp;
pub mod transport;

pub const RTSP_VERSION: &str = "RTSP/1.0";

pub mod status {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const METHOD_NOT_ALLOWED: u16 = 405;
    pub const NOT_ENOUGH_BANDWIDTH: u16 = 453;
    pub const SESSION_NOT_FOUND: u16 = 454;
    pub const METHOD_NOT_VALID_IN_THIS_STATE: u16 = 455;
    pub const UNSUPPORTED_TRANSPORT: u16 = 461;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const NOT_IMPLEMENTED: u16 = 501;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
    pub const VERSION_NOT_SUPPORTED: u16 = 505;
}

#[must_use]
pub const fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        453 => "Not Enough Bandwidth",
        454 => "Session Not Found",
        455 => "Method Not Valid in This State",
        461 => "Unsupported Transport",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        505 => "RTSP Version Not Supported",
        _ => "Unknown",
    }
}
