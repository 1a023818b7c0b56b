// rtspgate-api - HTTP/JSON control API
//
// Session CRUD and lifecycle commands, presets, system health, run history
// and the Prometheus scrape endpoint.

pub mod http;

pub use http::{create_router, serve, AppState};
