//! HTTP API Module
//!
//! Serves the client operations and the peer-to-peer surface that
//! `RemoteNodeProxy` talks to.

mod http;

pub use http::{AppState, HttpServer};
