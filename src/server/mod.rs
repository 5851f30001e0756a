//! HTTP server for Spendbook

mod http;

pub use http::{run, AppState};
