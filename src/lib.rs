//! Spendbook - expense tracking backend
//!
//! Users keep budget *fields* (a received amount and a running balance) and
//! log expenses against them. Users can also form organizations and ask to
//! join one through owner-approved requests.
//!
//! ## Store connection
//!
//! Every resource route goes through one lazily established MongoDB
//! connection held by [`db::ConnectionHandle`]. The process starts without
//! touching the store; the first request connects, concurrent requests share
//! that attempt, and a failed or broken connection is retried by the next
//! request instead of crashing the server.

pub mod auth;
pub mod config;
pub mod db;
pub mod routes;
pub mod server;
pub mod types;

pub use config::{Args, ConnectionConfig};
pub use db::{ConnectionHandle, Connector, HandleState};
pub use server::{run, AppState};
pub use types::{ConnectionError, Result, SpendbookError};
