//! Shared types for Spendbook

pub mod error;

pub use error::{ConnectionError, Result, SpendbookError};
