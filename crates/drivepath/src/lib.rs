pub mod config;
pub mod error;
pub mod hooks;
pub mod log_sanitize;
pub mod remote;
pub mod resolver;
pub mod transfer;

pub use error::{Error, Result};
