#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod ipc;
pub mod manager;
pub mod models;
pub mod orchestrator;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
