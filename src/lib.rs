//! Connectivity-driven firewall kill switch.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod netsh;
pub mod platform;
pub mod reconciler;
pub mod state;
pub mod status;

pub use error::{GuardError, Result};
