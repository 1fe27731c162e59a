//! Common infrastructure shared by the ephca crates
//!
//! This crate provides:
//! - `env_logger` bootstrap for binaries and tests
//! - Fingerprinting so key material can be referenced in logs without exposure
//! - Security event audit logging

pub mod audit;
pub mod logging;

pub use audit::{log_security_event, SecurityEvent};
pub use logging::LoggingTransformer;
