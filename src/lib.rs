//! LAN discovery engine: expands address ranges, probes TCP ports and
//! fingerprints the self-hosted services answering on them.
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod hostname;
pub mod knowledge;
pub mod orchestrator;
pub mod ports;
pub mod range;
pub mod rules;
pub mod scanner;
pub mod server;
pub mod services;
pub mod types;

pub use error::{Result, ScanError};
pub use orchestrator::ScanOrchestrator;
