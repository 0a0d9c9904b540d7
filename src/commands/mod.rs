//! Command implementations for the CLI
//!
//! - start: run the demo host with the agent attached
//! - config: configuration display and validation

pub mod config;
pub mod start;
