//! Steadfast CLI
//!
//! Command-line interface for validating and running interaction scenarios
//! against simulated sites.

pub mod commands;
pub mod output;
