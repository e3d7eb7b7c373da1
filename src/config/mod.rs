//! Configuration module for the grammar session binary.
//!
//! Provides CLI argument parsing and configuration management.

#[allow(clippy::module_inception)]
mod config;

pub use config::{AppConfig, InputSource, Provider};
