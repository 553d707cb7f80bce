//! luau-bridge CLI library
//!
//! This module exports the internal components of the CLI for testing purposes.

pub mod config;
pub mod host_api;
pub mod runner;
