//! Configuration module
//!
//! Loads server settings from an optional TOML file.

mod file;

pub use file::*;
