//! Core domain + application logic for the bot configuration dashboard.
//!
//! This crate is framework-agnostic. Discord, the HTTP server and the HTTP
//! client live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod errors;
pub mod guild_config;
pub mod logging;
pub mod ports;
pub mod security;
pub mod stats;
pub mod store;
pub mod sync;
pub mod utils;

pub use errors::{Error, Result};
