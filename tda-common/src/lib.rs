//! # Destination Audit Common Library
//!
//! Shared code for the destination audit services:
//! - Error types
//! - Root folder resolution and TOML configuration loading
//! - Audit event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
