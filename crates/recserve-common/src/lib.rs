//! Recserve Common - Shared types and utilities
//!
//! This crate provides the domain types, error definitions, configuration
//! structures and well-known cache keys used across all recserve components.

pub mod config;
pub mod dataset;
pub mod error;
pub mod keys;
pub mod types;

pub use config::Config;
pub use dataset::*;
pub use error::{Error, Result, TargetFailure};
pub use types::*;
