//! # lipsync-core
//!
//! Core crate for the lipsync service. Contains the configuration schemas,
//! the unified error system, and the result alias used by every other crate.
//!
//! This crate has **no** internal dependencies on other lipsync crates.

pub mod config;
pub mod error;
pub mod result;

pub use error::AppError;
pub use result::AppResult;
