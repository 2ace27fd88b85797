//! # Opine Common Library
//!
//! Shared code for the Opine backend services including:
//! - Database initialization and models (responses, surveys, interviewers)
//! - Error types
//! - Configuration and data-directory resolution
//! - Timestamp utilities

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
