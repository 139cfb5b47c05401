//! Infrastructure layer for cross-cutting concerns.
//!
//! Provides foundational infrastructure including:
//! - Configuration management and validation
//! - Error handling and result types
//! - Progress reporting and user feedback
//! - Single-flight initialization and scoped temporary directories

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod progress;
pub mod single_flight;
pub mod temp;
