//! Adapter layer modules for external system integration.
//!
//! Provides adapters for:
//! - Credential sources (local key stores, remote HSMs, cloud signing)
//! - The remote signing operation protocol (client and server)
//! - HTTP timestamp authority communication

pub mod credential;
pub mod local_store;
pub mod remote;
pub mod timestamp_http_client;
