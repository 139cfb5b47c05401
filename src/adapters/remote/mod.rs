//! Remote signing service adapter.
//!
//! Client and (optionally) server side of a small JSON operation protocol
//! used to reach an HSM front-end or a cloud signing service, where the
//! private key never leaves the remote side.

pub mod client;
pub mod credential;
pub mod protocol;

#[cfg(feature = "proxy-server")]
pub mod server;
