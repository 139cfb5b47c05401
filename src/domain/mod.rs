//! Domain types: certificates, digests, signing requests, timestamp protocol
//! structures, file kinds, jobs and batch outcomes.

pub mod constants;
pub mod crypto;
pub mod format;
pub mod job;
pub mod manifest;
pub mod outcome;
pub mod tsp;
pub mod types;
