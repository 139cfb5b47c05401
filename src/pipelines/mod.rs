//! Workflow pipelines orchestrating stateless services.

pub mod batch;

pub use batch::{read_file_list, BatchRequest, SigningOrchestrator};
