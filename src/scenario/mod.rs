//! The stress scenario: topology planning, indexing, cleanup verification,
//! chaos injection and the orchestrator tying them together.

pub mod chaos;
pub mod cleanup;
pub mod indexing;
pub mod orchestrator;
pub mod schedule;
pub mod topology;
