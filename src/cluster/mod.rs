//! Cluster-facing seams: consumed capability traits, the lifecycle driver
//! built on them, and the in-memory cluster used by the CLI and tests.

pub mod api;
pub mod driver;
pub mod sim;
