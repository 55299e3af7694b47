//! Core types: errors, configuration, interruption.

pub mod config;
pub mod errors;
pub mod interrupt;
