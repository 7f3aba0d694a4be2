//! Core types and constants for the fusion system

pub mod types;
pub mod constants;

pub use types::*;
pub use constants::*;
