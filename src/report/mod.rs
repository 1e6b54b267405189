//! Permit document rendering.

pub mod generator;

pub use generator::write_permit;
