//! Utility types and functions.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - Math type re-exports from glam and Monte Carlo helpers

mod error;
pub mod math;

pub use error::*;
pub use math::*;
