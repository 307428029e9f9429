//! The `utils` module holds the pieces every other module leans on: the
//! shared error type and logging setup.

pub mod error;
pub mod logging;

pub use error::{RelayError, Result};
