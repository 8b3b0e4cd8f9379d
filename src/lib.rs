//! streval library crate
//!
//! Repair of generated Structured Text functions through a bounded
//! validate/fix loop, and similarity scoring of the results against ground
//! truth. The `streval` binary is a thin CLI over [`pipeline`].

pub mod aggregate;
pub mod artifact;
pub mod config;
pub mod error;
pub mod lookup;
pub mod pipeline;
pub mod provide;
pub mod repair;
pub mod report;
pub mod score;
pub mod util;

pub use error::{ErrorKind, EvalError, EvalResult};
