//! detci Matrix Crate
//!
//! Configuration records for matrix-driven verification pipelines.
//! This crate is execution-agnostic: it expands job matrices into cells,
//! orders dependency versions and evaluates step predicates, but never runs
//! anything.

pub mod cell;
pub mod error;
pub mod matrix;
pub mod predicate;
pub mod toolkit;
pub mod version;

pub use cell::{CellKeys, MatrixCell};
pub use error::MatrixError;
pub use matrix::{Assignment, Axis, MatrixSpec, MatrixValue};
pub use predicate::Predicate;
pub use toolkit::ToolkitVersion;
pub use version::Version;
