//! Typed view over an expanded matrix combination.

use crate::error::MatrixError;
use crate::matrix::Assignment;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which matrix keys carry the cell tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellKeys {
    pub runtime: String,
    pub numeric: String,
    pub companion: String,
    pub arch: String,
}

impl Default for CellKeys {
    fn default() -> Self {
        Self {
            runtime: "python-version".to_string(),
            numeric: "torch".to_string(),
            companion: "torchvision".to_string(),
            arch: "cuda_arch".to_string(),
        }
    }
}

/// One build configuration: runtime, compute library, companion library and
/// target accelerator architecture.
///
/// Identity is the tuple itself; cells are never mutated after expansion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatrixCell {
    pub runtime: Version,
    pub numeric: Version,
    pub companion: Version,
    pub arch: String,
}

impl MatrixCell {
    /// Read the cell tuple out of an assignment.
    ///
    /// Fails with [`MatrixError::MissingKey`] when the include table left the
    /// companion version (or any other tuple member) undefined.
    pub fn from_assignment(assignment: &Assignment, keys: &CellKeys) -> Result<Self, MatrixError> {
        let lookup = |key: &str| {
            assignment.get(key).ok_or_else(|| MatrixError::MissingKey {
                cell: assignment.to_string(),
                key: key.to_string(),
            })
        };

        Ok(Self {
            runtime: Version::parse(lookup(keys.runtime.as_str())?)?,
            numeric: Version::parse(lookup(keys.numeric.as_str())?)?,
            companion: Version::parse(lookup(keys.companion.as_str())?)?,
            arch: lookup(keys.arch.as_str())?.to_string(),
        })
    }
}

impl fmt::Display for MatrixCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "py{} torch{} tv{} arch{}",
            self.runtime, self.numeric, self.companion, self.arch
        )
    }
}
