//! Accelerator toolkit version pair (`CUDA` / `CUDA_SHORT`).

use crate::error::MatrixError;

/// Full toolkit package version plus its short `major.minor` form.
///
/// `CUDA_SHORT` is always the first two components of `CUDA`:
/// `10.1.105-1` has short form `10.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolkitVersion {
    full: String,
    short: String,
}

impl ToolkitVersion {
    /// Derive the short form from a full package version.
    pub fn derive(full: &str) -> Result<Self, MatrixError> {
        let short = short_form(full)?;
        Ok(Self {
            full: full.to_string(),
            short,
        })
    }

    /// Accept an explicit pair, rejecting a short form that is not the prefix
    /// of the full version.
    pub fn new(full: &str, short: &str) -> Result<Self, MatrixError> {
        let expected = short_form(full)?;
        if expected != short {
            return Err(MatrixError::ToolkitMismatch {
                cuda: full.to_string(),
                short: short.to_string(),
                expected,
            });
        }
        Ok(Self {
            full: full.to_string(),
            short: expected,
        })
    }

    pub fn full(&self) -> &str {
        &self.full
    }

    pub fn short(&self) -> &str {
        &self.short
    }

    /// Short form with dashes, as used in apt package names (`10-1`).
    pub fn dashed(&self) -> String {
        self.short.replace('.', "-")
    }

    /// Install prefix of the versioned toolkit.
    pub fn home(&self) -> String {
        format!("/usr/local/cuda-{}", self.short)
    }
}

fn short_form(full: &str) -> Result<String, MatrixError> {
    let release = full.split('-').next().unwrap_or_default();
    let mut parts = release.split('.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor))
            if !major.is_empty()
                && !minor.is_empty()
                && major.chars().all(|c| c.is_ascii_digit())
                && minor.chars().all(|c| c.is_ascii_digit()) =>
        {
            Ok(format!("{}.{}", major, minor))
        }
        _ => Err(MatrixError::InvalidToolkit(full.to_string())),
    }
}
