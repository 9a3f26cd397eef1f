//! Boolean predicates over a matrix combination.
//!
//! Steps carry an optional predicate that is evaluated against the cell's
//! assignment before anything runs. Predicates are plain data so they can be
//! written in a descriptor:
//!
//! ```json
//! {"all": [
//!     {"eq": {"key": "torch", "value": "1.5.0+cu101"}},
//!     {"eq": {"key": "python-version", "value": "3.7"}}
//! ]}
//! ```

use crate::error::MatrixError;
use crate::matrix::Assignment;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A key/value comparison operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparison {
    pub key: String,
    pub value: String,
}

impl Comparison {
    fn lookup<'a>(&self, assignment: &'a Assignment) -> Result<&'a str, MatrixError> {
        assignment
            .get(&self.key)
            .ok_or_else(|| MatrixError::UnknownKey(self.key.clone()))
    }

    fn versions(&self, assignment: &Assignment) -> Result<(Version, Version), MatrixError> {
        let actual = Version::parse(self.lookup(assignment)?)?;
        let bound = Version::parse(&self.value)?;
        Ok((actual, bound))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Exact string equality.
    Eq(Comparison),
    Ne(Comparison),
    /// Release-order comparison; the local tag is ignored.
    VersionLt(Comparison),
    VersionGe(Comparison),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Predicate::Eq(Comparison {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn version_lt(key: impl Into<String>, value: impl Into<String>) -> Self {
        Predicate::VersionLt(Comparison {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn version_ge(key: impl Into<String>, value: impl Into<String>) -> Self {
        Predicate::VersionGe(Comparison {
            key: key.into(),
            value: value.into(),
        })
    }

    /// Evaluate against a combination. Unknown keys are errors, not `false`.
    pub fn evaluate(&self, assignment: &Assignment) -> Result<bool, MatrixError> {
        match self {
            Predicate::Eq(cmp) => Ok(cmp.lookup(assignment)? == cmp.value),
            Predicate::Ne(cmp) => Ok(cmp.lookup(assignment)? != cmp.value),
            Predicate::VersionLt(cmp) => {
                let (actual, bound) = cmp.versions(assignment)?;
                Ok(actual.is_older_than(&bound))
            }
            Predicate::VersionGe(cmp) => {
                let (actual, bound) = cmp.versions(assignment)?;
                Ok(!actual.is_older_than(&bound))
            }
            Predicate::All(preds) => {
                for pred in preds {
                    if !pred.evaluate(assignment)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Any(preds) => {
                for pred in preds {
                    if pred.evaluate(assignment)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Not(pred) => Ok(!pred.evaluate(assignment)?),
        }
    }

    /// Every matrix key the predicate reads.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Eq(cmp)
            | Predicate::Ne(cmp)
            | Predicate::VersionLt(cmp)
            | Predicate::VersionGe(cmp) => {
                if !out.contains(&cmp.key.as_str()) {
                    out.push(&cmp.key);
                }
            }
            Predicate::All(preds) | Predicate::Any(preds) => {
                for pred in preds {
                    pred.collect_keys(out);
                }
            }
            Predicate::Not(pred) => pred.collect_keys(out),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, preds: &[Predicate], op: &str) -> fmt::Result {
            f.write_str("(")?;
            for (i, pred) in preds.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", op)?;
                }
                write!(f, "{}", pred)?;
            }
            f.write_str(")")
        }

        match self {
            Predicate::Eq(c) => write!(f, "matrix.{} == '{}'", c.key, c.value),
            Predicate::Ne(c) => write!(f, "matrix.{} != '{}'", c.key, c.value),
            Predicate::VersionLt(c) => write!(f, "matrix.{} < {}", c.key, c.value),
            Predicate::VersionGe(c) => write!(f, "matrix.{} >= {}", c.key, c.value),
            Predicate::All(preds) => join(f, preds, "&&"),
            Predicate::Any(preds) => join(f, preds, "||"),
            Predicate::Not(pred) => write!(f, "!({})", pred),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(python: &str, torch: &str, torchvision: &str) -> Assignment {
        let mut a = Assignment::new();
        a.insert("python-version", python);
        a.insert("torch", torch);
        a.insert("torchvision", torchvision);
        a
    }

    fn upload_predicate() -> Predicate {
        Predicate::All(vec![
            Predicate::eq("torch", "1.5.0+cu101"),
            Predicate::eq("python-version", "3.7"),
        ])
    }

    #[test]
    fn test_upload_predicate_selects_designated_cell() {
        let pred = upload_predicate();
        assert!(pred.evaluate(&cell("3.7", "1.5.0+cu101", "0.6.0+cu101")).unwrap());
        assert!(!pred.evaluate(&cell("3.6", "1.5.0+cu101", "0.6.0+cu101")).unwrap());
        assert!(!pred.evaluate(&cell("3.7", "1.6.0+cu101", "0.7.0+cu101")).unwrap());
    }

    #[test]
    fn test_pillow_gate_on_companion_version() {
        let pred = Predicate::version_lt("torchvision", "0.5");
        assert!(!pred.evaluate(&cell("3.7", "1.5.0+cu101", "0.6.0+cu101")).unwrap());
        assert!(pred.evaluate(&cell("3.7", "1.3.0", "0.4.2")).unwrap());
    }

    #[test]
    fn test_unknown_key_is_an_error() {
        let pred = Predicate::eq("mmcv", "1.3.0");
        assert_eq!(
            pred.evaluate(&cell("3.7", "1.5.0", "0.6.0")),
            Err(MatrixError::UnknownKey("mmcv".into()))
        );
    }

    #[test]
    fn test_not_and_any() {
        let pred = Predicate::Not(Box::new(Predicate::Any(vec![
            Predicate::eq("python-version", "3.6"),
            Predicate::version_ge("torch", "1.8"),
        ])));
        assert!(pred.evaluate(&cell("3.7", "1.5.0+cu101", "0.6.0")).unwrap());
        assert!(!pred.evaluate(&cell("3.7", "1.8.0+cu101", "0.9.0")).unwrap());
    }

    #[test]
    fn test_deserialize_nested_predicate() {
        let json = r#"{"all": [
            {"eq": {"key": "torch", "value": "1.5.0+cu101"}},
            {"eq": {"key": "python-version", "value": "3.7"}}
        ]}"#;
        let pred: Predicate = serde_json::from_str(json).unwrap();
        assert_eq!(pred, upload_predicate());
        assert_eq!(pred.keys(), vec!["torch", "python-version"]);
        assert_eq!(
            pred.to_string(),
            "(matrix.torch == '1.5.0+cu101' && matrix.python-version == '3.7')"
        );
    }
}
