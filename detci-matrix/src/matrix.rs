//! Matrix expansion: axes, `include` and `exclude` tables.

use crate::error::MatrixError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// A scalar matrix value as written in a descriptor.
///
/// Descriptors may write `3.7` or `"3.7"`; both end up as the string `3.7`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatrixValue {
    Str(String),
    Num(serde_json::Number),
    Bool(bool),
}

impl fmt::Display for MatrixValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixValue::Str(s) => f.write_str(s),
            MatrixValue::Num(n) => write!(f, "{}", n),
            MatrixValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for MatrixValue {
    fn from(value: &str) -> Self {
        MatrixValue::Str(value.to_string())
    }
}

/// One matrix dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub key: String,
    pub values: Vec<MatrixValue>,
}

impl Axis {
    pub fn new(key: impl Into<String>, values: &[&str]) -> Self {
        Self {
            key: key.into(),
            values: values.iter().map(|v| MatrixValue::from(*v)).collect(),
        }
    }
}

/// Ordered key/value assignment for a single matrix combination.
///
/// Keys keep insertion order: axis keys first (in axis order), then keys
/// contributed by `include` entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment(Vec<(String, String)>);

impl Assignment {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// Insert or overwrite a key, keeping its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn from_entry(entry: &[(String, MatrixValue)]) -> Self {
        let mut assignment = Self::new();
        for (key, value) in entry {
            assignment.insert(key.clone(), value.to_string());
        }
        assignment
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

/// Partial assignment used by `include` and `exclude` tables.
pub type MatrixEntry = Vec<(String, MatrixValue)>;

mod entry_serde {
    use super::{MatrixEntry, MatrixValue};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(entries: &[MatrixEntry], s: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;

        struct Entry<'a>(&'a MatrixEntry);

        impl serde::Serialize for Entry<'_> {
            fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                let mut map = s.serialize_map(Some(self.0.len()))?;
                for (k, v) in self.0 {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }

        let mut seq = s.serialize_seq(Some(entries.len()))?;
        for entry in entries {
            seq.serialize_element(&Entry(entry))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<MatrixEntry>, D::Error> {
        let raw: Vec<serde_json::Map<String, serde_json::Value>> = Vec::deserialize(d)?;
        raw.into_iter()
            .map(|map| {
                map.into_iter()
                    .map(|(k, v)| {
                        MatrixValue::deserialize(v)
                            .map(|value| (k, value))
                            .map_err(serde::de::Error::custom)
                    })
                    .collect()
            })
            .collect()
    }
}

/// Declarative job matrix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatrixSpec {
    pub axes: Vec<Axis>,
    #[serde(default, with = "entry_serde", skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<MatrixEntry>,
    #[serde(default, with = "entry_serde", skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<MatrixEntry>,
}

impl MatrixSpec {
    pub fn new(axes: Vec<Axis>) -> Self {
        Self {
            axes,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    pub fn with_include(mut self, entry: &[(&str, &str)]) -> Self {
        self.include.push(
            entry
                .iter()
                .map(|(k, v)| (k.to_string(), MatrixValue::from(*v)))
                .collect(),
        );
        self
    }

    pub fn with_exclude(mut self, entry: &[(&str, &str)]) -> Self {
        self.exclude.push(
            entry
                .iter()
                .map(|(k, v)| (k.to_string(), MatrixValue::from(*v)))
                .collect(),
        );
        self
    }

    /// Keys of the original axes, in declaration order.
    pub fn axis_keys(&self) -> impl Iterator<Item = &str> {
        self.axes.iter().map(|a| a.key.as_str())
    }

    fn is_axis_key(&self, key: &str) -> bool {
        self.axes.iter().any(|a| a.key == key)
    }

    /// Expand the matrix into its combinations.
    ///
    /// The first axis is outermost. Exclusions are applied to the cartesian
    /// product before includes. An include entry is merged into every
    /// combination whose axis values it does not contradict; an entry that
    /// merges nowhere becomes its own combination, which requires it to set
    /// every axis.
    #[tracing::instrument(skip_all, fields(axes = self.axes.len()))]
    pub fn expand(&self) -> Result<Vec<Assignment>, MatrixError> {
        if self.axes.is_empty() {
            return Err(MatrixError::NoAxes);
        }

        for (i, axis) in self.axes.iter().enumerate() {
            if axis.values.is_empty() {
                return Err(MatrixError::EmptyAxis(axis.key.clone()));
            }
            if self.axes[..i].iter().any(|a| a.key == axis.key) {
                return Err(MatrixError::DuplicateAxis(axis.key.clone()));
            }
        }

        let mut combos = vec![Assignment::new()];
        for axis in &self.axes {
            let mut next = Vec::with_capacity(combos.len() * axis.values.len());
            for combo in &combos {
                for value in &axis.values {
                    let mut extended = combo.clone();
                    extended.insert(axis.key.clone(), value.to_string());
                    next.push(extended);
                }
            }
            combos = next;
        }
        let product_len = combos.len();

        combos.retain(|combo| !self.exclude.iter().any(|entry| matches_all(combo, entry)));
        debug!(
            "Excluded {} of {} combinations",
            product_len - combos.len(),
            product_len
        );

        if combos.is_empty() && self.include.is_empty() {
            return Err(MatrixError::EmptyMatrix);
        }

        let original = combos.len();
        for (index, entry) in self.include.iter().enumerate() {
            let mut merged = false;
            for combo in combos.iter_mut().take(original) {
                let compatible = entry
                    .iter()
                    .filter(|(key, _)| self.is_axis_key(key))
                    .all(|(key, value)| combo.get(key) == Some(value.to_string().as_str()));
                if compatible {
                    for (key, value) in entry.iter().filter(|(key, _)| !self.is_axis_key(key)) {
                        combo.insert(key.clone(), value.to_string());
                    }
                    merged = true;
                }
            }

            if !merged {
                let standalone = Assignment::from_entry(entry);
                if !self.axis_keys().all(|key| standalone.contains_key(key)) {
                    return Err(MatrixError::UnmatchedInclude {
                        index,
                        entry: standalone.to_string(),
                    });
                }
                debug!("Include entry {} added as its own combination", index);
                combos.push(standalone);
            }
        }

        if combos.is_empty() {
            return Err(MatrixError::EmptyMatrix);
        }

        info!("Expanded matrix into {} combinations", combos.len());
        Ok(combos)
    }
}

fn matches_all(combo: &Assignment, entry: &[(String, MatrixValue)]) -> bool {
    entry
        .iter()
        .all(|(key, value)| combo.get(key) == Some(value.to_string().as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torch_matrix() -> MatrixSpec {
        MatrixSpec::new(vec![
            Axis::new("python-version", &["3.6", "3.7"]),
            Axis::new("torch", &["1.5.0+cu101", "1.6.0+cu101"]),
        ])
        .with_include(&[("torch", "1.5.0+cu101"), ("torchvision", "0.6.0+cu101")])
        .with_include(&[("torch", "1.6.0+cu101"), ("torchvision", "0.7.0+cu101")])
        .with_include(&[("cuda_arch", "7.0")])
    }

    #[test]
    fn test_expand_first_axis_outermost() {
        let cells = torch_matrix().expand().unwrap();
        assert_eq!(cells.len(), 4);
        assert_eq!(cells[0].get("python-version"), Some("3.6"));
        assert_eq!(cells[0].get("torch"), Some("1.5.0+cu101"));
        assert_eq!(cells[1].get("python-version"), Some("3.6"));
        assert_eq!(cells[1].get("torch"), Some("1.6.0+cu101"));
        assert_eq!(cells[3].get("python-version"), Some("3.7"));
    }

    #[test]
    fn test_include_merges_by_axis_value() {
        let cells = torch_matrix().expand().unwrap();
        for cell in &cells {
            let expected = match cell.get("torch") {
                Some("1.5.0+cu101") => "0.6.0+cu101",
                _ => "0.7.0+cu101",
            };
            assert_eq!(cell.get("torchvision"), Some(expected));
            assert_eq!(cell.get("cuda_arch"), Some("7.0"));
        }
    }

    #[test]
    fn test_exclude_removes_combination() {
        let spec = torch_matrix().with_exclude(&[("python-version", "3.6"), ("torch", "1.6.0+cu101")]);
        let cells = spec.expand().unwrap();
        assert_eq!(cells.len(), 3);
        assert!(!cells.iter().any(|c| {
            c.get("python-version") == Some("3.6") && c.get("torch") == Some("1.6.0+cu101")
        }));
    }

    #[test]
    fn test_unmatched_partial_include_is_rejected() {
        let spec = torch_matrix().with_include(&[("torch", "1.9.0+cu101"), ("torchvision", "0.10.0")]);
        match spec.expand() {
            Err(MatrixError::UnmatchedInclude { index, .. }) => assert_eq!(index, 3),
            other => panic!("Expected UnmatchedInclude, got {:?}", other),
        }
    }

    #[test]
    fn test_unmatched_full_include_becomes_combination() {
        let spec = torch_matrix().with_include(&[
            ("python-version", "3.8"),
            ("torch", "1.8.0+cu101"),
            ("torchvision", "0.9.0+cu101"),
        ]);
        let cells = spec.expand().unwrap();
        assert_eq!(cells.len(), 5);
        assert_eq!(cells[4].get("python-version"), Some("3.8"));
        assert_eq!(cells[4].get("cuda_arch"), None);
    }

    #[test]
    fn test_numeric_values_are_stringified() {
        let spec: MatrixSpec =
            serde_json::from_str(r#"{"axes": [{"key": "python-version", "values": [3.6, "3.7"]}]}"#)
                .unwrap();
        let cells = spec.expand().unwrap();
        assert_eq!(cells[0].get("python-version"), Some("3.6"));
        assert_eq!(cells[1].get("python-version"), Some("3.7"));
    }

    #[test]
    fn test_empty_and_duplicate_axes() {
        let empty = MatrixSpec::new(vec![Axis::new("torch", &[])]);
        assert_eq!(empty.expand(), Err(MatrixError::EmptyAxis("torch".into())));

        let dup = MatrixSpec::new(vec![Axis::new("torch", &["1"]), Axis::new("torch", &["2"])]);
        assert_eq!(dup.expand(), Err(MatrixError::DuplicateAxis("torch".into())));

        assert_eq!(MatrixSpec::default().expand(), Err(MatrixError::NoAxes));
    }

    #[test]
    fn test_include_table_roundtrips_through_json() {
        let spec = torch_matrix();
        let json = serde_json::to_string(&spec).unwrap();
        let back: MatrixSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.expand().unwrap(), spec.expand().unwrap());
    }
}
