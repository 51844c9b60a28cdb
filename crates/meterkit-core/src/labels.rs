//! Label sets and name validation.
//!
//! A `LabelSet` pairs a collector's label names with one child's values. Names
//! are shared (`Arc<[String]>`) between every child of a collector; values are
//! owned per child. Equality and hashing look at values only, because two sets
//! are only ever compared within the same collector. The hash is computed once
//! at construction so map lookups never re-hash the strings.

use std::collections::hash_map::DefaultHasher;
use std::fmt::Write;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{MeterError, Result};

/// Immutable name/value pairs identifying one time series.
#[derive(Clone)]
pub struct LabelSet {
    names: Arc<[String]>,
    values: Arc<[String]>,
    hash: u64,
}

impl LabelSet {
    /// Build a set from parallel name and value lists.
    pub fn new(names: Arc<[String]>, values: Vec<String>) -> Result<Self> {
        if names.len() != values.len() {
            return Err(MeterError::LabelCountMismatch {
                expected: names.len(),
                actual: values.len(),
            });
        }
        let hash = hash_values(&values);
        Ok(Self {
            names,
            values: values.into(),
            hash,
        })
    }

    /// Build a set from borrowed values, cloning them once.
    pub fn from_values(names: &Arc<[String]>, values: &[&str]) -> Result<Self> {
        Self::new(
            Arc::clone(names),
            values.iter().map(|v| (*v).to_string()).collect(),
        )
    }

    /// Build a set from `(name, value)` pairs.
    pub fn from_pairs<K, V>(pairs: &[(K, V)]) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let names: Vec<String> = pairs.iter().map(|(k, _)| k.as_ref().to_string()).collect();
        let values: Vec<String> = pairs.iter().map(|(_, v)| v.as_ref().to_string()).collect();
        Self::new(names.into(), values)
    }

    pub fn empty() -> Self {
        Self {
            names: Arc::from(Vec::new()),
            values: Arc::from(Vec::new()),
            hash: hash_values(&[]),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i].as_str())
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names
            .iter()
            .zip(self.values.iter())
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Append `other` after `self`. Fails if both define the same name.
    pub fn concat(&self, other: &LabelSet) -> Result<LabelSet> {
        if other.is_empty() {
            return Ok(self.clone());
        }
        if self.is_empty() {
            return Ok(other.clone());
        }
        if let Some(dup) = other.names.iter().find(|n| self.contains_name(n)) {
            return Err(MeterError::LabelCollision(dup.clone()));
        }
        let names: Vec<String> = self.names.iter().chain(other.names.iter()).cloned().collect();
        let values: Vec<String> = self
            .values
            .iter()
            .chain(other.values.iter())
            .cloned()
            .collect();
        Self::new(names.into(), values)
    }

    /// Render as `a="1",b="2"` (no surrounding braces).
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_pair(&mut out, name, value);
        }
        out
    }
}

impl PartialEq for LabelSet {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.values == other.values
    }
}

impl Eq for LabelSet {}

impl Hash for LabelSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl std::fmt::Debug for LabelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.serialize())
    }
}

fn hash_values(values: &[String]) -> u64 {
    let mut hasher = DefaultHasher::new();
    values.hash(&mut hasher);
    hasher.finish()
}

/// Append `name="escaped value"` to `out`.
pub fn write_pair(out: &mut String, name: &str, value: &str) {
    let _ = write!(out, "{}=\"{}\"", name, escape_label_value(value));
}

/// Escape backslash, double quote and newline.
pub fn escape_label_value(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// `^[a-zA-Z_:][a-zA-Z0-9_:]*$`
fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

pub fn validate_metric_name(name: &str) -> Result<()> {
    if !is_valid_identifier(name) {
        return Err(MeterError::InvalidMetricName(name.to_string()));
    }
    Ok(())
}

pub fn validate_label_name(name: &str) -> Result<()> {
    if !is_valid_identifier(name) {
        return Err(MeterError::InvalidLabelName(name.to_string()));
    }
    if name.starts_with("__") {
        return Err(MeterError::ReservedLabelName(name.to_string()));
    }
    Ok(())
}

/// Validate a collector's label-name list: each name valid, none repeated,
/// none equal to `reserved`.
pub fn validate_label_names<S: AsRef<str>>(names: &[S], reserved: Option<&str>) -> Result<()> {
    for (i, name) in names.iter().enumerate() {
        let name = name.as_ref();
        validate_label_name(name)?;
        if reserved == Some(name) {
            return Err(MeterError::ReservedLabelName(name.to_string()));
        }
        if names[..i].iter().any(|n| n.as_ref() == name) {
            return Err(MeterError::LabelCollision(name.to_string()));
        }
    }
    Ok(())
}
