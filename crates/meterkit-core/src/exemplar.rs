//! Exemplars: small key/value sets attached to one observation.
//!
//! Keys follow label-name rules and must be unique; the combined character
//! length of all keys and values is capped at [`MAX_EXEMPLAR_RUNES`].

use std::time::SystemTime;

use crate::error::{MeterError, Result};
use crate::labels::{validate_label_name, LabelSet};

/// Upper bound on the summed length (in chars) of all exemplar keys and values.
pub const MAX_EXEMPLAR_RUNES: usize = 128;

#[derive(Debug, Clone)]
pub struct Exemplar {
    labels: LabelSet,
    value: f64,
    timestamp: Option<SystemTime>,
}

impl Exemplar {
    /// Validate and build an exemplar from key/value pairs.
    pub fn new<K, V>(pairs: &[(K, V)]) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut runes = 0usize;
        for (i, (key, value)) in pairs.iter().enumerate() {
            let key = key.as_ref();
            validate_label_name(key).map_err(|e| MeterError::InvalidExemplar(e.to_string()))?;
            if pairs[..i].iter().any(|(k, _)| k.as_ref() == key) {
                return Err(MeterError::InvalidExemplar(format!("duplicate key {key:?}")));
            }
            runes += key.chars().count() + value.as_ref().chars().count();
        }
        if runes > MAX_EXEMPLAR_RUNES {
            return Err(MeterError::InvalidExemplar(format!(
                "{runes} characters exceeds the limit of {MAX_EXEMPLAR_RUNES}"
            )));
        }
        Ok(Self {
            labels: LabelSet::from_pairs(pairs)?,
            value: 0.0,
            timestamp: None,
        })
    }

    /// Copy stamped with the observed value and the current wall-clock time.
    pub fn observed(&self, value: f64) -> Self {
        Self {
            labels: self.labels.clone(),
            value,
            timestamp: Some(SystemTime::now()),
        }
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_valid_exemplar() {
        let ex = Exemplar::new(&[("trace_id", "abc123"), ("span_id", "def")]).unwrap();
        assert_eq!(ex.labels().get("trace_id"), Some("abc123"));
        assert!(ex.timestamp().is_none());

        let stamped = ex.observed(4.5);
        assert_eq!(stamped.value(), 4.5);
        assert!(stamped.timestamp().is_some());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = Exemplar::new(&[("trace_id", "a"), ("trace_id", "b")]).unwrap_err();
        assert!(matches!(err, MeterError::InvalidExemplar(_)));
    }

    #[test]
    fn test_oversized_rejected() {
        let long = "x".repeat(MAX_EXEMPLAR_RUNES);
        let err = Exemplar::new(&[("trace_id", long.as_str())]).unwrap_err();
        assert!(matches!(err, MeterError::InvalidExemplar(_)));

        let fits = "x".repeat(MAX_EXEMPLAR_RUNES - "trace_id".len());
        assert!(Exemplar::new(&[("trace_id", fits.as_str())]).is_ok());
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(Exemplar::new(&[("trace-id", "a")]).is_err());
    }
}
