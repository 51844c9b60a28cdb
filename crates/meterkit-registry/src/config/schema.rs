use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use meterkit_core::error::{MeterError, Result};
use meterkit_core::labels::{validate_label_name, LabelSet};
use meterkit_core::quantile::window::{
    DEFAULT_AGE_BUCKETS, DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_AGE,
};

use crate::metrics::{HistogramLayout, DEFAULT_BUCKETS};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeterConfig {
    pub version: u32,

    /// Registry-level labels attached to every series.
    #[serde(default)]
    pub static_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub suppress_initial_value: bool,

    #[serde(default)]
    pub histogram: HistogramSection,

    #[serde(default)]
    pub summary: SummarySection,

    #[serde(default)]
    pub lifetime: LifetimeSection,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            version: 1,
            static_labels: BTreeMap::new(),
            suppress_initial_value: false,
            histogram: HistogramSection::default(),
            summary: SummarySection::default(),
            lifetime: LifetimeSection::default(),
        }
    }
}

impl MeterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(MeterError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        for name in self.static_labels.keys() {
            validate_label_name(name)
                .map_err(|e| MeterError::Config(format!("static_labels: {e}")))?;
        }
        self.histogram.validate()?;
        self.summary.validate()?;
        self.lifetime.validate()?;
        Ok(())
    }

    /// Static labels in name order.
    pub fn static_label_set(&self) -> Result<LabelSet> {
        let pairs: Vec<(&str, &str)> = self
            .static_labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        LabelSet::from_pairs(&pairs)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistogramSection {
    #[serde(default = "default_buckets")]
    pub buckets: Vec<f64>,
}

impl Default for HistogramSection {
    fn default() -> Self {
        Self {
            buckets: default_buckets(),
        }
    }
}

impl HistogramSection {
    pub fn validate(&self) -> Result<()> {
        self.layout()
            .map(|_| ())
            .map_err(|e| MeterError::Config(format!("histogram.buckets: {e}")))
    }

    pub fn layout(&self) -> Result<HistogramLayout> {
        HistogramLayout::new(self.buckets.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SummarySection {
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,

    #[serde(default = "default_age_buckets")]
    pub age_buckets: usize,

    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for SummarySection {
    fn default() -> Self {
        Self {
            max_age_ms: default_max_age_ms(),
            age_buckets: default_age_buckets(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

impl SummarySection {
    pub fn validate(&self) -> Result<()> {
        if self.max_age_ms == 0 {
            return Err(MeterError::Config("summary.max_age_ms must be positive".into()));
        }
        if !(1..=1024).contains(&self.age_buckets) {
            return Err(MeterError::Config(
                "summary.age_buckets must be between 1 and 1024".into(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(MeterError::Config(
                "summary.buffer_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LifetimeSection {
    #[serde(default = "default_expires_after_ms")]
    pub expires_after_ms: u64,
}

impl Default for LifetimeSection {
    fn default() -> Self {
        Self {
            expires_after_ms: default_expires_after_ms(),
        }
    }
}

impl LifetimeSection {
    pub fn validate(&self) -> Result<()> {
        if self.expires_after_ms == 0 {
            return Err(MeterError::Config(
                "lifetime.expires_after_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn expires_after(&self) -> Duration {
        Duration::from_millis(self.expires_after_ms)
    }
}

fn default_buckets() -> Vec<f64> {
    DEFAULT_BUCKETS.to_vec()
}
fn default_max_age_ms() -> u64 {
    DEFAULT_MAX_AGE.as_millis() as u64
}
fn default_age_buckets() -> usize {
    DEFAULT_AGE_BUCKETS
}
fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}
fn default_expires_after_ms() -> u64 {
    60_000
}
