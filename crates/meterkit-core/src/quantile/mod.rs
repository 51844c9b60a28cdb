//! Windowed quantile estimation for summaries.
//!
//! - [`stream`]: a targeted-quantile (CKMS) stream with bounded rank error per
//!   objective.
//! - [`window`]: a ring of streams plus hot/cold sample buffers that together
//!   report quantiles over a rolling `max_age` window.

pub mod stream;
pub mod window;

use crate::error::{MeterError, Result};

pub use stream::QuantileStream;
pub use window::{QuantileWindow, WindowConfig, WindowLayout, WindowSnapshot};

/// One (quantile, allowed rank error) target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Objective {
    pub quantile: f64,
    pub epsilon: f64,
}

impl Objective {
    pub fn new(quantile: f64, epsilon: f64) -> Result<Self> {
        let objective = Self { quantile, epsilon };
        objective.validate()?;
        Ok(objective)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.quantile) {
            return Err(MeterError::InvalidObjective(format!(
                "quantile {} must be within [0, 1]",
                self.quantile
            )));
        }
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(MeterError::InvalidObjective(format!(
                "epsilon {} must be within [0, 1]",
                self.epsilon
            )));
        }
        Ok(())
    }
}
