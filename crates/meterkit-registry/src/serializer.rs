//! Collect-and-serialize contract.
//!
//! Exposition encoders (Prometheus text, OpenMetrics, protobuf) live outside
//! this crate and plug in through [`MetricSerializer`]. A collection pass calls
//! `write_family_declaration` once per family, then `write_metric_point` for
//! every published series. Identifiers arrive pre-rendered as
//! `name[_suffix][{labels}]`.
//!
//! [`SnapshotSerializer`] is an in-memory implementation for tests and for
//! embedders that want structured values instead of text.

use meterkit_core::{Exemplar, MetricKind, Result};

pub trait MetricSerializer {
    fn write_family_declaration(&mut self, name: &str, help: &str, kind: MetricKind) -> Result<()>;

    fn write_metric_point(
        &mut self,
        identifier: &str,
        value: f64,
        exemplar: Option<&Exemplar>,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct MetricPoint {
    pub identifier: String,
    pub value: f64,
    pub exemplar: Option<Exemplar>,
}

#[derive(Debug, Clone)]
pub struct FamilySnapshot {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub points: Vec<MetricPoint>,
}

/// Collects families and points in memory.
#[derive(Debug, Default)]
pub struct SnapshotSerializer {
    families: Vec<FamilySnapshot>,
}

impl SnapshotSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn families(&self) -> &[FamilySnapshot] {
        &self.families
    }

    pub fn family(&self, name: &str) -> Option<&FamilySnapshot> {
        self.families.iter().find(|f| f.name == name)
    }

    pub fn point(&self, identifier: &str) -> Option<&MetricPoint> {
        self.families
            .iter()
            .flat_map(|f| f.points.iter())
            .find(|p| p.identifier == identifier)
    }

    /// Value of the point with this exact identifier.
    pub fn value(&self, identifier: &str) -> Option<f64> {
        self.point(identifier).map(|p| p.value)
    }

    pub fn point_count(&self) -> usize {
        self.families.iter().map(|f| f.points.len()).sum()
    }
}

impl MetricSerializer for SnapshotSerializer {
    fn write_family_declaration(&mut self, name: &str, help: &str, kind: MetricKind) -> Result<()> {
        self.families.push(FamilySnapshot {
            name: name.to_string(),
            help: help.to_string(),
            kind,
            points: Vec::new(),
        });
        Ok(())
    }

    fn write_metric_point(
        &mut self,
        identifier: &str,
        value: f64,
        exemplar: Option<&Exemplar>,
    ) -> Result<()> {
        let family = self.families.last_mut().ok_or_else(|| {
            meterkit_core::MeterError::Internal("metric point written before any family".into())
        })?;
        family.points.push(MetricPoint {
            identifier: identifier.to_string(),
            value,
            exemplar: exemplar.cloned(),
        });
        Ok(())
    }
}
