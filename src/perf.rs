//! Load-time performance report.
//!
//! Gathered from the host after the load event and forwarded once. The
//! numbers are passed through uninterpreted.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTiming {
    pub name: String,
    pub duration: f64,
    pub transfer_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    /// Paint timings by entry name, e.g. `first-contentful-paint`.
    pub paint: BTreeMap<String, f64>,
    pub resources: Vec<ResourceTiming>,
}

/// Host-side timing data.
pub trait PerformanceSource {
    fn paint_entries(&self) -> Vec<(String, f64)>;
    fn resource_entries(&self) -> Vec<ResourceTiming>;
}

/// External collector for the report.
pub trait ReportSink {
    fn send(&mut self, report: PerformanceReport) -> Result<()>;
}

pub fn collect_report(source: &dyn PerformanceSource) -> PerformanceReport {
    PerformanceReport {
        paint: source.paint_entries().into_iter().collect(),
        resources: source.resource_entries(),
    }
}

/// A fixed set of entries, as loaded from a JSON dump.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticTimings(pub PerformanceReport);

impl PerformanceSource for StaticTimings {
    fn paint_entries(&self) -> Vec<(String, f64)> {
        self.0.paint.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    fn resource_entries(&self) -> Vec<ResourceTiming> {
        self.0.resources.clone()
    }
}

/// Keeps every report it receives.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub reports: Vec<PerformanceReport>,
}

impl ReportSink for CollectingSink {
    fn send(&mut self, report: PerformanceReport) -> Result<()> {
        self.reports.push(report);
        Ok(())
    }
}
