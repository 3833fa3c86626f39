//! Reporting sink
//!
//! Metrics flow out of the simulator through [`ReportSink`]; writing files or
//! plots is someone else's job. A sink lives for one run, is owned by the
//! orchestrator and is lent to the engine and applications.

use std::collections::BTreeMap;

use crate::time::Tick;

/// One recorded sample
#[derive(Clone, Debug, PartialEq)]
pub struct MetricPoint {
    pub repetition: usize,
    pub time: Tick,
    pub value: f64,
}

/// Destination for per-repetition, per-tick metrics
pub trait ReportSink {
    fn record(&mut self, repetition: usize, time: Tick, metric: &str, value: f64);

    /// Called once when a repetition ends, successfully or not
    fn flush(&mut self, _repetition: usize) {}
}

/// Discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NullReport;

impl ReportSink for NullReport {
    fn record(&mut self, _repetition: usize, _time: Tick, _metric: &str, _value: f64) {}
}

/// Keeps every sample in memory, grouped by metric name
#[derive(Clone, Debug, Default)]
pub struct MemoryReport {
    series: BTreeMap<String, Vec<MetricPoint>>,
    flushed: Vec<usize>,
}

impl MemoryReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// All samples of `metric`, in recording order
    pub fn series(&self, metric: &str) -> &[MetricPoint] {
        self.series.get(metric).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Samples of `metric` for one repetition
    pub fn repetition_series(&self, metric: &str, repetition: usize) -> Vec<&MetricPoint> {
        self.series(metric)
            .iter()
            .filter(|p| p.repetition == repetition)
            .collect()
    }

    /// Most recent sample of `metric` in `repetition`
    pub fn last(&self, metric: &str, repetition: usize) -> Option<f64> {
        self.series(metric)
            .iter()
            .rev()
            .find(|p| p.repetition == repetition)
            .map(|p| p.value)
    }

    /// Sum of all samples of `metric` in `repetition`
    pub fn total(&self, metric: &str, repetition: usize) -> f64 {
        self.repetition_series(metric, repetition)
            .iter()
            .map(|p| p.value)
            .sum()
    }

    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Repetitions flushed so far
    pub fn flushed(&self) -> &[usize] {
        &self.flushed
    }
}

impl ReportSink for MemoryReport {
    fn record(&mut self, repetition: usize, time: Tick, metric: &str, value: f64) {
        self.series
            .entry(metric.to_string())
            .or_default()
            .push(MetricPoint {
                repetition,
                time,
                value,
            });
    }

    fn flush(&mut self, repetition: usize) {
        self.flushed.push(repetition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_report() {
        let mut report = MemoryReport::new();
        report.record(0, Tick(1), "rmse", 4.0);
        report.record(0, Tick(2), "rmse", 2.0);
        report.record(1, Tick(1), "rmse", 8.0);
        report.record(0, Tick(2), "fd_mistakes", 1.0);

        assert_eq!(report.series("rmse").len(), 3);
        assert_eq!(report.last("rmse", 0), Some(2.0));
        assert_eq!(report.last("rmse", 1), Some(8.0));
        assert_eq!(report.total("fd_mistakes", 0), 1.0);
        assert_eq!(report.last("absent", 0), None);
        assert_eq!(report.metrics().collect::<Vec<_>>(), vec!["fd_mistakes", "rmse"]);
    }
}
