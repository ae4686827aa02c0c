//! Metric declarations for the rastersum pipeline.
//!
//! Every metric the workspace emits is a [`Metric`] constant in
//! [`metric_defs`], carrying its unit, description and label keys. Call
//! sites use `metric_defs::X.name` with the `metrics` facade (re-exported
//! here); installing a recorder is up to the binary.
//!
//! ```rust
//! use rastersum_metrics::{metric_defs, Metric, MetricKind};
//! use metrics::Unit;
//!
//! const RETRIES: Metric = Metric::counter("my.retries")
//!     .described("Retried operations")
//!     .with_labels(&["stage"]);
//!
//! assert_eq!(RETRIES.kind, MetricKind::Counter);
//! assert_eq!(RETRIES.unit, Unit::Count);
//!
//! metrics::counter!(metric_defs::TILES_WRITTEN.name).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_histogram, Unit};

/// How a metric is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Histogram,
}

/// A metric declaration.
#[derive(Debug, Clone)]
pub struct Metric {
    /// Dotted name, e.g. `rastersum.aggregate.tiles_written`.
    pub name: &'static str,
    pub kind: MetricKind,
    pub unit: Unit,
    pub description: &'static str,
    /// Label keys attached at every call site.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// A counter of discrete events.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            unit: Unit::Count,
            description: "",
            labels: &[],
        }
    }

    /// A histogram of values measured in `unit`.
    pub const fn histogram(name: &'static str, unit: Unit) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            unit,
            description: "",
            labels: &[],
        }
    }

    pub const fn described(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Register the unit and description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.description),
            MetricKind::Histogram => describe_histogram!(self.name, self.unit, self.description),
        }
    }
}

/// All metric definitions for the pipeline.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Alignment
    // ========================================================================

    /// Layers that ended up congruent with the reference.
    ///
    /// Labels: action (`pass_through`, `reprojected`, `resized`, `reprojected_and_resized`)
    pub const LAYERS_ALIGNED: Metric = Metric::counter("rastersum.align.layers_aligned")
        .described("Layers made congruent with the reference layer")
        .with_labels(&["action"]);

    /// Layers excluded from a batch.
    ///
    /// Labels: reason (`unreadable`, `warp_failed`, `timed_out`, `not_congruent`)
    pub const LAYERS_DROPPED: Metric = Metric::counter("rastersum.align.layers_dropped")
        .described("Layers dropped from a batch during alignment")
        .with_labels(&["reason"]);

    /// Labels: kind (`reproject`, `resize`)
    pub const WARPS_REQUESTED: Metric = Metric::counter("rastersum.align.warps_requested")
        .described("Warp requests sent to the raster engine")
        .with_labels(&["kind"]);

    pub const WARPS_FAILED: Metric = Metric::counter("rastersum.align.warps_failed")
        .described("Warp requests that failed or timed out")
        .with_labels(&["kind"]);

    // ========================================================================
    // Aggregation
    // ========================================================================

    pub const TILES_WRITTEN: Metric =
        Metric::counter("rastersum.aggregate.tiles_written").described("Output tiles written by the aggregation engine");

    /// Wall-clock duration of one aggregation call.
    pub const AGGREGATION_DURATION: Metric = Metric::histogram("rastersum.aggregate.duration_ms", Unit::Milliseconds)
        .described("Wall-clock duration of an aggregation");

    // ========================================================================
    // Pipeline
    // ========================================================================

    /// Values of the `outcome` label on [`STAGE1_CALLS`] and [`STAGE2_CALLS`]:
    /// `ok`, `rejected` for invalid requests and unknown jobs, `failed` for
    /// everything else.
    pub const CALL_OUTCOMES: &[&str] = &["ok", "rejected", "failed"];

    /// Labels: outcome (see [`CALL_OUTCOMES`])
    pub const STAGE1_CALLS: Metric = Metric::counter("rastersum.pipeline.stage1_calls")
        .described("Stage-1 calls handled")
        .with_labels(&["outcome"]);

    /// Labels: outcome (see [`CALL_OUTCOMES`])
    pub const STAGE2_CALLS: Metric = Metric::counter("rastersum.pipeline.stage2_calls")
        .described("Stage-2 calls handled")
        .with_labels(&["outcome"]);

    /// Jobs whose directories were removed.
    ///
    /// Labels: trigger (`delete`, `close`, `purge`)
    pub const JOBS_DELETED: Metric = Metric::counter("rastersum.pipeline.jobs_deleted")
        .described("Jobs removed from the job root")
        .with_labels(&["trigger"]);

    pub const ALL: &[&Metric] = &[
        &LAYERS_ALIGNED,
        &LAYERS_DROPPED,
        &WARPS_REQUESTED,
        &WARPS_FAILED,
        &TILES_WRITTEN,
        &AGGREGATION_DURATION,
        &STAGE1_CALLS,
        &STAGE2_CALLS,
        &JOBS_DELETED,
    ];
}

/// Describe every metric in [`metric_defs::ALL`].
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
