//! Per-layer alignment outcomes.

use std::fmt;
use std::path::PathBuf;

/// What the coordinator did to a layer that ended up aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AlignAction {
    /// Already congruent; the original path is reused.
    PassThrough,
    /// Reprojected into the reference CRS.
    Reprojected,
    /// Resampled onto the reference grid.
    Resized,
    /// Reprojected, then resampled onto the reference grid.
    ReprojectedAndResized,
}

impl AlignAction {
    pub(crate) fn from_steps(reprojected: bool, resized: bool) -> Self {
        match (reprojected, resized) {
            (false, false) => AlignAction::PassThrough,
            (true, false) => AlignAction::Reprojected,
            (false, true) => AlignAction::Resized,
            (true, true) => AlignAction::ReprojectedAndResized,
        }
    }

    /// Returns the action as a snake_case string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            AlignAction::PassThrough => "pass_through",
            AlignAction::Reprojected => "reprojected",
            AlignAction::Resized => "resized",
            AlignAction::ReprojectedAndResized => "reprojected_and_resized",
        }
    }
}

impl fmt::Display for AlignAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a layer could not be aligned.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case", tag = "kind"))]
pub enum LayerFailure {
    /// The layer's metadata could not be read.
    Unreadable {
        /// Underlying cause.
        reason: String,
    },
    /// The raster engine rejected or failed a warp.
    WarpFailed {
        /// Underlying cause.
        reason: String,
    },
    /// A warp did not finish within the configured timeout.
    TimedOut {
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },
}

impl LayerFailure {
    /// Short label used for logs and metrics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            LayerFailure::Unreadable { .. } => "unreadable",
            LayerFailure::WarpFailed { .. } => "warp_failed",
            LayerFailure::TimedOut { .. } => "timed_out",
        }
    }
}

impl fmt::Display for LayerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerFailure::Unreadable { reason } => write!(f, "unreadable: {}", reason),
            LayerFailure::WarpFailed { reason } => write!(f, "warp failed: {}", reason),
            LayerFailure::TimedOut { timeout_ms } => write!(f, "warp timed out after {} ms", timeout_ms),
        }
    }
}

/// Result of aligning one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum LayerStatus {
    /// Every requested step succeeded.
    Aligned(AlignAction),
    /// A step failed; `path` holds the best-effort result of the earlier steps.
    Failed(LayerFailure),
}

/// Outcome of one input layer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LayerOutcome {
    /// Position of the layer in the input list.
    pub index: usize,
    /// The input path as given.
    pub source: PathBuf,
    /// Best-effort aligned path, absent when the layer could not be read.
    pub path: Option<PathBuf>,
    /// What happened to the layer.
    pub status: LayerStatus,
    /// Whether `path` was verified congruent with the reference.
    pub congruent: bool,
}

impl LayerOutcome {
    /// Whether the layer is part of the aligned batch.
    pub fn is_usable(&self) -> bool {
        self.congruent && self.path.is_some()
    }
}

/// Result of an alignment call: one [`LayerOutcome`] per input, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlignmentReport {
    /// Per-layer outcomes, same length and order as the inputs.
    pub outcomes: Vec<LayerOutcome>,
}

impl AlignmentReport {
    /// Number of input layers.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the call had no inputs.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Paths of the congruent layers, in input order.
    pub fn aligned_paths(&self) -> Vec<PathBuf> {
        self.outcomes
            .iter()
            .filter(|o| o.is_usable())
            .filter_map(|o| o.path.clone())
            .collect()
    }

    /// Input indices of the congruent layers.
    pub fn aligned_indices(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| o.is_usable())
            .map(|o| o.index)
            .collect()
    }

    /// Input indices of the layers excluded from the batch.
    pub fn dropped(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_usable())
            .map(|o| o.index)
            .collect()
    }

    /// Whether every input ended up congruent.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(LayerOutcome::is_usable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(index: usize, congruent: bool) -> LayerOutcome {
        LayerOutcome {
            index,
            source: PathBuf::from(format!("in/{}.tif", index)),
            path: Some(PathBuf::from(format!("out/{}.tif", index))),
            status: LayerStatus::Aligned(AlignAction::PassThrough),
            congruent,
        }
    }

    #[test]
    fn test_action_from_steps() {
        assert_eq!(AlignAction::from_steps(false, false), AlignAction::PassThrough);
        assert_eq!(AlignAction::from_steps(true, true), AlignAction::ReprojectedAndResized);
        assert_eq!(AlignAction::from_steps(false, true).to_string(), "resized");
    }

    #[test]
    fn test_report_partitions_layers() {
        let mut unreadable = outcome(2, false);
        unreadable.path = None;
        unreadable.status = LayerStatus::Failed(LayerFailure::Unreadable {
            reason: "missing".to_string(),
        });
        let report = AlignmentReport {
            outcomes: vec![outcome(0, true), outcome(1, false), unreadable, outcome(3, true)],
        };

        assert_eq!(report.len(), 4);
        assert_eq!(report.aligned_indices(), vec![0, 3]);
        assert_eq!(report.dropped(), vec![1, 2]);
        assert_eq!(
            report.aligned_paths(),
            vec![PathBuf::from("out/0.tif"), PathBuf::from("out/3.tif")]
        );
        assert!(!report.is_complete());
    }

    #[test]
    fn test_empty_report() {
        let report = AlignmentReport::default();
        assert!(report.is_empty());
        assert!(report.is_complete());
        assert!(report.dropped().is_empty());
    }

    #[test]
    fn test_failure_display() {
        let failure = LayerFailure::TimedOut { timeout_ms: 1500 };
        assert_eq!(failure.as_str(), "timed_out");
        assert_eq!(failure.to_string(), "warp timed out after 1500 ms");
    }
}
