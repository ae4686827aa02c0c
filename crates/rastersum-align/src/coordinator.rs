//! Alignment coordinator.
//!
//! The first input is the reference. Every other layer is compared against
//! it and, where needed, handed to the raster engine to be reprojected into
//! the reference CRS and then resampled onto the reference grid. Warps run on
//! a helper thread so a stuck engine call can be abandoned after a timeout.

use crate::report::{AlignAction, AlignmentReport, LayerFailure, LayerOutcome, LayerStatus};
use crate::{AlignError, Result};
use crossbeam_channel::RecvTimeoutError;
use rastersum_grid::{RasterEngine, RasterLayer, WarpRequest};
use rastersum_metrics::metric_defs;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default time allowed for a single warp call.
pub const DEFAULT_WARP_TIMEOUT: Duration = Duration::from_secs(300);

/// Makes a batch of layers congruent with its first element.
#[derive(Clone)]
pub struct AlignmentCoordinator {
    engine: Arc<dyn RasterEngine>,
    timeout: Duration,
}

impl std::fmt::Debug for AlignmentCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignmentCoordinator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AlignmentCoordinator {
    /// Create a coordinator delegating warps to `engine`.
    pub fn new(engine: Arc<dyn RasterEngine>) -> Self {
        Self {
            engine,
            timeout: DEFAULT_WARP_TIMEOUT,
        }
    }

    /// Set the time allowed for a single warp call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The configured warp timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Align `inputs` to `inputs[0]`, writing adjusted copies under `scratch`.
    ///
    /// The report has exactly one outcome per input, in input order. Layers
    /// that are already congruent keep their original path and nothing is
    /// written for them. A layer that cannot be read, warped, or verified
    /// afterwards is recorded as not congruent instead of failing the call.
    pub fn align<P: AsRef<Path>>(&self, inputs: &[P], scratch: &Path) -> Result<AlignmentReport> {
        let Some(first) = inputs.first() else {
            return Ok(AlignmentReport::default());
        };

        let reference_path = first.as_ref();
        let reference = self
            .engine
            .open(reference_path)
            .map_err(|source| AlignError::ReferenceUnreadable {
                path: reference_path.to_path_buf(),
                source,
            })?;

        debug!(
            reference = %reference_path.display(),
            crs = %reference.crs,
            width = reference.width,
            height = reference.height,
            "Aligning batch"
        );

        let mut names = ScratchNames::default();
        let outcomes: Vec<LayerOutcome> = inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                self.align_layer(index, input.as_ref(), &reference, scratch, &mut names)
            })
            .collect();

        let report = AlignmentReport { outcomes };
        let dropped = report.dropped();
        if dropped.is_empty() {
            info!(layers = report.len(), "All layers aligned");
        } else {
            warn!(
                layers = report.len(),
                dropped = dropped.len(),
                indices = ?dropped,
                "Alignment dropped layers from the batch"
            );
        }
        Ok(report)
    }

    fn align_layer(
        &self,
        index: usize,
        source: &Path,
        reference: &RasterLayer,
        scratch: &Path,
        names: &mut ScratchNames,
    ) -> LayerOutcome {
        let mut current = match self.engine.open(source) {
            Ok(layer) => layer,
            Err(e) => {
                warn!(index, path = %source.display(), error = %e, "Skipping unreadable layer");
                let failure = LayerFailure::Unreadable { reason: e.to_string() };
                record_dropped(failure.as_str());
                return LayerOutcome {
                    index,
                    source: source.to_path_buf(),
                    path: None,
                    status: LayerStatus::Failed(failure),
                    congruent: false,
                };
            }
        };

        let stem = names.stem_for(index, source);
        let mut reprojected = false;
        let mut resized = false;
        let mut failure = None;

        if current.crs != reference.crs {
            let dst = scratch.join(format!("{}_aligned.tif", stem));
            let request =
                WarpRequest::reproject(reference.crs.clone()).with_nodata(Some(current.nodata));
            match self.warp(&current.path, &request, &dst, "reproject") {
                Ok(layer) => {
                    current = layer;
                    reprojected = true;
                }
                Err(f) => failure = Some(f),
            }
        }

        let needs_resize = current.dimensions() != reference.dimensions()
            || !current.geotransform.approx_eq(&reference.geotransform);
        let timed_out = matches!(failure, Some(LayerFailure::TimedOut { .. }));
        if needs_resize && !timed_out {
            let name = if reprojected {
                format!("{}_aligned_size.tif", stem)
            } else {
                format!("{}_aligned.tif", stem)
            };
            let request = WarpRequest::resize(reference.width, reference.height, reference.bounds())
                .with_nodata(Some(current.nodata));
            match self.warp(&current.path, &request, &scratch.join(name), "resize") {
                Ok(layer) => {
                    current = layer;
                    resized = true;
                }
                Err(f) => failure = failure.or(Some(f)),
            }
        }

        let congruent = current.is_congruent_with(reference);
        let status = match failure {
            Some(f) => {
                warn!(index, path = %source.display(), failure = %f, "Using best-effort path");
                LayerStatus::Failed(f)
            }
            None => LayerStatus::Aligned(AlignAction::from_steps(reprojected, resized)),
        };

        match (&status, congruent) {
            (LayerStatus::Aligned(action), true) => {
                metrics::counter!(metric_defs::LAYERS_ALIGNED.name, "action" => action.as_str())
                    .increment(1);
            }
            (LayerStatus::Failed(f), _) if !congruent => record_dropped(f.as_str()),
            (_, false) => {
                warn!(
                    index,
                    path = %current.path.display(),
                    "Layer is not congruent with the reference after alignment"
                );
                record_dropped("not_congruent");
            }
            // A failed step whose best-effort result still matches the grid.
            (LayerStatus::Failed(_), true) => {}
        }

        LayerOutcome {
            index,
            source: source.to_path_buf(),
            path: Some(current.path),
            status,
            congruent,
        }
    }

    /// Run one warp on a helper thread and re-read the result.
    fn warp(
        &self,
        src: &Path,
        request: &WarpRequest,
        dst: &Path,
        kind: &'static str,
    ) -> std::result::Result<RasterLayer, LayerFailure> {
        metrics::counter!(metric_defs::WARPS_REQUESTED.name, "kind" => kind).increment(1);
        debug!(src = %src.display(), dst = %dst.display(), kind, "Requesting warp");

        let result = self.run_with_timeout(src, request, dst);
        if let Err(failure) = &result {
            metrics::counter!(metric_defs::WARPS_FAILED.name, "kind" => kind).increment(1);
            warn!(src = %src.display(), kind, failure = %failure, "Warp failed");
        }
        result
    }

    fn run_with_timeout(
        &self,
        src: &Path,
        request: &WarpRequest,
        dst: &Path,
    ) -> std::result::Result<RasterLayer, LayerFailure> {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LayerFailure::WarpFailed {
                reason: format!("cannot create {}: {}", parent.display(), e),
            })?;
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        let engine = Arc::clone(&self.engine);
        let (src, dst, request) = (src.to_path_buf(), dst.to_path_buf(), request.clone());

        // The handle is dropped on purpose: after a timeout the worker is
        // abandoned and its late result discarded.
        thread::Builder::new()
            .name("rastersum-warp".to_string())
            .spawn(move || {
                let result = engine
                    .warp(&src, &request, &dst)
                    .and_then(|written| engine.open(&written))
                    .map_err(|e| e.to_string());
                let _ = tx.send(result);
            })
            .map_err(|e| LayerFailure::WarpFailed {
                reason: format!("cannot spawn warp worker: {}", e),
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(layer)) => Ok(layer),
            Ok(Err(reason)) => Err(LayerFailure::WarpFailed { reason }),
            Err(RecvTimeoutError::Timeout) => Err(LayerFailure::TimedOut {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(LayerFailure::WarpFailed {
                reason: "warp worker exited without a result".to_string(),
            }),
        }
    }
}

fn record_dropped(reason: &'static str) {
    metrics::counter!(metric_defs::LAYERS_DROPPED.name, "reason" => reason).increment(1);
}

/// Hands out scratch file stems that are unique within one alignment call.
#[derive(Debug, Default)]
struct ScratchNames {
    used: HashSet<String>,
}

impl ScratchNames {
    fn stem_for(&mut self, index: usize, source: &Path) -> String {
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("layer")
            .to_string();
        if self.used.insert(stem.clone()) {
            return stem;
        }
        let mut suffix = index;
        loop {
            let candidate = format!("{stem}_{suffix}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_names_unique() {
        let mut names = ScratchNames::default();
        assert_eq!(names.stem_for(0, Path::new("/a/forest.tif")), "forest");
        assert_eq!(names.stem_for(1, Path::new("/b/forest.tif")), "forest_1");
        assert_eq!(names.stem_for(2, Path::new("/b/water.tif")), "water");
        assert_eq!(names.stem_for(3, Path::new("")), "layer");
    }

    #[test]
    fn test_scratch_names_skip_taken_suffix() {
        let mut names = ScratchNames::default();
        assert_eq!(names.stem_for(0, Path::new("a_2.tif")), "a_2");
        assert_eq!(names.stem_for(1, Path::new("a.tif")), "a");
        assert_eq!(names.stem_for(2, Path::new("a.tif")), "a_3");
        assert_eq!(names.stem_for(3, Path::new("a.tif")), "a_4");
        assert_eq!(names.used.len(), 4);
    }
}
