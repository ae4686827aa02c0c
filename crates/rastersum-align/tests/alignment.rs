//! Alignment integration tests.
//!
//! Fixture rasters are written with the bundled GeoTIFF engine. Reprojection
//! is faked by [`RelabelEngine`], which rewrites the source grid under the
//! requested CRS, since the bundled engine only resamples within one CRS.

use rastersum_align::{AlignAction, AlignError, AlignmentCoordinator, LayerFailure, LayerStatus};
use rastersum_grid::{
    write_raster, Crs, GeoTiffEngine, GeoTransform, RasterEngine, RasterLayer, RasterSink,
    RasterSpec, WarpRequest, Window,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Test Engines
// ============================================================================

/// Engine that "reprojects" by relabelling the source grid with the target CRS.
#[derive(Default)]
struct RelabelEngine {
    inner: GeoTiffEngine,
    warps: AtomicUsize,
}

impl RasterEngine for RelabelEngine {
    fn open(&self, path: &Path) -> rastersum_grid::Result<RasterLayer> {
        self.inner.open(path)
    }

    fn read_window(&self, path: &Path, window: Window) -> rastersum_grid::Result<Vec<f32>> {
        self.inner.read_window(path, window)
    }

    fn create(&self, path: &Path, spec: &RasterSpec) -> rastersum_grid::Result<Box<dyn RasterSink>> {
        self.inner.create(path, spec)
    }

    fn warp(&self, src: &Path, request: &WarpRequest, dst: &Path) -> rastersum_grid::Result<PathBuf> {
        self.warps.fetch_add(1, Ordering::SeqCst);
        match &request.target_crs {
            Some(crs) => {
                let layer = self.inner.open(src)?;
                let data = self.inner.read_window(src, Window::full(layer.width, layer.height))?;
                let mut spec = RasterSpec::like(&layer).with_nodata(request.dst_nodata);
                spec.crs = crs.clone();
                write_raster(&self.inner, dst, &spec, &data)?;
                Ok(dst.to_path_buf())
            }
            None => self.inner.warp(src, request, dst),
        }
    }
}

/// Engine whose warps never finish in time.
struct StalledEngine {
    inner: GeoTiffEngine,
    delay: Duration,
}

impl RasterEngine for StalledEngine {
    fn open(&self, path: &Path) -> rastersum_grid::Result<RasterLayer> {
        self.inner.open(path)
    }

    fn read_window(&self, path: &Path, window: Window) -> rastersum_grid::Result<Vec<f32>> {
        self.inner.read_window(path, window)
    }

    fn create(&self, path: &Path, spec: &RasterSpec) -> rastersum_grid::Result<Box<dyn RasterSink>> {
        self.inner.create(path, spec)
    }

    fn warp(&self, src: &Path, request: &WarpRequest, dst: &Path) -> rastersum_grid::Result<PathBuf> {
        std::thread::sleep(self.delay);
        self.inner.warp(src, request, dst)
    }
}

// ============================================================================
// Test Helper Functions
// ============================================================================

const ORIGIN_X: f64 = 500_000.0;
const ORIGIN_Y: f64 = 4_200_000.0;

/// Write a `size` x `size` layer covering a 400 m square.
fn layer(dir: &Path, name: &str, size: u32, epsg: u16) -> PathBuf {
    let path = dir.join(name);
    let spec = RasterSpec {
        width: size,
        height: size,
        geotransform: GeoTransform::north_up(ORIGIN_X, ORIGIN_Y, 400.0 / size as f64, 400.0 / size as f64),
        crs: Crs::from_epsg(epsg),
        nodata: Some(255.0),
    };
    let data: Vec<f32> = (0..size * size).map(|i| (i % 8) as f32).collect();
    write_raster(&GeoTiffEngine::new(), &path, &spec, &data).expect("write fixture");
    path
}

fn coordinator() -> AlignmentCoordinator {
    AlignmentCoordinator::new(Arc::new(GeoTiffEngine::new()))
}

fn scratch_files(scratch: &Path) -> Vec<String> {
    match std::fs::read_dir(scratch) {
        Ok(entries) => {
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
        Err(_) => Vec::new(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_empty_input() {
    let dir = TempDir::new().unwrap();
    let inputs: Vec<PathBuf> = Vec::new();
    let report = coordinator().align(&inputs, dir.path()).unwrap();
    assert!(report.is_empty());
}

#[test]
fn test_congruent_layers_pass_through() {
    let dir = TempDir::new().unwrap();
    let scratch = dir.path().join("scratch");
    let a = layer(dir.path(), "a.tif", 4, 32633);
    let b = layer(dir.path(), "b.tif", 4, 32633);

    let report = coordinator().align(&[a.clone(), b.clone()], &scratch).unwrap();

    assert_eq!(report.aligned_paths(), vec![a, b]);
    assert!(report.dropped().is_empty());
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.status == LayerStatus::Aligned(AlignAction::PassThrough)));
    assert!(scratch_files(&scratch).is_empty());
}

#[test]
fn test_size_mismatch_is_resized() {
    let dir = TempDir::new().unwrap();
    let scratch = dir.path().join("scratch");
    let a = layer(dir.path(), "a.tif", 4, 32633);
    let b = layer(dir.path(), "b.tif", 2, 32633);

    let report = coordinator().align(&[a.clone(), b], &scratch).unwrap();

    assert_eq!(report.outcomes[1].status, LayerStatus::Aligned(AlignAction::Resized));
    assert!(report.outcomes[1].congruent);
    let resized = scratch.join("b_aligned.tif");
    assert_eq!(report.aligned_paths(), vec![a.clone(), resized.clone()]);

    let reference = RasterLayer::from_file(&a).unwrap();
    let aligned = RasterLayer::from_file(&resized).unwrap();
    assert!(aligned.is_congruent_with(&reference));
    assert_eq!(aligned.declared_nodata, Some(255.0));
}

#[test]
fn test_failed_reprojection_drops_layer() {
    let dir = TempDir::new().unwrap();
    let a = layer(dir.path(), "a.tif", 4, 32633);
    let b = layer(dir.path(), "b.tif", 4, 32634);
    let c = layer(dir.path(), "c.tif", 4, 32633);

    let report = coordinator().align(&[a, b.clone(), c], &dir.path().join("scratch")).unwrap();

    assert_eq!(report.len(), 3);
    assert_eq!(report.dropped(), vec![1]);
    let outcome = &report.outcomes[1];
    assert!(matches!(outcome.status, LayerStatus::Failed(LayerFailure::WarpFailed { .. })));
    assert_eq!(outcome.path.as_deref(), Some(b.as_path()));
    assert!(!outcome.congruent);
}

#[test]
fn test_reproject_then_resize_uses_distinct_names() {
    let dir = TempDir::new().unwrap();
    let scratch = dir.path().join("scratch");
    let a = layer(dir.path(), "a.tif", 4, 32633);
    let b = layer(dir.path(), "b.tif", 2, 32634);
    let engine = Arc::new(RelabelEngine::default());

    let report = AlignmentCoordinator::new(engine.clone())
        .align(&[a, b], &scratch)
        .unwrap();

    assert_eq!(
        report.outcomes[1].status,
        LayerStatus::Aligned(AlignAction::ReprojectedAndResized)
    );
    assert_eq!(report.outcomes[1].path, Some(scratch.join("b_aligned_size.tif")));
    assert!(report.is_complete());
    assert_eq!(engine.warps.load(Ordering::SeqCst), 2);
    assert_eq!(
        scratch_files(&scratch),
        vec!["b_aligned.tif".to_string(), "b_aligned_size.tif".to_string()]
    );
}

#[test]
fn test_unreadable_layer_is_skipped() {
    let dir = TempDir::new().unwrap();
    let a = layer(dir.path(), "a.tif", 4, 32633);
    let missing = dir.path().join("missing.tif");
    let c = layer(dir.path(), "c.tif", 4, 32633);

    let report = coordinator()
        .align(&[a.clone(), missing, c.clone()], &dir.path().join("scratch"))
        .unwrap();

    assert_eq!(report.aligned_paths(), vec![a, c]);
    assert_eq!(report.dropped(), vec![1]);
    assert!(report.outcomes[1].path.is_none());
    assert!(matches!(
        report.outcomes[1].status,
        LayerStatus::Failed(LayerFailure::Unreadable { .. })
    ));
}

#[test]
fn test_unreadable_reference_aborts() {
    let dir = TempDir::new().unwrap();
    let b = layer(dir.path(), "b.tif", 4, 32633);
    let err = coordinator()
        .align(&[dir.path().join("nope.tif"), b], &dir.path().join("scratch"))
        .unwrap_err();
    assert!(matches!(err, AlignError::ReferenceUnreadable { .. }));
}

#[test]
fn test_stalled_warp_times_out() {
    let dir = TempDir::new().unwrap();
    let a = layer(dir.path(), "a.tif", 4, 32633);
    let b = layer(dir.path(), "b.tif", 2, 32633);
    let engine = Arc::new(StalledEngine {
        inner: GeoTiffEngine::new(),
        delay: Duration::from_millis(500),
    });

    let report = AlignmentCoordinator::new(engine)
        .with_timeout(Duration::from_millis(20))
        .align(&[a, b], &dir.path().join("scratch"))
        .unwrap();

    assert_eq!(report.dropped(), vec![1]);
    assert_eq!(
        report.outcomes[1].status,
        LayerStatus::Failed(LayerFailure::TimedOut { timeout_ms: 20 })
    );
}
