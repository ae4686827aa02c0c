//! Integration tests for the GeoTIFF engine.
//!
//! Every fixture is written by the engine itself into a temporary directory.

use approx::assert_relative_eq;
use rastersum_grid::{
    read_metadata, write_raster, Bounds, Crs, GeoTiffEngine, GeoTransform, GridError,
    RasterEngine, RasterSpec, WarpRequest, Window,
};
use std::path::Path;
use tempfile::TempDir;

fn spec(width: u32, height: u32, nodata: Option<f32>) -> RasterSpec {
    RasterSpec {
        width,
        height,
        geotransform: GeoTransform::north_up(500_000.0, 4_200_000.0, 30.0, 30.0),
        crs: Crs::from_epsg(32633),
        nodata,
    }
}

fn ramp(width: u32, height: u32) -> Vec<f32> {
    (0..width * height).map(|i| (i % 8) as f32).collect()
}

fn write(path: &Path, spec: &RasterSpec, data: &[f32]) {
    write_raster(&GeoTiffEngine::new(), path, spec, data).expect("write raster");
}

#[test]
fn test_metadata_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("layer.tif");
    let spec = spec(37, 21, Some(255.0));
    write(&path, &spec, &ramp(37, 21));

    let layer = read_metadata(&path).expect("read metadata");
    assert_eq!(layer.dimensions(), (37, 21));
    assert_eq!(layer.crs.epsg(), Some(32633));
    assert_eq!(layer.declared_nodata, Some(255.0));
    assert!(layer.geotransform.approx_eq(&spec.geotransform));

    let bounds = layer.bounds();
    assert_relative_eq!(bounds.min_x, 500_000.0);
    assert_relative_eq!(bounds.max_x, 500_000.0 + 37.0 * 30.0);
    assert_relative_eq!(bounds.max_y, 4_200_000.0);
    assert_relative_eq!(bounds.min_y, 4_200_000.0 - 21.0 * 30.0);
}

#[test]
fn test_missing_nodata_defaults_to_255() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.tif");
    write(&path, &spec(4, 4, None), &ramp(4, 4));

    let layer = read_metadata(&path).unwrap();
    assert_eq!(layer.declared_nodata, None);
    assert_eq!(layer.nodata, 255.0);
}

#[test]
fn test_window_reads_match_full_read() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("big.tif");
    // Wide enough that strips hold only a few rows each.
    let (width, height) = (1500, 90);
    let data: Vec<f32> = (0..width * height).map(|i| i as f32).collect();
    write(&path, &spec(width, height, None), &data);

    let engine = GeoTiffEngine::new();
    let window = Window::new(1490, 40, 10, 30);
    let block = engine.read_window(&path, window).unwrap();
    assert_eq!(block.len(), 300);
    for r in 0..window.height {
        for c in 0..window.width {
            let expected = ((window.y + r) * width + window.x + c) as f32;
            assert_eq!(block[(r * window.width + c) as usize], expected);
        }
    }

    let mut stitched = vec![0f32; data.len()];
    for tile in Window::tiles(width, height, 256) {
        let block = engine.read_window(&path, tile).unwrap();
        for r in 0..tile.height {
            let dst = ((tile.y + r) * width + tile.x) as usize;
            let src = (r * tile.width) as usize;
            stitched[dst..dst + tile.width as usize]
                .copy_from_slice(&block[src..src + tile.width as usize]);
        }
    }
    assert_eq!(stitched, data);
}

#[test]
fn test_window_out_of_bounds() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("small.tif");
    write(&path, &spec(8, 8, None), &ramp(8, 8));

    let err = GeoTiffEngine::new()
        .read_window(&path, Window::new(4, 4, 5, 1))
        .unwrap_err();
    assert!(matches!(err, GridError::WindowOutOfBounds { .. }));
}

#[test]
fn test_statistics_written_with_artifact() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stats.tif");
    let data = vec![1.0, 3.0, 255.0, 5.0];
    let stats = write_raster(&GeoTiffEngine::new(), &path, &spec(2, 2, Some(255.0)), &data).unwrap();

    assert_eq!(stats.valid_count, 3);
    assert_relative_eq!(stats.mean, 3.0);

    let stored = GeoTiffEngine::new()
        .read_statistics(&path)
        .unwrap()
        .expect("statistics tag");
    assert_eq!(stored.valid_count, 3);
    assert_eq!(stored.total_count, 4);
    assert_relative_eq!(stored.min, 1.0);
    assert_relative_eq!(stored.max, 5.0);
    assert_relative_eq!(stored.mean, 3.0);
}

#[test]
fn test_aborted_sink_leaves_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("aborted.tif");
    let engine = GeoTiffEngine::new();

    let mut sink = engine.create(&path, &spec(4, 4, None)).unwrap();
    sink.write_tile(Window::new(0, 0, 2, 2), &[1.0; 4]).unwrap();
    sink.abort();

    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_tile_size_mismatch() {
    let dir = TempDir::new().unwrap();
    let engine = GeoTiffEngine::new();
    let mut sink = engine.create(&dir.path().join("x.tif"), &spec(4, 4, None)).unwrap();
    let err = sink.write_tile(Window::new(0, 0, 2, 2), &[1.0; 3]).unwrap_err();
    assert!(matches!(err, GridError::TileSizeMismatch { expected: 4, actual: 3 }));
    sink.abort();
}

#[test]
fn test_warp_resize_nearest() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src.tif");
    let dst = dir.path().join("dst.tif");
    let source_spec = spec(4, 4, Some(255.0));
    let data: Vec<f32> = (0..16).map(|i| (i % 7) as f32).collect();
    write(&src, &source_spec, &data);

    // Same extent at twice the resolution: every source pixel becomes a 2x2 block.
    let bounds = source_spec.geotransform.bounds(4, 4);
    let request = WarpRequest::resize(8, 8, bounds).with_nodata(Some(255.0));
    let out = GeoTiffEngine::new().warp(&src, &request, &dst).unwrap();
    assert_eq!(out, dst);

    let layer = read_metadata(&dst).unwrap();
    assert_eq!(layer.dimensions(), (8, 8));
    assert_eq!(layer.declared_nodata, Some(255.0));
    assert_relative_eq!(layer.geotransform.pixel_width(), 15.0);

    let warped = GeoTiffEngine::new().read_window(&dst, Window::full(8, 8)).unwrap();
    for row in 0..8 {
        for col in 0..8 {
            assert_eq!(warped[row * 8 + col], data[(row / 2) * 4 + col / 2]);
        }
    }
}

#[test]
fn test_warp_outside_extent_fills_nodata() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src.tif");
    let dst = dir.path().join("dst.tif");
    let source_spec = spec(2, 2, Some(255.0));
    write(&src, &source_spec, &[1.0, 2.0, 3.0, 4.0]);

    // Target extent is twice as wide, extending east of the source.
    let b = source_spec.geotransform.bounds(2, 2);
    let bounds = Bounds { max_x: b.max_x + b.width(), ..b };
    let request = WarpRequest::resize(4, 2, bounds).with_nodata(Some(255.0));
    GeoTiffEngine::new().warp(&src, &request, &dst).unwrap();

    let warped = GeoTiffEngine::new().read_window(&dst, Window::full(4, 2)).unwrap();
    assert_eq!(warped, vec![1.0, 2.0, 255.0, 255.0, 3.0, 4.0, 255.0, 255.0]);
}

#[test]
fn test_warp_to_other_crs_is_unsupported() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src.tif");
    write(&src, &spec(2, 2, None), &[0.0; 4]);

    let dst = dir.path().join("dst.tif");
    let err = GeoTiffEngine::new()
        .warp(&src, &WarpRequest::reproject(Crs::from_epsg(4326)), &dst)
        .unwrap_err();
    assert!(matches!(err, GridError::Unsupported(_)));
    assert!(!dst.exists());
}
