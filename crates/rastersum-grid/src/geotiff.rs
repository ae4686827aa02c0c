//! GeoTIFF-backed raster engine.
//!
//! Reads go through the strip/tile layout of the file so that a window read
//! only decodes the chunks it touches. Writes are staged in a random-access
//! scratch file next to the destination and encoded strip by strip on
//! [`RasterSink::finish`], which keeps memory bounded by a single strip no
//! matter how large the grid is.

use crate::engine::{BandStatistics, RasterEngine, RasterSink, RasterSpec, StatsAccumulator, WarpRequest};
use crate::geo::{GeoTransform, Window};
use crate::layer::{
    format_nodata, open_decoder, samples_to_f32, tag, RasterLayer, GDAL_METADATA_TAG,
    GDAL_NODATA_TAG, GEO_ASCII_PARAMS_TAG, GEO_DOUBLE_PARAMS_TAG, GEO_KEY_DIRECTORY_TAG,
    MODEL_PIXEL_SCALE_TAG, MODEL_TIEPOINT_TAG, MODEL_TRANSFORMATION_TAG,
};
use crate::{GridError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tracing::debug;

/// Edge length of the target blocks resampled per read during a warp.
const WARP_BLOCK: u32 = 256;

/// Approximate size of an encoded strip in bytes.
const STRIP_BYTES: u64 = 256 * 1024;

/// Raster engine reading and writing single-band GeoTIFF files.
///
/// `warp` resamples with nearest-neighbour onto any north-up target grid in
/// the source CRS. Changing the CRS needs projection math this engine does
/// not carry, so such requests fail with [`GridError::Unsupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoTiffEngine;

impl GeoTiffEngine {
    /// Create a new engine.
    pub fn new() -> Self {
        Self
    }

    /// Read the band statistics stored in the GDAL_METADATA tag, if any.
    pub fn read_statistics(&self, path: &Path) -> Result<Option<BandStatistics>> {
        let mut decoder = open_decoder(path).map_err(|e| GridError::unreadable(path, e))?;
        let (width, height) = decoder.dimensions()?;
        let xml = match decoder.get_tag_ascii_string(tag(GDAL_METADATA_TAG)) {
            Ok(xml) => xml,
            Err(_) => return Ok(None),
        };
        Ok(parse_statistics(&xml, width as u64 * height as u64))
    }

    /// Nearest-neighbour resample of one target block from `source`.
    fn resample_block(
        &self,
        source: &RasterLayer,
        target: &GeoTransform,
        block: Window,
        dst_nodata: Option<f32>,
    ) -> Result<Vec<f32>> {
        let fill = dst_nodata.unwrap_or(0.0);

        // Map every target pixel centre to a source pixel.
        let mut lookup: Vec<Option<(u32, u32)>> = Vec::with_capacity(block.len());
        let (mut min_c, mut min_r, mut max_c, mut max_r) = (u32::MAX, u32::MAX, 0u32, 0u32);
        for row in block.y..block.y + block.height {
            for col in block.x..block.x + block.width {
                let (x, y) = target.pixel_to_geo(col as f64 + 0.5, row as f64 + 0.5);
                let hit = source.geotransform.geo_to_pixel(x, y).and_then(|(c, r)| {
                    if !(c >= 0.0 && r >= 0.0) {
                        return None;
                    }
                    let (c, r) = (c.floor() as u64, r.floor() as u64);
                    (c < source.width as u64 && r < source.height as u64).then_some((c as u32, r as u32))
                });
                if let Some((c, r)) = hit {
                    min_c = min_c.min(c);
                    min_r = min_r.min(r);
                    max_c = max_c.max(c);
                    max_r = max_r.max(r);
                }
                lookup.push(hit);
            }
        }

        let mut out = vec![fill; block.len()];
        if min_c > max_c {
            // Block lies entirely outside the source extent.
            return Ok(out);
        }

        let window = Window::new(min_c, min_r, max_c - min_c + 1, max_r - min_r + 1);
        let data = self.read_window(&source.path, window)?;
        for (slot, hit) in out.iter_mut().zip(&lookup) {
            if let Some((c, r)) = *hit {
                let idx = (r - min_r) as usize * window.width as usize + (c - min_c) as usize;
                let value = data[idx];
                *slot = if dst_nodata.is_some() && source.is_nodata(value) {
                    fill
                } else {
                    value
                };
            }
        }
        Ok(out)
    }
}

impl RasterEngine for GeoTiffEngine {
    fn open(&self, path: &Path) -> Result<RasterLayer> {
        RasterLayer::from_file(path)
    }

    fn read_window(&self, path: &Path, window: Window) -> Result<Vec<f32>> {
        let mut decoder = open_decoder(path).map_err(|e| GridError::unreadable(path, e))?;
        let (width, height) = decoder.dimensions()?;
        if window.is_empty() {
            return Ok(Vec::new());
        }
        if !window.is_within(width, height) {
            return Err(GridError::WindowOutOfBounds {
                x: window.x,
                y: window.y,
                width: window.width,
                height: window.height,
                grid_width: width,
                grid_height: height,
            });
        }

        // Only band 1 is read. With chunky planar configuration the samples of
        // all bands are interleaved; with separate planes the first plane's
        // chunks hold band 1 alone.
        let samples = decoder.get_tag_u32(Tag::SamplesPerPixel).unwrap_or(1).max(1) as usize;
        let planar = decoder.get_tag_u32(Tag::PlanarConfiguration).unwrap_or(1);
        let stride = if planar == 2 { 1 } else { samples };

        let (chunk_w, chunk_h) = decoder.chunk_dimensions();
        if chunk_w == 0 || chunk_h == 0 {
            return Err(GridError::InvalidGeoTiff(format!(
                "{}: zero-sized chunks",
                path.display()
            )));
        }
        let chunks_across = width.div_ceil(chunk_w);

        let x_end = window.x + window.width;
        let y_end = window.y + window.height;
        let mut out = vec![0f32; window.len()];

        for chunk_row in window.y / chunk_h..=(y_end - 1) / chunk_h {
            for chunk_col in window.x / chunk_w..=(x_end - 1) / chunk_w {
                let index = chunk_row * chunks_across + chunk_col;
                let (data_w, data_h) = decoder.chunk_data_dimensions(index);
                let data = samples_to_f32(decoder.read_chunk(index)?)?;

                let origin_x = chunk_col * chunk_w;
                let origin_y = chunk_row * chunk_h;
                let ix0 = window.x.max(origin_x);
                let ix1 = x_end.min(origin_x + data_w);
                let iy0 = window.y.max(origin_y);
                let iy1 = y_end.min(origin_y + data_h);

                for gy in iy0..iy1 {
                    let src_row = (gy - origin_y) as usize * data_w as usize;
                    let dst_row = (gy - window.y) as usize * window.width as usize;
                    for gx in ix0..ix1 {
                        let src = (src_row + (gx - origin_x) as usize) * stride;
                        out[dst_row + (gx - window.x) as usize] = data[src];
                    }
                }
            }
        }

        Ok(out)
    }

    fn create(&self, path: &Path, spec: &RasterSpec) -> Result<Box<dyn RasterSink>> {
        Ok(Box::new(GeoTiffSink::create(path, spec)?))
    }

    fn warp(&self, src: &Path, request: &WarpRequest, dst: &Path) -> Result<PathBuf> {
        let source = RasterLayer::from_file(src)?;

        if let Some(target) = &request.target_crs {
            if *target != source.crs {
                return Err(GridError::Unsupported(format!(
                    "reprojection from {} to {}",
                    source.crs, target
                )));
            }
        }
        if source.geotransform.has_rotation() {
            return Err(GridError::Unsupported("warping a rotated grid".to_string()));
        }

        let bounds = request.output_bounds.unwrap_or_else(|| source.bounds());
        let width = request.width.unwrap_or(source.width);
        let height = request.height.unwrap_or(source.height);
        if width == 0 || height == 0 || bounds.width() <= 0.0 || bounds.height() <= 0.0 {
            return Err(GridError::Unsupported("warping onto an empty grid".to_string()));
        }

        let target = GeoTransform::north_up(
            bounds.min_x,
            bounds.max_y,
            bounds.width() / width as f64,
            bounds.height() / height as f64,
        );
        let spec = RasterSpec {
            width,
            height,
            geotransform: target,
            crs: source.crs.clone(),
            nodata: request.dst_nodata,
        };

        let mut sink = self.create(dst, &spec)?;
        for block in Window::tiles(width, height, WARP_BLOCK) {
            let written = self
                .resample_block(&source, &target, block, request.dst_nodata)
                .and_then(|data| sink.write_tile(block, &data));
            if let Err(e) = written {
                sink.abort();
                return Err(e);
            }
        }
        sink.finish()?;

        debug!(
            src = %src.display(),
            dst = %dst.display(),
            width,
            height,
            "Warped raster"
        );
        Ok(dst.to_path_buf())
    }
}

/// Sink staging samples in a `<name>.part` scratch file until `finish`.
#[derive(Debug)]
struct GeoTiffSink {
    spec: RasterSpec,
    path: PathBuf,
    scratch_path: PathBuf,
    scratch: Option<File>,
}

impl GeoTiffSink {
    fn create(path: &Path, spec: &RasterSpec) -> Result<Self> {
        let unwritable = |reason: String| GridError::OutputUnwritable {
            path: path.to_path_buf(),
            reason,
        };

        if spec.width == 0 || spec.height == 0 {
            return Err(unwritable("grid has no pixels".to_string()));
        }
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| unwritable("path has no file name".to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| unwritable(e.to_string()))?;
        }

        let scratch_path = path.with_file_name(format!("{}.part", file_name));
        let scratch = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&scratch_path)
            .map_err(|e| unwritable(e.to_string()))?;
        let byte_len = spec.width as u64 * spec.height as u64 * 4;
        if let Err(e) = scratch.set_len(byte_len) {
            let _ = fs::remove_file(&scratch_path);
            return Err(unwritable(e.to_string()));
        }

        Ok(Self {
            spec: spec.clone(),
            path: path.to_path_buf(),
            scratch_path,
            scratch: Some(scratch),
        })
    }

    /// Compute statistics and encode the staged samples as a GeoTIFF.
    fn encode(&mut self) -> Result<BandStatistics> {
        let mut scratch = self
            .scratch
            .take()
            .ok_or_else(|| GridError::Unsupported("sink already closed".to_string()))?;
        scratch.flush()?;

        let (width, height) = (self.spec.width, self.spec.height);
        let mut bytes = vec![0u8; width as usize * 4];
        let mut row = Vec::with_capacity(width as usize);

        // Pass 1: statistics.
        scratch.seek(SeekFrom::Start(0))?;
        let mut acc = StatsAccumulator::new();
        {
            let mut reader = BufReader::new(&mut scratch);
            for _ in 0..height {
                reader.read_exact(&mut bytes)?;
                decode_le(&bytes, &mut row);
                acc.push_all(&row, self.spec.nodata);
            }
        }
        let stats = acc.finish();

        // Pass 2: strips.
        scratch.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&mut scratch);
        let out = File::create(&self.path).map_err(|e| GridError::OutputUnwritable {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let mut encoder = TiffEncoder::new(out)?;
        let mut image = encoder.new_image::<colortype::Gray32Float>(width, height)?;
        let rows_per_strip = (STRIP_BYTES / (width as u64 * 4)).clamp(1, height as u64) as u32;
        image.rows_per_strip(rows_per_strip)?;

        let gt = self.spec.geotransform.0;
        let dir = image.encoder();
        if !self.spec.geotransform.is_north_up() {
            let matrix = [
                gt[1], gt[2], 0.0, gt[0], //
                gt[4], gt[5], 0.0, gt[3], //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ];
            dir.write_tag(tag(MODEL_TRANSFORMATION_TAG), &matrix[..])?;
        } else {
            dir.write_tag(tag(MODEL_PIXEL_SCALE_TAG), &[gt[1], -gt[5], 0.0][..])?;
            dir.write_tag(tag(MODEL_TIEPOINT_TAG), &[0.0, 0.0, 0.0, gt[0], gt[3], 0.0][..])?;
        }
        let crs = &self.spec.crs;
        if !crs.is_unknown() {
            dir.write_tag(tag(GEO_KEY_DIRECTORY_TAG), crs.geo_keys())?;
            if !crs.geo_doubles().is_empty() {
                dir.write_tag(tag(GEO_DOUBLE_PARAMS_TAG), crs.geo_doubles())?;
            }
            if !crs.geo_ascii().is_empty() {
                dir.write_tag(tag(GEO_ASCII_PARAMS_TAG), crs.geo_ascii())?;
            }
        }
        if let Some(nodata) = self.spec.nodata {
            dir.write_tag(tag(GDAL_NODATA_TAG), format_nodata(nodata).as_str())?;
        }
        if stats.valid_count > 0 {
            dir.write_tag(tag(GDAL_METADATA_TAG), statistics_xml(&stats).as_str())?;
        }

        let mut strip = Vec::new();
        loop {
            let samples = image.next_strip_sample_count() as usize;
            if samples == 0 {
                break;
            }
            bytes.resize(samples * 4, 0);
            reader.read_exact(&mut bytes)?;
            decode_le(&bytes, &mut strip);
            image.write_strip(&strip)?;
        }
        image.finish()?;

        Ok(stats)
    }
}

impl RasterSink for GeoTiffSink {
    fn spec(&self) -> &RasterSpec {
        &self.spec
    }

    fn write_tile(&mut self, window: Window, data: &[f32]) -> Result<()> {
        if !window.is_within(self.spec.width, self.spec.height) {
            return Err(GridError::WindowOutOfBounds {
                x: window.x,
                y: window.y,
                width: window.width,
                height: window.height,
                grid_width: self.spec.width,
                grid_height: self.spec.height,
            });
        }
        if data.len() != window.len() {
            return Err(GridError::TileSizeMismatch {
                expected: window.len(),
                actual: data.len(),
            });
        }
        if window.is_empty() {
            return Ok(());
        }

        let grid_width = self.spec.width as u64;
        let file = self
            .scratch
            .as_mut()
            .ok_or_else(|| GridError::Unsupported("sink already closed".to_string()))?;

        let mut row_bytes = Vec::with_capacity(window.width as usize * 4);
        for (r, row) in data.chunks_exact(window.width as usize).enumerate() {
            row_bytes.clear();
            for v in row {
                row_bytes.extend_from_slice(&v.to_le_bytes());
            }
            let offset = ((window.y as u64 + r as u64) * grid_width + window.x as u64) * 4;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&row_bytes)?;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<BandStatistics> {
        let result = self.encode();
        if result.is_err() {
            let _ = fs::remove_file(&self.path);
        }
        result
    }

    fn abort(self: Box<Self>) {
        debug!(path = %self.path.display(), "Discarding unfinished raster");
    }
}

impl Drop for GeoTiffSink {
    fn drop(&mut self) {
        self.scratch.take();
        let _ = fs::remove_file(&self.scratch_path);
    }
}

fn decode_le(bytes: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.extend(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
    );
}

/// Render statistics the way GDAL stores them in GDAL_METADATA.
fn statistics_xml(stats: &BandStatistics) -> String {
    format!(
        "<GDALMetadata>\n\
         \x20 <Item name=\"STATISTICS_MAXIMUM\" sample=\"0\">{}</Item>\n\
         \x20 <Item name=\"STATISTICS_MEAN\" sample=\"0\">{}</Item>\n\
         \x20 <Item name=\"STATISTICS_MINIMUM\" sample=\"0\">{}</Item>\n\
         \x20 <Item name=\"STATISTICS_STDDEV\" sample=\"0\">{}</Item>\n\
         \x20 <Item name=\"STATISTICS_VALID_PERCENT\" sample=\"0\">{}</Item>\n\
         </GDALMetadata>",
        stats.max,
        stats.mean,
        stats.min,
        stats.std_dev,
        stats.valid_percent()
    )
}

fn parse_statistics(xml: &str, total_count: u64) -> Option<BandStatistics> {
    let item = |name: &str| -> Option<f64> {
        let marker = format!("name=\"{}\" sample=\"0\">", name);
        let start = xml.find(&marker)? + marker.len();
        let end = start + xml[start..].find('<')?;
        xml[start..end].trim().parse().ok()
    };
    let valid_percent = item("STATISTICS_VALID_PERCENT").unwrap_or(100.0);
    Some(BandStatistics {
        min: item("STATISTICS_MINIMUM")?,
        max: item("STATISTICS_MAXIMUM")?,
        mean: item("STATISTICS_MEAN")?,
        std_dev: item("STATISTICS_STDDEV")?,
        valid_count: (valid_percent * total_count as f64 / 100.0).round() as u64,
        total_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_xml_roundtrip() {
        let stats = BandStatistics {
            min: 1.0,
            max: 7.5,
            mean: 3.25,
            std_dev: 0.5,
            valid_count: 12,
            total_count: 16,
        };
        let parsed = parse_statistics(&statistics_xml(&stats), 16).expect("parse");
        assert_eq!(parsed, stats);
    }

    #[test]
    fn test_parse_statistics_missing_items() {
        assert!(parse_statistics("<GDALMetadata></GDALMetadata>", 4).is_none());
    }

    #[test]
    fn test_decode_le() {
        let mut out = Vec::new();
        let bytes: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        decode_le(&bytes, &mut out);
        assert_eq!(out, vec![1.5, -2.0]);
    }
}
