//! Raster metadata reader.

use crate::geo::{Bounds, Crs, GeoTransform};
use crate::{GridError, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

/// No-data sentinel assumed when an artifact declares none.
pub const DEFAULT_NODATA: f32 = 255.0;

pub(crate) const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
pub(crate) const MODEL_TIEPOINT_TAG: u16 = 33922;
pub(crate) const MODEL_TRANSFORMATION_TAG: u16 = 34264;
pub(crate) const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
pub(crate) const GEO_DOUBLE_PARAMS_TAG: u16 = 34736;
pub(crate) const GEO_ASCII_PARAMS_TAG: u16 = 34737;
pub(crate) const GDAL_METADATA_TAG: u16 = 42112;
pub(crate) const GDAL_NODATA_TAG: u16 = 42113;

/// Resolve a numeric tag code to the decoder's own tag value.
///
/// Going through `from_u16_exhaustive` keeps lookups working whether or not
/// the `tiff` crate has a named variant for the code.
pub(crate) fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Metadata of a raster artifact on durable storage.
///
/// Only band 1 is considered. Values are re-read from disk on every
/// [`RasterLayer::from_file`] call; nothing is cached.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterLayer {
    /// Path the metadata was read from.
    pub path: PathBuf,
    /// Coordinate reference system descriptor.
    pub crs: Crs,
    /// Pixel-to-georeferenced transform.
    pub geotransform: GeoTransform,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Effective no-data value ([`DEFAULT_NODATA`] when none is declared).
    pub nodata: f32,
    /// The no-data value exactly as declared by the artifact.
    pub declared_nodata: Option<f32>,
}

impl RasterLayer {
    /// Read the metadata of a GeoTIFF artifact.
    ///
    /// Any failure to open or decode the header is reported as
    /// [`GridError::ArtifactUnreadable`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut decoder = open_decoder(path).map_err(|e| GridError::unreadable(path, e))?;

        let (width, height) = decoder
            .dimensions()
            .map_err(|e| GridError::unreadable(path, e))?;
        if width == 0 || height == 0 {
            return Err(GridError::unreadable(path, "raster has no pixels"));
        }

        let geotransform = read_geotransform(&mut decoder).unwrap_or_default();
        let crs = read_crs(&mut decoder);
        let declared_nodata = read_nodata_value(&mut decoder);

        Ok(Self {
            path: path.to_path_buf(),
            crs,
            geotransform,
            width,
            height,
            nodata: declared_nodata.unwrap_or(DEFAULT_NODATA),
            declared_nodata,
        })
    }

    /// Get the dimensions of this layer in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Get the georeferenced bounds of this layer.
    pub fn bounds(&self) -> Bounds {
        self.geotransform.bounds(self.width, self.height)
    }

    /// Whether this layer shares CRS, dimensions and geotransform with `other`.
    pub fn is_congruent_with(&self, other: &RasterLayer) -> bool {
        self.crs == other.crs
            && self.width == other.width
            && self.height == other.height
            && self.geotransform.approx_eq(&other.geotransform)
    }

    /// Whether a sample equals this layer's declared no-data value.
    pub fn is_nodata(&self, value: f32) -> bool {
        match self.declared_nodata {
            Some(nodata) if nodata.is_nan() => value.is_nan(),
            Some(nodata) => value == nodata,
            None => value == DEFAULT_NODATA,
        }
    }
}

/// Read the metadata of a raster artifact.
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<RasterLayer> {
    RasterLayer::from_file(path)
}

/// Open a TIFF decoder with limits large enough for big classified layers.
pub(crate) fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path)?;
    let decoder = Decoder::new(BufReader::new(file))?;

    // Individual chunks can be large for single-strip files; allow up to 1 GB.
    let mut limits = Limits::default();
    limits.decoding_buffer_size = 1024 * 1024 * 1024;
    limits.intermediate_buffer_size = 1024 * 1024 * 1024;
    limits.ifd_value_size = 1024 * 1024 * 1024;
    Ok(decoder.with_limits(limits))
}

/// Read the geotransform from ModelTiepoint/ModelPixelScale or ModelTransformation.
fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let tiepoint = decoder.get_tag_f64_vec(tag(MODEL_TIEPOINT_TAG));
    let pixel_scale = decoder.get_tag_f64_vec(tag(MODEL_PIXEL_SCALE_TAG));

    if let (Ok(tiepoint), Ok(scale)) = (tiepoint, pixel_scale) {
        if let Some(gt) = GeoTransform::from_tiepoint(&tiepoint, &scale) {
            return Some(gt);
        }
    }

    decoder
        .get_tag_f64_vec(tag(MODEL_TRANSFORMATION_TAG))
        .ok()
        .and_then(|matrix| GeoTransform::from_model_transformation(&matrix))
}

/// Read the GeoKey directory and its parameter blocks.
fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Crs {
    let keys = decoder
        .get_tag_u16_vec(tag(GEO_KEY_DIRECTORY_TAG))
        .unwrap_or_default();
    if keys.is_empty() {
        return Crs::default();
    }
    let doubles = decoder
        .get_tag_f64_vec(tag(GEO_DOUBLE_PARAMS_TAG))
        .unwrap_or_default();
    let ascii = decoder
        .get_tag_ascii_string(tag(GEO_ASCII_PARAMS_TAG))
        .unwrap_or_default();
    Crs::from_geokeys(keys, doubles, ascii)
}

/// Try to read the no-data value from the GDAL_NODATA tag.
fn read_nodata_value<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
    // GDAL_NODATA is stored as an ASCII string, sometimes NUL-terminated.
    let raw = decoder.get_tag_ascii_string(tag(GDAL_NODATA_TAG)).ok()?;
    parse_nodata(&raw)
}

pub(crate) fn parse_nodata(raw: &str) -> Option<f32> {
    let trimmed = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if trimmed.eq_ignore_ascii_case("nan") {
        return Some(f32::NAN);
    }
    trimmed.parse::<f64>().ok().map(|v| v as f32)
}

pub(crate) fn format_nodata(value: f32) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        format!("{}", value)
    }
}

/// Convert any decoded sample buffer to f32.
pub(crate) fn samples_to_f32(result: DecodingResult) -> Result<Vec<f32>> {
    match result {
        DecodingResult::F32(data) => Ok(data),
        DecodingResult::F64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        #[allow(unreachable_patterns)]
        _ => Err(GridError::Unsupported("sample format".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nodata() {
        assert_eq!(parse_nodata("255"), Some(255.0));
        assert_eq!(parse_nodata("-9999\0"), Some(-9999.0));
        assert_eq!(parse_nodata(" 0 "), Some(0.0));
        assert!(parse_nodata("nan").is_some_and(f32::is_nan));
        assert_eq!(parse_nodata("abc"), None);
    }

    #[test]
    fn test_format_nodata() {
        assert_eq!(format_nodata(255.0), "255");
        assert_eq!(format_nodata(-3.5), "-3.5");
        assert_eq!(format_nodata(f32::NAN), "nan");
        assert_eq!(parse_nodata(&format_nodata(-3.5)), Some(-3.5));
    }

    #[test]
    fn test_is_nodata() {
        let mut layer = RasterLayer {
            path: PathBuf::from("a.tif"),
            crs: Crs::default(),
            geotransform: GeoTransform::default(),
            width: 1,
            height: 1,
            nodata: DEFAULT_NODATA,
            declared_nodata: None,
        };
        assert!(layer.is_nodata(255.0));
        assert!(!layer.is_nodata(0.0));

        layer.declared_nodata = Some(f32::NAN);
        assert!(layer.is_nodata(f32::NAN));
        assert!(!layer.is_nodata(255.0));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let err = RasterLayer::from_file("/definitely/not/here.tif").unwrap_err();
        assert!(matches!(err, GridError::ArtifactUnreadable { .. }));
    }
}
