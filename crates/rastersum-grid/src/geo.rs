//! Spatial reference, geotransform and pixel-window primitives.

use std::fmt;

/// GeoKey identifying the model type (projected / geographic).
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
/// GeoKey identifying the raster type (pixel-is-area / pixel-is-point).
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
/// GeoKey carrying an EPSG geographic CRS code.
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
/// GeoKey carrying an EPSG projected CRS code.
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

/// Opaque coordinate reference system descriptor.
///
/// This is the GeoTIFF GeoKey directory together with its double and ASCII
/// parameter blocks. The crate never interprets the CRS beyond extracting an
/// EPSG code for comparison; transformation math is left to the warp engine.
#[derive(Debug, Clone, Default)]
pub struct Crs {
    keys: Vec<u16>,
    doubles: Vec<f64>,
    ascii: String,
}

impl Crs {
    /// Build a descriptor from raw GeoKey directory blocks.
    pub fn from_geokeys(keys: Vec<u16>, doubles: Vec<f64>, ascii: String) -> Self {
        Self { keys, doubles, ascii }
    }

    /// Build a minimal descriptor for an EPSG code.
    ///
    /// Codes in the 4000-4999 range are written as geographic CRSs, everything
    /// else as projected.
    pub fn from_epsg(code: u16) -> Self {
        let geographic = (4000..5000).contains(&code);
        let (model, key) = if geographic {
            (2, GEOGRAPHIC_TYPE_GEO_KEY)
        } else {
            (1, PROJECTED_CS_TYPE_GEO_KEY)
        };
        let keys = vec![
            1, 1, 0, 3, // header: version, revision, minor, key count
            GT_MODEL_TYPE_GEO_KEY, 0, 1, model,
            GT_RASTER_TYPE_GEO_KEY, 0, 1, 1,
            key, 0, 1, code,
        ];
        Self {
            keys,
            doubles: Vec::new(),
            ascii: String::new(),
        }
    }

    /// The EPSG code declared by the key directory, if any.
    pub fn epsg(&self) -> Option<u16> {
        self.key_value(PROJECTED_CS_TYPE_GEO_KEY)
            .or_else(|| self.key_value(GEOGRAPHIC_TYPE_GEO_KEY))
            // 32767 is "user-defined" in GeoTIFF, not a real code.
            .filter(|code| *code != 32767)
    }

    /// Whether the artifact carried no georeferencing keys at all.
    pub fn is_unknown(&self) -> bool {
        self.keys.is_empty()
    }

    /// Raw GeoKey directory.
    pub fn geo_keys(&self) -> &[u16] {
        &self.keys
    }

    /// Raw GeoDoubleParams block.
    pub fn geo_doubles(&self) -> &[f64] {
        &self.doubles
    }

    /// Raw GeoAsciiParams block.
    pub fn geo_ascii(&self) -> &str {
        &self.ascii
    }

    /// Look up an inline (short) key value in the directory.
    fn key_value(&self, key_id: u16) -> Option<u16> {
        if self.keys.len() < 4 {
            return None;
        }
        let count = self.keys[3] as usize;
        self.keys[4..]
            .chunks_exact(4)
            .take(count)
            .find(|entry| entry[0] == key_id && entry[1] == 0)
            .map(|entry| entry[3])
    }
}

impl PartialEq for Crs {
    fn eq(&self, other: &Self) -> bool {
        match (self.epsg(), other.epsg()) {
            (Some(a), Some(b)) => a == b,
            _ => self.keys == other.keys && self.doubles == other.doubles && self.ascii == other.ascii,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.epsg() {
            Some(code) => write!(f, "EPSG:{}", code),
            None if self.is_unknown() => f.write_str("unknown"),
            None => write!(f, "custom({} keys)", self.keys.get(3).copied().unwrap_or(0)),
        }
    }
}

/// Six-coefficient affine transform from pixel/line to georeferenced coordinates.
///
/// Layout follows the usual convention: `[origin_x, pixel_width, row_rotation,
/// origin_y, column_rotation, pixel_height]`. Pixel height is negative for
/// north-up grids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// Identity-like transform used when an artifact has no georeferencing.
    pub const UNIT: GeoTransform = GeoTransform([0.0, 1.0, 0.0, 0.0, 0.0, -1.0]);

    /// North-up transform from an origin and square-ish pixel size.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        GeoTransform([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height.abs()])
    }

    /// Build from a GeoTIFF ModelTiepoint / ModelPixelScale pair.
    ///
    /// Tiepoint format: `[i, j, k, x, y, z]` where `(i, j)` is the raster
    /// coordinate that maps to `(x, y)`.
    pub fn from_tiepoint(tiepoint: &[f64], scale: &[f64]) -> Option<Self> {
        if tiepoint.len() < 6 || scale.len() < 2 {
            return None;
        }
        let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
        let (sx, sy) = (scale[0], scale[1]);
        Some(GeoTransform([x - i * sx, sx, 0.0, y + j * sy, 0.0, -sy]))
    }

    /// Build from a 4x4 GeoTIFF ModelTransformation matrix (row-major).
    pub fn from_model_transformation(matrix: &[f64]) -> Option<Self> {
        if matrix.len() < 16 {
            return None;
        }
        Some(GeoTransform([
            matrix[3], matrix[0], matrix[1], matrix[7], matrix[4], matrix[5],
        ]))
    }

    /// Origin X (west edge for north-up grids).
    pub fn origin_x(&self) -> f64 {
        self.0[0]
    }

    /// Origin Y (north edge for north-up grids).
    pub fn origin_y(&self) -> f64 {
        self.0[3]
    }

    /// Pixel width in georeferenced units.
    pub fn pixel_width(&self) -> f64 {
        self.0[1]
    }

    /// Pixel height in georeferenced units (negative for north-up).
    pub fn pixel_height(&self) -> f64 {
        self.0[5]
    }

    /// Whether the grid is axis-aligned with rows running north to south.
    pub fn is_north_up(&self) -> bool {
        !self.has_rotation() && self.0[1] > 0.0 && self.0[5] < 0.0
    }

    /// Whether the transform carries rotation/shear terms.
    pub fn has_rotation(&self) -> bool {
        self.0[2] != 0.0 || self.0[4] != 0.0
    }

    /// Map a (fractional) pixel coordinate to georeferenced coordinates.
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        let t = &self.0;
        (t[0] + col * t[1] + row * t[2], t[3] + col * t[4] + row * t[5])
    }

    /// Map a georeferenced coordinate to a fractional pixel coordinate.
    ///
    /// Returns `None` for a degenerate (non-invertible) transform.
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let t = &self.0;
        let det = t[1] * t[5] - t[2] * t[4];
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let dx = x - t[0];
        let dy = y - t[3];
        let col = (dx * t[5] - dy * t[2]) / det;
        let row = (dy * t[1] - dx * t[4]) / det;
        Some((col, row))
    }

    /// Bounding box of a `width` x `height` grid under this transform.
    ///
    /// For a north-up grid: `xmin = t[0]`, `ymax = t[3]`,
    /// `xmax = xmin + width * t[1]`, `ymin = ymax + height * t[5]`.
    pub fn bounds(&self, width: u32, height: u32) -> Bounds {
        let x0 = self.0[0];
        let y0 = self.0[3];
        let x1 = x0 + width as f64 * self.0[1];
        let y1 = y0 + height as f64 * self.0[5];
        Bounds {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
        }
    }

    /// Coefficient-wise comparison with a relative tolerance.
    ///
    /// Transforms rebuilt from bounds and dimensions pick up rounding noise in
    /// the last bits; exact float equality would flag them as different grids.
    pub fn approx_eq(&self, other: &GeoTransform) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(a, b)| {
            let scale = a.abs().max(b.abs()).max(1.0);
            (a - b).abs() <= 1e-9 * scale
        })
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::UNIT
    }
}

/// Axis-aligned bounding box in georeferenced units.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    /// West edge.
    pub min_x: f64,
    /// South edge.
    pub min_y: f64,
    /// East edge.
    pub max_x: f64,
    /// North edge.
    pub max_y: f64,
}

impl Bounds {
    /// Extent along X.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Extent along Y.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Check if a coordinate is within the bounds (edges inclusive).
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// Rectangular pixel window `[x, x + width) x [y, y + height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    /// Column offset.
    pub x: u32,
    /// Row offset.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Window {
    /// Create a window.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Window covering a whole grid.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Number of pixels in the window.
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether the window contains no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the window lies entirely inside a `grid_width` x `grid_height` grid.
    pub fn is_within(&self, grid_width: u32, grid_height: u32) -> bool {
        self.x as u64 + self.width as u64 <= grid_width as u64
            && self.y as u64 + self.height as u64 <= grid_height as u64
    }

    /// Intersection of this window with a `grid_width` x `grid_height` grid.
    ///
    /// Returns an empty window when they do not overlap.
    pub fn clip(&self, grid_width: u32, grid_height: u32) -> Window {
        let x = self.x.min(grid_width);
        let y = self.y.min(grid_height);
        let x_end = (self.x as u64 + self.width as u64).min(grid_width as u64) as u32;
        let y_end = (self.y as u64 + self.height as u64).min(grid_height as u64) as u32;
        Window::new(x, y, x_end.saturating_sub(x), y_end.saturating_sub(y))
    }

    /// Partition a grid into square tiles of `edge` pixels in row-major order.
    ///
    /// The last column and row of tiles are clipped to the grid, so no tile
    /// ever reaches outside `[0, width) x [0, height)`.
    pub fn tiles(width: u32, height: u32, edge: u32) -> Vec<Window> {
        if edge == 0 || width == 0 || height == 0 {
            return Vec::new();
        }
        let mut tiles = Vec::new();
        for y in (0..height).step_by(edge as usize) {
            let h = edge.min(height - y);
            for x in (0..width).step_by(edge as usize) {
                let w = edge.min(width - x);
                tiles.push(Window::new(x, y, w, h));
            }
        }
        tiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crs_epsg_roundtrip() {
        let crs = Crs::from_epsg(32717);
        assert_eq!(crs.epsg(), Some(32717));
        assert_eq!(crs.to_string(), "EPSG:32717");

        let geographic = Crs::from_epsg(4326);
        assert_eq!(geographic.epsg(), Some(4326));
        assert_ne!(crs, geographic);
    }

    #[test]
    fn test_crs_equality_ignores_key_layout() {
        // Same EPSG code, but the directory carries an extra citation key.
        let mut keys = Crs::from_epsg(32717).geo_keys().to_vec();
        keys[3] = 4;
        keys.extend_from_slice(&[1026, 34737, 5, 0]);
        let verbose = Crs::from_geokeys(keys, Vec::new(), "WGS84|".to_string());

        assert_eq!(verbose, Crs::from_epsg(32717));
    }

    #[test]
    fn test_crs_unknown() {
        let crs = Crs::default();
        assert!(crs.is_unknown());
        assert_eq!(crs.epsg(), None);
        assert_eq!(crs, Crs::default());
        assert_eq!(crs.to_string(), "unknown");
    }

    #[test]
    fn test_geotransform_from_tiepoint() {
        let gt = GeoTransform::from_tiepoint(&[0.0, 0.0, 0.0, 500_000.0, 9_700_000.0, 0.0], &[30.0, 30.0, 0.0])
            .expect("valid tiepoint");
        assert_eq!(gt.0, [500_000.0, 30.0, 0.0, 9_700_000.0, 0.0, -30.0]);
    }

    #[test]
    fn test_geotransform_bounds() {
        let gt = GeoTransform::north_up(100.0, 200.0, 10.0, 10.0);
        let b = gt.bounds(4, 3);
        assert_eq!(b.min_x, 100.0);
        assert_eq!(b.max_x, 140.0);
        assert_eq!(b.max_y, 200.0);
        assert_eq!(b.min_y, 170.0);
        assert!(b.contains(120.0, 180.0));
        assert!(!b.contains(150.0, 180.0));
    }

    #[test]
    fn test_geotransform_inverse() {
        let gt = GeoTransform::north_up(100.0, 200.0, 10.0, 10.0);
        let (x, y) = gt.pixel_to_geo(2.5, 1.5);
        let (col, row) = gt.geo_to_pixel(x, y).expect("invertible");
        assert!((col - 2.5).abs() < 1e-12);
        assert!((row - 1.5).abs() < 1e-12);

        let degenerate = GeoTransform([0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(degenerate.geo_to_pixel(1.0, 1.0).is_none());
    }

    #[test]
    fn test_geotransform_approx_eq() {
        let a = GeoTransform::north_up(500_000.0, 9_700_000.0, 30.0, 30.0);
        let mut b = a;
        b.0[1] = 30.000_000_000_001;
        assert!(a.approx_eq(&b));
        b.0[0] += 1.0;
        assert!(!a.approx_eq(&b));
    }

    #[test]
    fn test_tiles_clip_to_grid() {
        let tiles = Window::tiles(600, 300, 256);
        assert_eq!(tiles.len(), 6);
        assert_eq!(tiles[0], Window::new(0, 0, 256, 256));
        assert_eq!(tiles[2], Window::new(512, 0, 88, 256));
        assert_eq!(tiles[5], Window::new(512, 256, 88, 44));
        assert!(tiles.iter().all(|t| t.is_within(600, 300)));
        let covered: usize = tiles.iter().map(Window::len).sum();
        assert_eq!(covered, 600 * 300);
    }

    #[test]
    fn test_tiles_degenerate() {
        assert!(Window::tiles(0, 10, 256).is_empty());
        assert!(Window::tiles(10, 10, 0).is_empty());
        assert_eq!(Window::tiles(4, 4, 256), vec![Window::full(4, 4)]);
    }

    #[test]
    fn test_window_clip() {
        assert_eq!(Window::new(2, 2, 10, 10).clip(8, 6), Window::new(2, 2, 6, 4));
        assert_eq!(Window::new(0, 0, 4, 4).clip(8, 8), Window::new(0, 0, 4, 4));
        assert!(Window::new(9, 9, 2, 2).clip(8, 8).is_empty());
    }

    #[test]
    fn test_north_up() {
        assert!(GeoTransform::north_up(0.0, 0.0, 1.0, 1.0).is_north_up());
        assert!(!GeoTransform([0.0, 1.0, 0.5, 0.0, 0.0, -1.0]).is_north_up());
    }
}
