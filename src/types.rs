use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw NSIDC concentration code (0-250 concentration x 2.5, 251-255 flags)
pub type ConcentrationCode = u8;

/// 2D grid of raw concentration codes (rows x cols)
pub type CodeGrid = Array2<ConcentrationCode>;

/// Zone mask: 0 = normal ocean, other values select a filter zone
pub type MaskGrid = Array2<u8>;

/// Reference land mask carrying sentinel codes on land, coast and pole hole
pub type LandMask = Array2<u8>;

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// NSIDC polar stereographic north, 25 km grid
    pub fn nsidc_north() -> Self {
        Self {
            top_left_x: -3_850_000.0,
            pixel_width: 25_000.0,
            rotation_x: 0.0,
            top_left_y: 5_850_000.0,
            rotation_y: 0.0,
            pixel_height: -25_000.0,
        }
    }

    /// Build from the GDAL coefficient order
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Area covered by a single pixel in map units squared
    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y).abs()
    }

    /// Map coordinates of a (fractional) pixel position
    pub fn pixel_to_map(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Same pixel lattice, up to a millionth of a pixel
    pub fn aligns_with(&self, other: &GeoTransform) -> bool {
        let tolerance = 1e-6 * self.pixel_width.abs().max(self.pixel_height.abs());
        self.to_gdal()
            .iter()
            .zip(other.to_gdal().iter())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::nsidc_north()
    }
}

/// Geolocation shared by every grid of a run, opaque to the algorithms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridGeolocation {
    pub transform: GeoTransform,
    /// Projection as WKT or PROJ string
    pub projection: String,
}

impl GridGeolocation {
    pub const NSIDC_NORTH_PROJ4: &'static str = "+proj=stere +lat_0=90 +lat_ts=70 +lon_0=-45 +k=1 +x_0=0 +y_0=0 +a=6378273 +b=6356889.449 +units=m +no_defs";
}

impl Default for GridGeolocation {
    fn default() -> Self {
        Self {
            transform: GeoTransform::nsidc_north(),
            projection: Self::NSIDC_NORTH_PROJ4.to_string(),
        }
    }
}

/// One decoded daily concentration chart
#[derive(Debug, Clone, PartialEq)]
pub struct ConcentrationGrid {
    date: NaiveDate,
    codes: CodeGrid,
}

impl ConcentrationGrid {
    pub fn new(date: NaiveDate, codes: CodeGrid) -> Self {
        Self { date, codes }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn codes(&self) -> &CodeGrid {
        &self.codes
    }

    pub fn dim(&self) -> (usize, usize) {
        self.codes.dim()
    }

    pub fn into_codes(self) -> CodeGrid {
        self.codes
    }
}

/// Daily charts of one averaging period, ordered by date.
///
/// Dates are strictly increasing but need not be contiguous: a missing
/// day is simply absent from the series.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSeries {
    grids: Vec<ConcentrationGrid>,
    geolocation: GridGeolocation,
    dim: (usize, usize),
}

impl GridSeries {
    /// Build a series, sorting by date and validating shapes against `dim`
    pub fn new(
        mut grids: Vec<ConcentrationGrid>,
        geolocation: GridGeolocation,
        dim: (usize, usize),
    ) -> IceResult<Self> {
        grids.sort_by_key(|g| g.date());

        for pair in grids.windows(2) {
            if pair[0].date() == pair[1].date() {
                return Err(IceError::InvalidSeries(format!(
                    "duplicate chart for {}",
                    pair[0].date()
                )));
            }
        }

        for grid in &grids {
            if grid.dim() != dim {
                return Err(IceError::ShapeMismatch {
                    what: format!("chart {}", grid.date()),
                    expected: dim,
                    actual: grid.dim(),
                });
            }
        }

        Ok(Self {
            grids,
            geolocation,
            dim,
        })
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    pub fn grids(&self) -> &[ConcentrationGrid] {
        &self.grids
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.grids.iter().map(|g| g.date()).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.grids.first().map(|g| g.date())
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.grids.last().map(|g| g.date())
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn geolocation(&self) -> &GridGeolocation {
        &self.geolocation
    }

    /// Chart for `date`, or `None` when that day's file is absent
    pub fn get(&self, date: NaiveDate) -> Option<&ConcentrationGrid> {
        self.grids
            .binary_search_by_key(&date, |g| g.date())
            .ok()
            .map(|idx| &self.grids[idx])
    }

    /// Same dates and geolocation with replaced codes, one grid per date
    pub(crate) fn with_codes(&self, codes: Vec<CodeGrid>) -> IceResult<Self> {
        if codes.len() != self.grids.len() {
            return Err(IceError::Processing(format!(
                "expected {} filtered charts, got {}",
                self.grids.len(),
                codes.len()
            )));
        }
        let grids = self
            .grids
            .iter()
            .zip(codes)
            .map(|(g, c)| ConcentrationGrid::new(g.date(), c))
            .collect();
        Self::new(grids, self.geolocation.clone(), self.dim)
    }
}

/// Processing stage reported on fatal errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Discover,
    Decode,
    TemporalFilter,
    Aggregate,
    NoiseSuppression,
    Output,
    Reproject,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Discover => write!(f, "discover"),
            PipelineStage::Decode => write!(f, "decode"),
            PipelineStage::TemporalFilter => write!(f, "temporal filter"),
            PipelineStage::Aggregate => write!(f, "aggregate"),
            PipelineStage::NoiseSuppression => write!(f, "noise suppression"),
            PipelineStage::Output => write!(f, "output"),
            PipelineStage::Reproject => write!(f, "reproject"),
        }
    }
}

/// Error types for sea-ice processing
#[derive(Debug, thiserror::Error)]
pub enum IceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: expected {expected} bytes, got {actual}")]
    Decode { expected: usize, actual: usize },

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Decode error: corrupt gzip payload: {0}")]
    CorruptCompression(String),

    #[error("Geolocation mismatch for {what}: expected {expected:?}, got {actual:?}")]
    GeolocationMismatch {
        what: String,
        expected: [f64; 6],
        actual: [f64; 6],
    },

    #[error("No daily charts to aggregate")]
    EmptySeries,

    #[error("Invalid series: {0}")]
    InvalidSeries(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("{stage} failed for {context}: {source}")]
    Stage {
        stage: PipelineStage,
        context: String,
        #[source]
        source: Box<IceError>,
    },
}

impl IceError {
    /// Attach the failing stage and offending date/path
    pub fn at(self, stage: PipelineStage, context: impl Into<String>) -> Self {
        IceError::Stage {
            stage,
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, unwrapping stage context
    pub fn root(&self) -> &IceError {
        match self {
            IceError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type for sea-ice operations
pub type IceResult<T> = Result<T, IceError>;

/// Fail with `ShapeMismatch` unless both grids have the same dimensions
pub(crate) fn ensure_same_dim(
    what: &str,
    expected: (usize, usize),
    actual: (usize, usize),
) -> IceResult<()> {
    if expected != actual {
        return Err(IceError::ShapeMismatch {
            what: what.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}
