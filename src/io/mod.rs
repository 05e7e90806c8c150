//! I/O modules: chart discovery, raster storage, vectorization and shapefiles
//!
//! The processing core only talks to the traits defined here; GDAL-backed
//! and pure-Rust implementations live in the submodules.

pub mod catalog;
pub mod gdal_store;
pub mod raster_vectorizer;
pub mod shapefile;

pub use catalog::{discover_daily_files, parse_chart_date, DailyFile};
pub use gdal_store::GdalGridStore;
pub use raster_vectorizer::RasterVectorizer;

use crate::types::{GridGeolocation, IceResult};
use geo::{MultiLineString, MultiPolygon, Polygon};
use ndarray::Array2;
use std::path::Path;

/// Polygon around one connected region of a classified grid
#[derive(Debug, Clone, PartialEq)]
pub struct IcePolygon {
    /// Pixel value of the region (the `DN` attribute)
    pub dn: u8,
    /// Outline in map coordinates
    pub geometry: Polygon<f64>,
    /// Area in map units squared
    pub area: f64,
    /// Grid cells covered by the region (row, col)
    pub pixels: Vec<(usize, usize)>,
}

/// Raster storage used by the pipeline
pub trait GridStore {
    /// Raw bytes of a daily chart
    fn read_bytes(&self, path: &Path) -> IceResult<Vec<u8>>;

    /// First band of an existing raster together with its geolocation
    fn read_grid(&self, path: &Path) -> IceResult<(Array2<u8>, GridGeolocation)>;

    /// Write a single-band raster, preserving the geolocation exactly
    fn write_grid(
        &self,
        grid: &Array2<f64>,
        path: &Path,
        geolocation: &GridGeolocation,
    ) -> IceResult<()>;
}

/// Coordinate-system conversion of finished products
pub trait Reprojector {
    fn reproject_raster(
        &self,
        src: &Path,
        dst: &Path,
        target_epsg: u32,
        resolution: f64,
    ) -> IceResult<()>;

    fn reproject_vector(&self, src: &Path, dst: &Path, target_epsg: u32) -> IceResult<()>;
}

/// Raster/vector conversion used by the noise suppression stage
pub trait Vectorizer {
    /// Polygons of all connected regions; cells where `mask` is 0 are skipped
    fn polygonize(
        &self,
        grid: &Array2<u8>,
        mask: Option<&Array2<u8>>,
        geolocation: &GridGeolocation,
    ) -> IceResult<Vec<IcePolygon>>;

    /// Burn `burn` into a zero grid of `dim` wherever a polygon lies
    fn rasterize(&self, polygons: &[IcePolygon], dim: (usize, usize), burn: u8)
        -> IceResult<Array2<u8>>;

    /// Polygon outlines as line geometries
    fn to_lines(&self, polygons: &[IcePolygon]) -> MultiLineString<f64>;

    /// Part of `lines` inside `region`
    fn clip(&self, lines: &MultiLineString<f64>, region: &MultiPolygon<f64>) -> MultiLineString<f64>;
}
