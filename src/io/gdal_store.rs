use crate::io::{shapefile, GridStore, Reprojector};
use crate::types::{GeoTransform, GridGeolocation, IceError, IceResult};
use gdal::raster::Buffer;
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// Extra points per bounding-box edge when projecting raster extents
const BOUNDS_DENSIFY_POINTS: i32 = 21;

/// GeoTIFF raster store and reprojector backed by GDAL
#[derive(Debug, Clone, Default)]
pub struct GdalGridStore;

impl GdalGridStore {
    pub fn new() -> Self {
        Self
    }
}

/// Parse a WKT, PROJ or `EPSG:n` definition, using x/y (lon/lat) axis order
pub(crate) fn spatial_ref_from(definition: &str) -> IceResult<SpatialRef> {
    let srs = SpatialRef::from_definition(definition)?;
    traditional_axis_order(&srs);
    Ok(srs)
}

pub(crate) fn spatial_ref_from_epsg(epsg: u32) -> IceResult<SpatialRef> {
    let srs = SpatialRef::from_epsg(epsg)?;
    traditional_axis_order(&srs);
    Ok(srs)
}

fn traditional_axis_order(srs: &SpatialRef) {
    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
}

impl GridStore for GdalGridStore {
    fn read_bytes(&self, path: &Path) -> IceResult<Vec<u8>> {
        log::debug!("Reading {}", path.display());
        Ok(std::fs::read(path)?)
    }

    fn read_grid(&self, path: &Path) -> IceResult<(Array2<u8>, GridGeolocation)> {
        log::info!("Reading raster from: {}", path.display());

        let dataset = Dataset::open(path)?;
        let geo_transform = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();
        log::debug!("Raster size: {}x{}, geotransform {:?}", width, height, geo_transform);

        let rasterband = dataset.rasterband(1)?;
        let band_data = rasterband.read_as::<u8>((0, 0), (width, height), (width, height), None)?;
        let grid = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| IceError::Processing(format!("Failed to reshape raster data: {}", e)))?;

        let geolocation = GridGeolocation {
            transform: GeoTransform::from_gdal(geo_transform),
            projection: dataset.projection(),
        };
        Ok((grid, geolocation))
    }

    fn write_grid(
        &self,
        grid: &Array2<f64>,
        path: &Path,
        geolocation: &GridGeolocation,
    ) -> IceResult<()> {
        log::info!("Saving GeoTIFF: {}", path.display());

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = grid.dim();
        let mut dataset =
            driver.create_with_band_type::<f64, _>(path, width as isize, height as isize, 1)?;

        dataset.set_geo_transform(&geolocation.transform.to_gdal())?;
        if geolocation.projection.is_empty() {
            log::warn!("No projection for {}, writing without a CRS", path.display());
        } else {
            dataset.set_spatial_ref(&spatial_ref_from(&geolocation.projection)?)?;
        }

        let mut rasterband = dataset.rasterband(1)?;
        let flat_data: Vec<f64> = grid.iter().cloned().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;
        Ok(())
    }
}

impl Reprojector for GdalGridStore {
    fn reproject_raster(
        &self,
        src: &Path,
        dst: &Path,
        target_epsg: u32,
        resolution: f64,
    ) -> IceResult<()> {
        if resolution <= 0.0 {
            return Err(IceError::Config(format!("invalid resolution {}", resolution)));
        }
        log::info!(
            "Reprojecting {} to EPSG:{} at {} m",
            src.display(),
            target_epsg,
            resolution
        );

        let source = Dataset::open(src)?;
        let gt = source.geo_transform()?;
        let (width, height) = source.raster_size();
        let source_srs = source.spatial_ref()?;
        traditional_axis_order(&source_srs);
        let target_srs = spatial_ref_from_epsg(target_epsg)?;

        let corner = GeoTransform::from_gdal(gt);
        let (x0, y0) = corner.pixel_to_map(0.0, 0.0);
        let (x1, y1) = corner.pixel_to_map(width as f64, height as f64);
        let bounds = [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)];

        let transform = CoordTransform::new(&source_srs, &target_srs)?;
        let [min_x, min_y, max_x, max_y] = transform.transform_bounds(&bounds, BOUNDS_DENSIFY_POINTS)?;

        let cols = ((max_x - min_x) / resolution).ceil().max(1.0) as isize;
        let rows = ((max_y - min_y) / resolution).ceil().max(1.0) as isize;
        log::debug!("Reprojected grid: {}x{}", cols, rows);

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut target = driver.create_with_band_type::<f64, _>(dst, cols, rows, 1)?;
        target.set_geo_transform(&[min_x, resolution, 0.0, max_y, 0.0, -resolution])?;
        target.set_spatial_ref(&target_srs)?;

        gdal::raster::reproject(&source, &target)?;
        Ok(())
    }

    fn reproject_vector(&self, src: &Path, dst: &Path, target_epsg: u32) -> IceResult<()> {
        log::info!("Reprojecting {} to EPSG:{}", src.display(), target_epsg);
        shapefile::reproject_layer(src, dst, &spatial_ref_from_epsg(target_epsg)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_geotiff_round_trip_keeps_geolocation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("icechart_maximum201404_201404.tif");
        let store = GdalGridStore::new();
        let geolocation = GridGeolocation::default();

        let grid = Array2::from_shape_fn((4, 3), |(r, c)| match (r, c) {
            (0, 0) => 254.0,
            (3, 2) => 253.0,
            _ => ((r + c) % 2) as f64,
        });
        store.write_grid(&grid, &path, &geolocation).unwrap();

        let (read, read_geolocation) = store.read_grid(&path).unwrap();
        assert_eq!(read.dim(), (4, 3));
        assert_eq!(read[[0, 0]], 254);
        assert_eq!(read[[3, 2]], 253);
        assert_eq!(read[[0, 1]], 1);
        assert_eq!(read_geolocation.transform, geolocation.transform);
        assert!(!read_geolocation.projection.is_empty());
    }

    #[test]
    fn test_read_bytes_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = GdalGridStore::new()
            .read_bytes(&dir.path().join("nt_20140401_f17_v1.1_n.bin"))
            .unwrap_err();
        assert!(matches!(err, IceError::Io(_)));
    }
}
