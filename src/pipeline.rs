//! End-to-end processing of one averaging period
//!
//! decode -> coastal filter -> consecutive-day filter -> aggregate ->
//! noise suppression of the extents -> persistence masked by the final
//! maximum extent. Output and reprojection are separate steps so the
//! processing itself never touches the filesystem.

use crate::config::PipelineConfig;
use crate::core::aggregate::AggregationEngine;
use crate::core::decoder::GridDecoder;
use crate::core::noise::{ExtentProduct, NoiseSuppressionStage};
use crate::core::temporal_filter::{FilterReport, TemporalFilter};
use crate::io::{shapefile, DailyFile, GridStore, Reprojector, Vectorizer};
use crate::types::{
    ensure_same_dim, GridGeolocation, GridSeries, IceError, IceResult, LandMask, MaskGrid,
    PipelineStage,
};
use chrono::NaiveDate;
use geo::MultiPolygon;
use ndarray::Array2;
use std::fs;
use std::path::{Path, PathBuf};

/// Static rasters and regions shared by every day of a run
#[derive(Debug, Clone)]
pub struct ReferenceMasks {
    /// Sentinel codes on land, coast and pole hole
    pub land: LandMask,
    /// Coastal-error zones (1 coast, 2 enclosed sea, 3 never ice)
    pub zones: MaskGrid,
    /// Nonzero inside the enclosed sea, for the separate polygon pass
    pub enclosed_sea: Option<MaskGrid>,
    /// Ocean region the ice-edge lines are clipped to
    pub coastline: Option<MultiPolygon<f64>>,
}

impl ReferenceMasks {
    pub fn new(land: LandMask, zones: MaskGrid) -> Self {
        Self {
            land,
            zones,
            enclosed_sea: None,
            coastline: None,
        }
    }

    pub fn with_enclosed_sea(mut self, mask: MaskGrid) -> Self {
        self.enclosed_sea = Some(mask);
        self
    }

    pub fn with_coastline(mut self, region: MultiPolygon<f64>) -> Self {
        self.coastline = Some(region);
        self
    }

    fn validate(&self, dim: (usize, usize)) -> IceResult<()> {
        ensure_same_dim("land mask", dim, self.land.dim())?;
        ensure_same_dim("zone mask", dim, self.zones.dim())?;
        if let Some(mask) = &self.enclosed_sea {
            ensure_same_dim("enclosed-sea mask", dim, mask.dim())?;
        }
        Ok(())
    }
}

/// Everything derived from one averaging period
#[derive(Debug, Clone)]
pub struct IceProducts {
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    /// Number of charts folded
    pub days: usize,
    pub day_count: Array2<u32>,
    /// Masked by the noise-suppressed maximum extent
    pub persistence: Array2<f64>,
    pub maximum: ExtentProduct,
    pub minimum: ExtentProduct,
    pub coastal_report: Option<FilterReport>,
    pub consecutive_report: Option<FilterReport>,
    pub geolocation: GridGeolocation,
}

impl IceProducts {
    /// `YYYYMM_YYYYMM` tag of the period, used in every output name
    pub fn period_tag(&self) -> String {
        format!(
            "{}_{}",
            self.first_date.format("%Y%m"),
            self.last_date.format("%Y%m")
        )
    }
}

/// Paths of the files written for one period
#[derive(Debug, Clone, PartialEq)]
pub struct ProductPaths {
    pub day_count: PathBuf,
    pub persistence: PathBuf,
    pub maximum: PathBuf,
    pub minimum: PathBuf,
    pub maximum_polygons: PathBuf,
    pub minimum_polygons: PathBuf,
    pub maximum_lines: PathBuf,
    pub minimum_lines: PathBuf,
}

impl ProductPaths {
    pub fn new(out_dir: &Path, tag: &str) -> Self {
        let name = |prefix: &str, ext: &str| out_dir.join(format!("icechart_{}{}.{}", prefix, tag, ext));
        Self {
            day_count: name("NumberOfDays", "tif"),
            persistence: name("persistencemap", "tif"),
            maximum: name("maximum", "tif"),
            minimum: name("minimum", "tif"),
            maximum_polygons: name("poly_maximum", "shp"),
            minimum_polygons: name("poly_minimum", "shp"),
            maximum_lines: name("line_maximum", "shp"),
            minimum_lines: name("line_minimum", "shp"),
        }
    }

    pub fn rasters(&self) -> [&Path; 4] {
        [&self.day_count, &self.persistence, &self.maximum, &self.minimum]
    }

    pub fn vectors(&self) -> [&Path; 4] {
        [
            &self.maximum_polygons,
            &self.minimum_polygons,
            &self.maximum_lines,
            &self.minimum_lines,
        ]
    }
}

/// Sea-ice persistence processor over a storage and a vectorization backend
pub struct PersistencePipeline<S: GridStore, V: Vectorizer> {
    config: PipelineConfig,
    store: S,
    vectorizer: V,
}

impl<S: GridStore, V: Vectorizer> PersistencePipeline<S, V> {
    pub fn new(config: PipelineConfig, store: S, vectorizer: V) -> IceResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            vectorizer,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Read a reference raster and check it against the configured layout and geotransform
    pub fn load_mask(&self, path: &Path) -> IceResult<MaskGrid> {
        let (grid, geolocation) = self
            .store
            .read_grid(path)
            .map_err(|e| e.at(PipelineStage::Discover, path.display().to_string()))?;
        ensure_same_dim(
            &path.display().to_string(),
            self.config.layout.dim(),
            grid.dim(),
        )?;
        if !geolocation.transform.aligns_with(&self.config.geolocation.transform) {
            return Err(IceError::GeolocationMismatch {
                what: path.display().to_string(),
                expected: self.config.geolocation.transform.to_gdal(),
                actual: geolocation.transform.to_gdal(),
            });
        }
        Ok(grid)
    }

    /// Decode every daily file; the first failure aborts with its date and path
    pub fn load_series(&self, files: &[DailyFile]) -> IceResult<GridSeries> {
        log::info!("Decoding {} daily charts", files.len());
        let decoder = GridDecoder::new(self.config.layout);

        let grids = files
            .iter()
            .map(|file| {
                let context = format!("{} ({})", file.date, file.path.display());
                let bytes = self
                    .store
                    .read_bytes(&file.path)
                    .map_err(|e| e.at(PipelineStage::Decode, context.clone()))?;
                decoder
                    .decode_grid(file.date, &bytes)
                    .map_err(|e| e.at(PipelineStage::Decode, context))
            })
            .collect::<IceResult<Vec<_>>>()?;

        GridSeries::new(
            grids,
            self.config.geolocation.clone(),
            self.config.layout.dim(),
        )
        .map_err(|e| e.at(PipelineStage::Decode, "daily series"))
    }

    /// Filter, aggregate and clean one series
    pub fn process(&self, series: &GridSeries, masks: &ReferenceMasks) -> IceResult<IceProducts> {
        let (first_date, last_date) = match (series.first_date(), series.last_date()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(IceError::EmptySeries.at(PipelineStage::Aggregate, "daily series")),
        };
        let period = format!("{} to {}", first_date, last_date);
        masks
            .validate(series.dim())
            .map_err(|e| e.at(PipelineStage::TemporalFilter, period.clone()))?;

        let policy = &self.config.policy;
        let filter = TemporalFilter::new(policy, &masks.zones, &masks.land);

        let mut filtered = None;
        let mut coastal_report = None;
        if let Some(params) = &self.config.coastal_filter {
            let (out, report) = filter
                .suppress_coastal_errors(series, params)
                .map_err(|e| e.at(PipelineStage::TemporalFilter, period.clone()))?;
            filtered = Some(out);
            coastal_report = Some(report);
        }

        let mut consecutive_report = None;
        if let Some(params) = &self.config.consecutive_day_filter {
            let input = filtered.as_ref().unwrap_or(series);
            let (out, report) = filter
                .confirm_consecutive_days(input, params)
                .map_err(|e| e.at(PipelineStage::TemporalFilter, period.clone()))?;
            filtered = Some(out);
            consecutive_report = Some(report);
        }
        let filtered = filtered.as_ref().unwrap_or(series);

        let engine = AggregationEngine::new(policy, &masks.land);
        let aggregates = engine
            .aggregate(filtered)
            .map_err(|e| e.at(PipelineStage::Aggregate, period.clone()))?;

        let geolocation = series.geolocation();
        let mut stage = NoiseSuppressionStage::new(
            &self.vectorizer,
            policy,
            &masks.land,
            geolocation,
            self.config.noise,
        );
        if let Some(mask) = &masks.enclosed_sea {
            stage = stage.with_enclosed_sea(mask);
        }
        if let Some(region) = &masks.coastline {
            stage = stage.with_coastline(region);
        }

        let maximum = stage
            .suppress_maximum(&aggregates.maximum)
            .map_err(|e| e.at(PipelineStage::NoiseSuppression, format!("maximum extent, {}", period)))?;
        let minimum = stage
            .suppress_minimum(&aggregates.minimum)
            .map_err(|e| e.at(PipelineStage::NoiseSuppression, format!("minimum extent, {}", period)))?;

        let persistence = engine
            .mask_persistence(&aggregates.persistence, &maximum.raster)
            .map_err(|e| e.at(PipelineStage::Aggregate, period.clone()))?;

        log::info!("Processed {} charts for {}", aggregates.days, period);
        Ok(IceProducts {
            first_date,
            last_date,
            days: aggregates.days,
            day_count: aggregates.day_count,
            persistence,
            maximum,
            minimum,
            coastal_report,
            consecutive_report,
            geolocation: geolocation.clone(),
        })
    }

    /// Decode and process in one go
    pub fn run(&self, files: &[DailyFile], masks: &ReferenceMasks) -> IceResult<IceProducts> {
        if files.is_empty() {
            return Err(IceError::EmptySeries.at(PipelineStage::Discover, "daily files"));
        }
        let series = self.load_series(files)?;
        self.process(&series, masks)
    }

    /// Write the four product rasters into `out_dir`
    pub fn write_rasters(&self, products: &IceProducts, out_dir: &Path) -> IceResult<ProductPaths> {
        fs::create_dir_all(out_dir)
            .map_err(|e| IceError::from(e).at(PipelineStage::Output, out_dir.display().to_string()))?;
        let paths = ProductPaths::new(out_dir, &products.period_tag());

        let rasters: [(&Path, Array2<f64>); 4] = [
            (&paths.day_count, products.day_count.mapv(f64::from)),
            (&paths.persistence, products.persistence.clone()),
            (&paths.maximum, products.maximum.raster.mapv(f64::from)),
            (&paths.minimum, products.minimum.raster.mapv(f64::from)),
        ];
        for (path, grid) in &rasters {
            self.store
                .write_grid(grid, path, &products.geolocation)
                .map_err(|e| e.at(PipelineStage::Output, path.display().to_string()))?;
        }
        Ok(paths)
    }

    /// Write rasters plus extent polygons and ice-edge lines as shapefiles
    pub fn write_products(&self, products: &IceProducts, out_dir: &Path) -> IceResult<ProductPaths> {
        let paths = self.write_rasters(products, out_dir)?;
        let geolocation = &products.geolocation;

        let output = |path: &Path| {
            let display = path.display().to_string();
            move |e: IceError| e.at(PipelineStage::Output, display)
        };
        shapefile::write_polygons(&products.maximum.polygons, &paths.maximum_polygons, geolocation)
            .map_err(output(paths.maximum_polygons.as_path()))?;
        shapefile::write_polygons(&products.minimum.polygons, &paths.minimum_polygons, geolocation)
            .map_err(output(paths.minimum_polygons.as_path()))?;
        shapefile::write_lines(&products.maximum.lines, &paths.maximum_lines, geolocation)
            .map_err(output(paths.maximum_lines.as_path()))?;
        shapefile::write_lines(&products.minimum.lines, &paths.minimum_lines, geolocation)
            .map_err(output(paths.minimum_lines.as_path()))?;

        log::info!("Products for {} written to {}", products.period_tag(), out_dir.display());
        Ok(paths)
    }

    /// Write every chart of a series as its own raster (`nt_YYYYMMDD.tif`)
    pub fn write_daily_charts(&self, series: &GridSeries, out_dir: &Path) -> IceResult<Vec<PathBuf>> {
        fs::create_dir_all(out_dir)
            .map_err(|e| IceError::from(e).at(PipelineStage::Output, out_dir.display().to_string()))?;
        series
            .grids()
            .iter()
            .map(|chart| {
                let path = out_dir.join(format!("nt_{}.tif", chart.date().format("%Y%m%d")));
                self.store
                    .write_grid(&chart.codes().mapv(f64::from), &path, series.geolocation())
                    .map_err(|e| e.at(PipelineStage::Output, path.display().to_string()))?;
                Ok(path)
            })
            .collect()
    }
}

impl<S: GridStore + Reprojector, V: Vectorizer> PersistencePipeline<S, V> {
    /// Reproject written products into `EPSG<code>/` next to them.
    ///
    /// Does nothing when reprojection is disabled in the configuration.
    pub fn reproject_products(&self, paths: &ProductPaths) -> IceResult<Vec<PathBuf>> {
        let Some(params) = self.config.reprojection else {
            return Ok(Vec::new());
        };
        let suffix = format!("EPSG{}", params.target_epsg);

        let target = |path: &Path| -> IceResult<PathBuf> {
            let parent = path.parent().unwrap_or_else(|| Path::new("."));
            let dir = parent.join(&suffix);
            fs::create_dir_all(&dir)?;
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("product");
            let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("tif");
            Ok(dir.join(format!("{}_{}.{}", stem, suffix, ext)))
        };

        let mut written = Vec::new();
        for src in paths.rasters() {
            let dst = target(src).map_err(|e| e.at(PipelineStage::Reproject, src.display().to_string()))?;
            self.store
                .reproject_raster(src, &dst, params.target_epsg, params.resolution)
                .map_err(|e| e.at(PipelineStage::Reproject, src.display().to_string()))?;
            written.push(dst);
        }
        for src in paths.vectors() {
            let dst = target(src).map_err(|e| e.at(PipelineStage::Reproject, src.display().to_string()))?;
            self.store
                .reproject_vector(src, &dst, params.target_epsg)
                .map_err(|e| e.at(PipelineStage::Reproject, src.display().to_string()))?;
            written.push(dst);
        }

        log::info!("Reprojected {} products to EPSG:{}", written.len(), params.target_epsg);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_names_follow_period() {
        let paths = ProductPaths::new(Path::new("/out"), "198504_201404");
        assert_eq!(paths.day_count, PathBuf::from("/out/icechart_NumberOfDays198504_201404.tif"));
        assert_eq!(paths.persistence, PathBuf::from("/out/icechart_persistencemap198504_201404.tif"));
        assert_eq!(paths.maximum, PathBuf::from("/out/icechart_maximum198504_201404.tif"));
        assert_eq!(paths.minimum, PathBuf::from("/out/icechart_minimum198504_201404.tif"));
        assert_eq!(paths.maximum_lines, PathBuf::from("/out/icechart_line_maximum198504_201404.shp"));
    }

    #[test]
    fn test_masks_checked_against_grid() {
        let masks = ReferenceMasks::new(Array2::zeros((3, 3)), Array2::zeros((3, 4)));
        let err = masks.validate((3, 3)).unwrap_err();
        assert!(matches!(err, IceError::ShapeMismatch { .. }));
    }
}
