use crate::core::sentinel::SentinelPolicy;
use crate::core::sieve::{SieveFilter, SieveParams};
use crate::io::{IcePolygon, Vectorizer};
use crate::types::{ensure_same_dim, GridGeolocation, IceResult, LandMask, MaskGrid};
use geo::{MultiLineString, MultiPolygon};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Extent value kept by the polygon area filter
const EXTENT_DN: u8 = 1;

/// Minimum polygon areas in map units squared; `None` keeps every polygon
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaThresholds {
    pub primary: Option<f64>,
    /// Applied to polygons inside the enclosed-sea mask when one is set
    pub enclosed_sea: Option<f64>,
}

impl Default for AreaThresholds {
    fn default() -> Self {
        Self {
            primary: Some(1e10),
            enclosed_sea: None,
        }
    }
}

/// Noise suppression parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSuppressionParams {
    pub sieve: SieveParams,
    pub maximum: AreaThresholds,
    pub minimum: AreaThresholds,
}

impl Default for NoiseSuppressionParams {
    fn default() -> Self {
        Self {
            sieve: SieveParams::default(),
            maximum: AreaThresholds {
                primary: Some(1e10),
                enclosed_sea: Some(1e9),
            },
            minimum: AreaThresholds {
                primary: Some(10.0),
                enclosed_sea: None,
            },
        }
    }
}

/// Noise-suppressed extent with its vector forms
#[derive(Debug, Clone)]
pub struct ExtentProduct {
    /// 0/1 extent with land codes burned in
    pub raster: Array2<u8>,
    /// Polygons that survived the area filter
    pub polygons: Vec<IcePolygon>,
    /// Ice edge, clipped to the coastline region when one is configured
    pub lines: MultiLineString<f64>,
}

/// Removes speckle and small islands from extent maps
pub struct NoiseSuppressionStage<'a, V: Vectorizer> {
    vectorizer: &'a V,
    policy: &'a SentinelPolicy,
    land: &'a LandMask,
    geolocation: &'a GridGeolocation,
    params: NoiseSuppressionParams,
    enclosed_sea: Option<&'a MaskGrid>,
    coastline: Option<&'a MultiPolygon<f64>>,
}

impl<'a, V: Vectorizer> NoiseSuppressionStage<'a, V> {
    pub fn new(
        vectorizer: &'a V,
        policy: &'a SentinelPolicy,
        land: &'a LandMask,
        geolocation: &'a GridGeolocation,
        params: NoiseSuppressionParams,
    ) -> Self {
        Self {
            vectorizer,
            policy,
            land,
            geolocation,
            params,
            enclosed_sea: None,
            coastline: None,
        }
    }

    /// Mask (nonzero inside) selecting the enclosed-sea polygon pass
    pub fn with_enclosed_sea(mut self, mask: &'a MaskGrid) -> Self {
        self.enclosed_sea = Some(mask);
        self
    }

    /// Region the ice-edge lines are clipped to
    pub fn with_coastline(mut self, region: &'a MultiPolygon<f64>) -> Self {
        self.coastline = Some(region);
        self
    }

    /// Sieve the extent, then restore land codes
    pub fn sieve(&self, extent: &Array2<u8>) -> IceResult<Array2<u8>> {
        ensure_same_dim("land mask", extent.dim(), self.land.dim())?;
        let sieved = SieveFilter::new(self.params.sieve).apply(extent);
        self.policy.overlay(self.land, &sieved)
    }

    /// Extent polygons larger than the thresholds, enclosed-sea pass merged in
    pub fn filter_polygons(
        &self,
        extent: &Array2<u8>,
        thresholds: &AreaThresholds,
    ) -> IceResult<Vec<IcePolygon>> {
        let polygons = self.vectorizer.polygonize(extent, None, self.geolocation)?;
        let mut kept = keep_large(polygons, thresholds.primary);
        log::debug!("{} extent polygons above primary threshold", kept.len());

        if let Some(mask) = self.enclosed_sea {
            ensure_same_dim("enclosed-sea mask", extent.dim(), mask.dim())?;
            let enclosed = self
                .vectorizer
                .polygonize(extent, Some(mask), self.geolocation)?;
            let enclosed = keep_large(enclosed, thresholds.enclosed_sea);

            let mut covered = Array2::from_elem(extent.dim(), false);
            for &(row, col) in kept.iter().flat_map(|p| p.pixels.iter()) {
                covered[[row, col]] = true;
            }
            let before = kept.len();
            kept.extend(
                enclosed
                    .into_iter()
                    .filter(|p| !p.pixels.iter().all(|&cell| covered[cell])),
            );
            log::debug!("{} enclosed-sea polygons merged", kept.len() - before);
        }

        Ok(kept)
    }

    /// Full suppression of one extent map
    pub fn suppress(
        &self,
        extent: &Array2<u8>,
        thresholds: &AreaThresholds,
    ) -> IceResult<ExtentProduct> {
        let sieved = self.sieve(extent)?;
        let polygons = self.filter_polygons(&sieved, thresholds)?;

        let burned = self
            .vectorizer
            .rasterize(&polygons, extent.dim(), EXTENT_DN)?;
        let raster = self.policy.overlay(self.land, &burned)?;

        let lines = self.vectorizer.to_lines(&polygons);
        let lines = match self.coastline {
            Some(region) => self.vectorizer.clip(&lines, region),
            None => lines,
        };

        let before = extent.iter().filter(|&&v| v == EXTENT_DN).count();
        let after = raster.iter().filter(|&&v| v == EXTENT_DN).count();
        log::info!(
            "Noise suppression kept {} of {} extent pixels in {} polygons",
            after,
            before,
            polygons.len()
        );

        Ok(ExtentProduct {
            raster,
            polygons,
            lines,
        })
    }

    pub fn suppress_maximum(&self, maximum: &Array2<u8>) -> IceResult<ExtentProduct> {
        self.suppress(maximum, &self.params.maximum)
    }

    pub fn suppress_minimum(&self, minimum: &Array2<u8>) -> IceResult<ExtentProduct> {
        self.suppress(minimum, &self.params.minimum)
    }
}

fn keep_large(polygons: Vec<IcePolygon>, threshold: Option<f64>) -> Vec<IcePolygon> {
    polygons
        .into_iter()
        .filter(|p| p.dn == EXTENT_DN && threshold.map_or(true, |t| p.area > t))
        .collect()
}
