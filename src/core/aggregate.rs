use crate::core::sentinel::SentinelPolicy;
use crate::types::{ensure_same_dim, GridSeries, IceError, IceResult, LandMask};
use ndarray::{Array2, Zip};

/// Products folded from one averaging period
#[derive(Debug, Clone, PartialEq)]
pub struct IceAggregates {
    /// Days with ice per pixel, land codes burned in
    pub day_count: Array2<u32>,
    /// Percentage of days with ice, zero outside the maximum extent
    pub persistence: Array2<f64>,
    /// 1 where ice was seen at least once
    pub maximum: Array2<u8>,
    /// 1 where ice was seen on every chart
    pub minimum: Array2<u8>,
    /// Number of charts folded (N)
    pub days: usize,
}

/// Folds a filtered series into day-count, persistence and extent grids
pub struct AggregationEngine<'a> {
    policy: &'a SentinelPolicy,
    land: &'a LandMask,
}

impl<'a> AggregationEngine<'a> {
    pub fn new(policy: &'a SentinelPolicy, land: &'a LandMask) -> Self {
        Self { policy, land }
    }

    /// Compute all four products in one pass over the series.
    ///
    /// Minimum extent requires ice on all N charts. A chart carrying a flag
    /// or low value at a pixel (bad or partial file) leaves that pixel one
    /// day short, so the minimum extent under-counts on incomplete data.
    pub fn aggregate(&self, series: &GridSeries) -> IceResult<IceAggregates> {
        if series.is_empty() {
            return Err(IceError::EmptySeries);
        }
        ensure_same_dim("land mask", series.dim(), self.land.dim())?;

        let days = series.len();
        let increment = 100.0 / days as f64;
        log::info!("Aggregating {} charts ({:.4}% per ice day)", days, increment);

        let mut counts = Array2::<u32>::zeros(series.dim());
        let mut persistence = Array2::<f64>::zeros(series.dim());

        for chart in series.grids() {
            log::debug!("Accumulating chart {}", chart.date());
            Zip::from(&mut counts)
                .and(&mut persistence)
                .and(chart.codes())
                .for_each(|count, percent, &code| {
                    if self.policy.is_ice(code) {
                        *count += 1;
                        *percent += increment;
                    }
                });
        }

        // Extents derive from the raw counts, before land codes are burned in
        let maximum = counts.mapv(|c| u8::from(c > 0));
        let minimum = counts.mapv(|c| u8::from(c as usize == days));

        let maximum = self.policy.overlay(self.land, &maximum)?;
        let minimum = self.policy.overlay(self.land, &minimum)?;
        let day_count = self.policy.overlay(self.land, &counts)?;
        let persistence = self.mask_persistence(&persistence, &maximum)?;

        log::info!(
            "Aggregation complete: {} pixels in maximum extent, {} in minimum extent",
            maximum.iter().filter(|&&v| v == 1).count(),
            minimum.iter().filter(|&&v| v == 1).count()
        );

        Ok(IceAggregates {
            day_count,
            persistence,
            maximum,
            minimum,
            days,
        })
    }

    /// Zero persistence outside the maximum extent, then burn in land.
    ///
    /// Persistence has the same coastal noise as the maximum map, so any
    /// pixel the (possibly noise-suppressed) maximum rejects is cleared.
    pub fn mask_persistence(
        &self,
        persistence: &Array2<f64>,
        maximum: &Array2<u8>,
    ) -> IceResult<Array2<f64>> {
        ensure_same_dim("maximum extent", persistence.dim(), maximum.dim())?;

        let mut masked = persistence.clone();
        Zip::from(&mut masked).and(maximum).for_each(|p, &m| {
            if m != 1 {
                *p = 0.0;
            }
        });
        self.policy.overlay(self.land, &masked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConcentrationGrid, GridGeolocation};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn series_of(charts: Vec<Vec<u8>>, dim: (usize, usize)) -> GridSeries {
        let grids = charts
            .into_iter()
            .enumerate()
            .map(|(i, codes)| {
                ConcentrationGrid::new(
                    NaiveDate::from_ymd_opt(2014, 4, 1 + i as u32).unwrap(),
                    Array2::from_shape_vec(dim, codes).unwrap(),
                )
            })
            .collect();
        GridSeries::new(grids, GridGeolocation::default(), dim).unwrap()
    }

    #[test]
    fn test_empty_series_rejected() {
        let policy = SentinelPolicy::default();
        let land = Array2::zeros((2, 2));
        let series = GridSeries::new(vec![], GridGeolocation::default(), (2, 2)).unwrap();

        let err = AggregationEngine::new(&policy, &land).aggregate(&series).unwrap_err();
        assert!(matches!(err, IceError::EmptySeries));
    }

    #[test]
    fn test_extents_follow_day_count() {
        // pixels: always ice, sometimes ice, never ice, land
        let series = series_of(
            vec![
                vec![100, 100, 0, 254],
                vec![100, 0, 20, 254],
                vec![100, 0, 0, 254],
                vec![100, 50, 0, 254],
            ],
            (1, 4),
        );
        let policy = SentinelPolicy::default();
        let land = Array2::from_shape_vec((1, 4), vec![0, 0, 0, 254]).unwrap();
        let agg = AggregationEngine::new(&policy, &land).aggregate(&series).unwrap();

        assert_eq!(agg.days, 4);
        assert_eq!(agg.day_count.as_slice().unwrap(), &[4, 2, 0, 254]);
        assert_eq!(agg.maximum.as_slice().unwrap(), &[1, 1, 0, 254]);
        assert_eq!(agg.minimum.as_slice().unwrap(), &[1, 0, 0, 254]);
        assert_relative_eq!(agg.persistence[[0, 0]], 100.0, epsilon = 1e-9);
        assert_relative_eq!(agg.persistence[[0, 1]], 50.0, epsilon = 1e-9);
        assert_eq!(agg.persistence[[0, 2]], 0.0);
        assert_eq!(agg.persistence[[0, 3]], 254.0);
    }

    #[test]
    fn test_missing_reading_undercounts_minimum() {
        // Ice every day except one chart flagged as missing (255) at that pixel
        let series = series_of(
            vec![vec![90, 90], vec![255, 90], vec![90, 90]],
            (1, 2),
        );
        let policy = SentinelPolicy::default();
        let land = Array2::zeros((1, 2));
        let agg = AggregationEngine::new(&policy, &land).aggregate(&series).unwrap();

        assert_eq!(agg.day_count[[0, 0]], 2);
        assert_eq!(agg.minimum[[0, 0]], 0, "one bad reading drops the pixel from the minimum");
        assert_eq!(agg.minimum[[0, 1]], 1);
        assert_eq!(agg.maximum[[0, 0]], 1);
        assert_relative_eq!(agg.persistence[[0, 0]], 200.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_incremental_persistence_matches_ratio() {
        let n = 7;
        let charts = (0..n)
            .map(|d| (0..6).map(|p| if p <= d % 6 { 120 } else { 0 }).collect())
            .collect();
        let series = series_of(charts, (2, 3));
        let policy = SentinelPolicy::default();
        let land = Array2::zeros((2, 3));
        let agg = AggregationEngine::new(&policy, &land).aggregate(&series).unwrap();

        for ((row, col), &count) in agg.day_count.indexed_iter() {
            let expected = 100.0 * count as f64 / n as f64;
            assert_relative_eq!(agg.persistence[[row, col]], expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_mask_persistence_with_suppressed_maximum() {
        let policy = SentinelPolicy::default();
        let land = Array2::from_shape_vec((1, 3), vec![0, 0, 253]).unwrap();
        let engine = AggregationEngine::new(&policy, &land);
        let persistence = Array2::from_shape_vec((1, 3), vec![40.0, 60.0, 10.0]).unwrap();
        let maximum = Array2::from_shape_vec((1, 3), vec![0u8, 1, 253]).unwrap();

        let masked = engine.mask_persistence(&persistence, &maximum).unwrap();
        assert_eq!(masked.as_slice().unwrap(), &[0.0, 60.0, 253.0]);
    }
}
