use crate::core::sentinel::SentinelPolicy;
use crate::types::{
    ensure_same_dim, CodeGrid, ConcentrationGrid, GridSeries, IceError, IceResult, LandMask,
    MaskGrid,
};
use chrono::{Duration, NaiveDate};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Centered day window applied to one zone of the mask
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneWindow {
    /// Zone id in the mask grid
    pub zone: u8,
    /// Days before and after the present day
    pub day_range: u32,
    /// Ice days required within the 2r+1 window to keep the ice
    pub min_ice_days: usize,
}

/// Coastal-error suppression parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoastalFilterParams {
    pub coastal: ZoneWindow,
    pub enclosed_sea: ZoneWindow,
    /// Zone forced to open water on every day
    pub never_ice_zone: u8,
}

impl Default for CoastalFilterParams {
    fn default() -> Self {
        Self {
            coastal: ZoneWindow {
                zone: 1,
                day_range: 2,
                min_ice_days: 5,
            },
            enclosed_sea: ZoneWindow {
                zone: 2,
                day_range: 2,
                min_ice_days: 5,
            },
            never_ice_zone: 3,
        }
    }
}

/// Consecutive-day confirmation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsecutiveDayParams {
    pub day_range: u32,
}

impl Default for ConsecutiveDayParams {
    fn default() -> Self {
        Self { day_range: 1 }
    }
}

/// Bookkeeping of one filter pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterReport {
    /// Charts processed
    pub days: usize,
    /// Window slots filled with the present day because the chart was absent
    pub missing_neighbor_days: usize,
    /// Ice pixels set to open water
    pub downgraded_pixels: usize,
}

impl FilterReport {
    fn absorb(&mut self, other: FilterReport) {
        self.days += other.days;
        self.missing_neighbor_days += other.missing_neighbor_days;
        self.downgraded_pixels += other.downgraded_pixels;
    }
}

/// Day-window filters removing coastal artifacts and single-day ice spikes
pub struct TemporalFilter<'a> {
    policy: &'a SentinelPolicy,
    zones: &'a MaskGrid,
    land: &'a LandMask,
}

impl<'a> TemporalFilter<'a> {
    pub fn new(policy: &'a SentinelPolicy, zones: &'a MaskGrid, land: &'a LandMask) -> Self {
        Self {
            policy,
            zones,
            land,
        }
    }

    /// Drop coastal and enclosed-sea ice not seen on enough surrounding days
    pub fn suppress_coastal_errors(
        &self,
        series: &GridSeries,
        params: &CoastalFilterParams,
    ) -> IceResult<(GridSeries, FilterReport)> {
        self.validate(series)?;
        log::info!(
            "Coastal error filter over {} charts (coastal r={} t={}, enclosed sea r={} t={})",
            series.len(),
            params.coastal.day_range,
            params.coastal.min_ice_days,
            params.enclosed_sea.day_range,
            params.enclosed_sea.min_ice_days
        );

        let (codes, report) = map_days(series, |present| self.suppress_coastal_day(series, present, params))?;

        log::info!(
            "Coastal error filter done: {} pixels downgraded, {} missing neighbour days",
            report.downgraded_pixels,
            report.missing_neighbor_days
        );
        Ok((series.with_codes(codes)?, report))
    }

    /// Keep ice only where neighbouring days confirm it on both sides
    pub fn confirm_consecutive_days(
        &self,
        series: &GridSeries,
        params: &ConsecutiveDayParams,
    ) -> IceResult<(GridSeries, FilterReport)> {
        self.validate(series)?;
        log::info!(
            "Consecutive day filter over {} charts (r={})",
            series.len(),
            params.day_range
        );

        let (codes, report) = map_days(series, |present| self.confirm_day(series, present, params))?;

        log::info!(
            "Consecutive day filter done: {} pixels downgraded, {} missing neighbour days",
            report.downgraded_pixels,
            report.missing_neighbor_days
        );
        Ok((series.with_codes(codes)?, report))
    }

    /// Per-pixel ice-day counts of one zone around `date`; zero outside the zone
    pub fn zone_window_counts(
        &self,
        series: &GridSeries,
        date: NaiveDate,
        window: &ZoneWindow,
    ) -> IceResult<Array2<u16>> {
        self.validate(series)?;
        let present = series
            .get(date)
            .ok_or_else(|| IceError::Processing(format!("no chart for {}", date)))?;
        let (charts, _) = neighbour_charts(series, present, window.day_range);
        Ok(self.count_zone(&charts, window.zone))
    }

    fn validate(&self, series: &GridSeries) -> IceResult<()> {
        ensure_same_dim("zone mask", series.dim(), self.zones.dim())?;
        ensure_same_dim("land mask", series.dim(), self.land.dim())
    }

    fn count_zone(&self, charts: &[&CodeGrid], zone: u8) -> Array2<u16> {
        Array2::from_shape_fn(self.zones.dim(), |(row, col)| {
            if self.zones[[row, col]] != zone {
                return 0;
            }
            charts
                .iter()
                .filter(|chart| self.policy.is_ice(chart[[row, col]]))
                .count() as u16
        })
    }

    fn suppress_coastal_day(
        &self,
        series: &GridSeries,
        present: &ConcentrationGrid,
        params: &CoastalFilterParams,
    ) -> IceResult<(CodeGrid, FilterReport)> {
        let mut codes = present.codes().clone();
        let mut report = FilterReport {
            days: 1,
            ..Default::default()
        };

        for window in [&params.coastal, &params.enclosed_sea] {
            let (charts, missing) = neighbour_charts(series, present, window.day_range);
            report.missing_neighbor_days += missing;

            let counts = self.count_zone(&charts, window.zone);
            Zip::from(&mut codes)
                .and(self.zones)
                .and(&counts)
                .for_each(|code, &zone, &count| {
                    if zone == window.zone && (count as usize) < window.min_ice_days {
                        *code = 0;
                    }
                });
        }

        Zip::from(&mut codes).and(self.zones).for_each(|code, &zone| {
            if zone == params.never_ice_zone {
                *code = 0;
            }
        });

        report.downgraded_pixels = self.downgraded(present.codes(), &codes);
        let codes = self.policy.overlay(self.land, &codes)?;
        Ok((codes, report))
    }

    fn confirm_day(
        &self,
        series: &GridSeries,
        present: &ConcentrationGrid,
        params: &ConsecutiveDayParams,
    ) -> IceResult<(CodeGrid, FilterReport)> {
        let (charts, missing) = neighbour_charts(series, present, params.day_range);
        let required = 2 * params.day_range as usize;
        let today = present.codes();

        let codes = Array2::from_shape_fn(today.dim(), |(row, col)| {
            let value = today[[row, col]];
            if !self.policy.is_ice(value) {
                return 0;
            }
            let confirmed = charts
                .iter()
                .filter(|chart| self.policy.is_ice(chart[[row, col]]))
                .count();
            if confirmed <= required {
                0
            } else {
                value
            }
        });

        let report = FilterReport {
            days: 1,
            missing_neighbor_days: missing,
            downgraded_pixels: self.downgraded(today, &codes),
        };
        let codes = self.policy.overlay(self.land, &codes)?;
        Ok((codes, report))
    }

    fn downgraded(&self, before: &CodeGrid, after: &CodeGrid) -> usize {
        before
            .iter()
            .zip(after.iter())
            .filter(|&(&b, &a)| self.policy.is_ice(b) && a == 0)
            .count()
    }
}

/// Charts for every date in `present ± day_range`.
///
/// A date without a chart contributes the present chart instead, so the
/// window always holds 2r+1 entries, also at the ends of the series.
fn neighbour_charts<'s>(
    series: &'s GridSeries,
    present: &'s ConcentrationGrid,
    day_range: u32,
) -> (Vec<&'s CodeGrid>, usize) {
    let range = day_range as i64;
    let mut charts = Vec::with_capacity(2 * day_range as usize + 1);
    let mut missing = 0;

    for offset in -range..=range {
        let date = present.date() + Duration::days(offset);
        match series.get(date) {
            Some(chart) => charts.push(chart.codes()),
            None => {
                log::debug!(
                    "No chart for {}, substituting {} in window",
                    date,
                    present.date()
                );
                missing += 1;
                charts.push(present.codes());
            }
        }
    }

    (charts, missing)
}

/// Apply a per-day filter to every chart of the series
fn map_days<F>(series: &GridSeries, filter: F) -> IceResult<(Vec<CodeGrid>, FilterReport)>
where
    F: Fn(&ConcentrationGrid) -> IceResult<(CodeGrid, FilterReport)> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    let results: Vec<IceResult<(CodeGrid, FilterReport)>> = {
        use rayon::prelude::*;
        series.grids().par_iter().map(&filter).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let results: Vec<IceResult<(CodeGrid, FilterReport)>> =
        series.grids().iter().map(&filter).collect();

    let mut codes = Vec::with_capacity(results.len());
    let mut report = FilterReport::default();
    for result in results {
        let (day_codes, day_report) = result?;
        report.absorb(day_report);
        codes.push(day_codes);
    }
    Ok((codes, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GridGeolocation;

    const ICE: u8 = 200;
    const LAND: u8 = 254;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2014, 4, d).unwrap()
    }

    /// 1x4 strip: [coastal, enclosed sea, never ice, open ocean]
    fn zones() -> MaskGrid {
        Array2::from_shape_vec((1, 4), vec![1, 2, 3, 0]).unwrap()
    }

    fn no_land() -> LandMask {
        Array2::zeros((1, 4))
    }

    fn series(days: &[(u32, [u8; 4])]) -> GridSeries {
        let grids = days
            .iter()
            .map(|(d, codes)| {
                ConcentrationGrid::new(day(*d), Array2::from_shape_vec((1, 4), codes.to_vec()).unwrap())
            })
            .collect();
        GridSeries::new(grids, GridGeolocation::default(), (1, 4)).unwrap()
    }

    #[test]
    fn test_coastal_pixel_kept_on_five_of_five_days() {
        let input = series(&[
            (1, [ICE; 4]),
            (2, [ICE; 4]),
            (3, [ICE; 4]),
            (4, [ICE; 4]),
            (5, [ICE; 4]),
        ]);
        let policy = SentinelPolicy::default();
        let (zones, land) = (zones(), no_land());
        let filter = TemporalFilter::new(&policy, &zones, &land);

        let (out, _) = filter
            .suppress_coastal_errors(&input, &CoastalFilterParams::default())
            .unwrap();
        let middle = out.get(day(3)).unwrap().codes();
        assert_eq!(middle[[0, 0]], ICE);
        assert_eq!(middle[[0, 1]], ICE);
        assert_eq!(middle[[0, 2]], 0, "never-ice zone is always cleared");
        assert_eq!(middle[[0, 3]], ICE);
    }

    #[test]
    fn test_coastal_pixel_dropped_on_four_of_five_days() {
        let input = series(&[
            (1, [10, 10, ICE, ICE]),
            (2, [ICE; 4]),
            (3, [ICE; 4]),
            (4, [ICE; 4]),
            (5, [ICE; 4]),
        ]);
        let policy = SentinelPolicy::default();
        let (zones, land) = (zones(), no_land());
        let filter = TemporalFilter::new(&policy, &zones, &land);
        let params = CoastalFilterParams::default();

        let counts = filter.zone_window_counts(&input, day(3), &params.coastal).unwrap();
        assert_eq!(counts[[0, 0]], 4);
        assert_eq!(counts[[0, 3]], 0, "pixels outside the zone are not counted");

        let (out, report) = filter.suppress_coastal_errors(&input, &params).unwrap();
        let middle = out.get(day(3)).unwrap().codes();
        assert_eq!(middle[[0, 0]], 0);
        assert_eq!(middle[[0, 1]], 0);
        assert_eq!(middle[[0, 3]], ICE, "open ocean passes through");
        assert!(report.downgraded_pixels > 0);
    }

    #[test]
    fn test_land_restored_after_filtering() {
        let input = series(&[(1, [ICE; 4]), (2, [ICE; 4])]);
        let policy = SentinelPolicy::default();
        let zones = zones();
        let land = Array2::from_shape_vec((1, 4), vec![LAND, 0, LAND, 0]).unwrap();
        let filter = TemporalFilter::new(&policy, &zones, &land);

        let (out, _) = filter
            .suppress_coastal_errors(&input, &CoastalFilterParams::default())
            .unwrap();
        for chart in out.grids() {
            assert_eq!(chart.codes()[[0, 0]], LAND);
            assert_eq!(chart.codes()[[0, 2]], LAND);
        }

        let (out, _) = filter
            .confirm_consecutive_days(&input, &ConsecutiveDayParams::default())
            .unwrap();
        for chart in out.grids() {
            assert_eq!(chart.codes()[[0, 0]], LAND);
            assert_eq!(chart.codes()[[0, 2]], LAND);
        }
    }

    #[test]
    fn test_boundary_days_substitute_present_chart() {
        let input = series(&[(1, [ICE; 4]), (2, [ICE; 4]), (3, [ICE; 4])]);
        let policy = SentinelPolicy::default();
        let (zones, land) = (zones(), no_land());
        let filter = TemporalFilter::new(&policy, &zones, &land);

        let (out, report) = filter
            .confirm_consecutive_days(&input, &ConsecutiveDayParams::default())
            .unwrap();
        assert_eq!(report.days, 3);
        assert_eq!(report.missing_neighbor_days, 2);
        assert_eq!(report.downgraded_pixels, 0);
        assert_eq!(out, input);
    }

    #[test]
    fn test_single_day_spike_removed() {
        let input = series(&[
            (1, [0, 0, 0, 0]),
            (2, [0, 0, 0, ICE]),
            (3, [0, 0, 0, 0]),
        ]);
        let policy = SentinelPolicy::default();
        let (zones, land) = (zones(), no_land());
        let filter = TemporalFilter::new(&policy, &zones, &land);

        let (out, report) = filter
            .confirm_consecutive_days(&input, &ConsecutiveDayParams::default())
            .unwrap();
        assert_eq!(out.get(day(2)).unwrap().codes()[[0, 3]], 0);
        assert_eq!(report.downgraded_pixels, 1);
    }

    #[test]
    fn test_consecutive_filter_idempotent_without_spikes() {
        // Ice persists through the whole period on two pixels, never on the others
        let input = series(&[
            (1, [ICE, 0, 0, ICE]),
            (2, [ICE, 0, 0, ICE]),
            (4, [ICE, 0, 0, ICE]),
            (5, [ICE, 0, 0, ICE]),
        ]);
        let policy = SentinelPolicy::default();
        let (zones, land) = (zones(), no_land());
        let filter = TemporalFilter::new(&policy, &zones, &land);
        let params = ConsecutiveDayParams::default();

        let (once, _) = filter.confirm_consecutive_days(&input, &params).unwrap();
        let (twice, _) = filter.confirm_consecutive_days(&once, &params).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_mask_shape_validated() {
        let input = series(&[(1, [ICE; 4])]);
        let policy = SentinelPolicy::default();
        let zones = Array2::zeros((2, 2));
        let land = no_land();
        let filter = TemporalFilter::new(&policy, &zones, &land);

        let err = filter
            .suppress_coastal_errors(&input, &CoastalFilterParams::default())
            .unwrap_err();
        assert!(matches!(err, IceError::ShapeMismatch { .. }));
    }
}
