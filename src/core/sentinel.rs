use crate::types::{ensure_same_dim, ConcentrationCode, IceResult};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// NSIDC flag values: pole hole, unused, coastline, land, missing
pub const NSIDC_SENTINEL_CODES: [ConcentrationCode; 5] = [251, 252, 253, 254, 255];

/// Encoded concentration of 15% (38 / 2.5)
pub const ICE_THRESHOLD: ConcentrationCode = 38;

/// Classification of a single raw code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellClass {
    /// Concentration at or above the ice threshold
    Ice(ConcentrationCode),
    /// Concentration below the ice threshold
    NotIce(ConcentrationCode),
    /// Reserved flag value, not a concentration reading
    Sentinel(ConcentrationCode),
}

/// Rules separating ice, open water and flagged cells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelPolicy {
    /// Sentinel codes in overlay order; later codes take precedence
    pub codes: Vec<ConcentrationCode>,
    /// Minimum code counted as ice
    pub ice_threshold: ConcentrationCode,
}

impl Default for SentinelPolicy {
    fn default() -> Self {
        Self {
            codes: NSIDC_SENTINEL_CODES.to_vec(),
            ice_threshold: ICE_THRESHOLD,
        }
    }
}

impl SentinelPolicy {
    pub fn new(codes: Vec<ConcentrationCode>, ice_threshold: ConcentrationCode) -> Self {
        Self {
            codes,
            ice_threshold,
        }
    }

    pub fn is_sentinel(&self, code: ConcentrationCode) -> bool {
        self.codes.contains(&code)
    }

    pub fn classify(&self, code: ConcentrationCode) -> CellClass {
        if self.is_sentinel(code) {
            CellClass::Sentinel(code)
        } else if code >= self.ice_threshold {
            CellClass::Ice(code)
        } else {
            CellClass::NotIce(code)
        }
    }

    #[inline]
    pub fn is_ice(&self, code: ConcentrationCode) -> bool {
        matches!(self.classify(code), CellClass::Ice(_))
    }

    /// Burn this policy's sentinel codes from `source` into `target`
    pub fn overlay<T>(&self, source: &Array2<ConcentrationCode>, target: &Array2<T>) -> IceResult<Array2<T>>
    where
        T: Copy + From<u8>,
    {
        overlay_sentinels(source, target, &self.codes)
    }
}

/// Copy sentinel codes from `source` into a copy of `target`.
///
/// Codes are applied in list order, so where several apply to one cell the
/// last one in `codes` wins. Every stage that must keep land and missing
/// values intact goes through this function.
pub fn overlay_sentinels<T>(
    source: &Array2<ConcentrationCode>,
    target: &Array2<T>,
    codes: &[ConcentrationCode],
) -> IceResult<Array2<T>>
where
    T: Copy + From<u8>,
{
    ensure_same_dim("sentinel overlay", source.dim(), target.dim())?;

    let mut output = target.clone();
    for &code in codes {
        Zip::from(&mut output).and(source).for_each(|out, &src| {
            if src == code {
                *out = T::from(code);
            }
        });
    }
    Ok(output)
}
