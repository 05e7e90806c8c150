//! Core sea-ice processing modules

pub mod decoder;
pub mod sentinel;
pub mod temporal_filter;
pub mod aggregate;
pub mod sieve;
pub mod noise;

// Re-export main types
pub use decoder::{GridDecoder, GridLayout};
pub use sentinel::{overlay_sentinels, CellClass, SentinelPolicy, ICE_THRESHOLD, NSIDC_SENTINEL_CODES};
pub use temporal_filter::{ConsecutiveDayParams, CoastalFilterParams, FilterReport, TemporalFilter, ZoneWindow};
pub use aggregate::{AggregationEngine, IceAggregates};
pub use sieve::{label_components, Components, Connectivity, SieveFilter, SieveParams};
pub use noise::{AreaThresholds, ExtentProduct, NoiseSuppressionParams, NoiseSuppressionStage};
