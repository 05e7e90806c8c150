//! icepersist: sea-ice climatology products from daily NSIDC charts
//!
//! Folds a stack of daily passive-microwave concentration grids for one
//! calendar month into day-count, persistence, maximum-extent and
//! minimum-extent products, with coastal-error filtering and removal of
//! small spurious ice regions.

pub mod types;
pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use types::{
    CodeGrid, ConcentrationGrid, GeoTransform, GridGeolocation, GridSeries, IceError, IceResult,
    LandMask, MaskGrid, PipelineStage,
};

pub use config::{PipelineConfig, ReprojectionParams};
pub use io::{discover_daily_files, DailyFile, GdalGridStore, GridStore, RasterVectorizer, Reprojector, Vectorizer};
pub use pipeline::{IceProducts, PersistencePipeline, ProductPaths, ReferenceMasks};
