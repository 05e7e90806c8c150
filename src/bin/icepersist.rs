//! Build monthly sea-ice persistence products from a directory of daily
//! NSIDC charts.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use icepersist::io::shapefile;
use icepersist::{
    discover_daily_files, GdalGridStore, PersistencePipeline, PipelineConfig, RasterVectorizer,
    ReferenceMasks,
};

/// Compute day-count, persistence, maximum and minimum ice extent for one
/// calendar month over a range of years.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// First year of the period (inclusive).
    #[arg(long)]
    start_year: i32,

    /// Last year of the period (inclusive).
    #[arg(long)]
    stop_year: i32,

    /// Calendar month, 1 to 12.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
    month: u32,

    /// Directory holding one sub-directory of daily charts per year.
    #[arg(long)]
    input_root: PathBuf,

    /// Output directory for rasters and shapefiles.
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Land mask raster carrying sentinel codes on land and coast.
    #[arg(long)]
    landmask: PathBuf,

    /// Coastal-error zone raster (1 coast, 2 enclosed sea, 3 never ice).
    #[arg(long)]
    coastal_mask: PathBuf,

    /// Ocean polygons shrunk away from the coast; ice-edge lines are clipped to it.
    #[arg(long)]
    ocean_buffer: Option<PathBuf>,

    /// Enclosed-sea mask raster for the separate polygon area pass.
    #[arg(long)]
    enclosed_sea_mask: Option<PathBuf>,

    /// TOML file overriding the processing parameters.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write every decoded daily chart as GeoTIFF.
    #[arg(long)]
    keep_daily: bool,

    /// Skip the final reprojection step.
    #[arg(long)]
    no_reproject: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.stop_year < args.start_year {
        bail!("stop year {} is before start year {}", args.stop_year, args.start_year);
    }

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };
    if args.no_reproject {
        config.reprojection = None;
    }

    let pipeline = PersistencePipeline::new(config, GdalGridStore::new(), RasterVectorizer::default())?;

    let land = pipeline.load_mask(&args.landmask).context("loading land mask")?;
    let zones = pipeline.load_mask(&args.coastal_mask).context("loading coastal error mask")?;
    let mut masks = ReferenceMasks::new(land, zones);
    if let Some(path) = &args.enclosed_sea_mask {
        masks = masks.with_enclosed_sea(pipeline.load_mask(path).context("loading enclosed-sea mask")?);
    }
    if let Some(path) = &args.ocean_buffer {
        let region = shapefile::read_clip_region(path, &pipeline.config().geolocation)
            .context("loading ocean buffer")?;
        masks = masks.with_coastline(region);
    }

    let files = discover_daily_files(&args.input_root, args.start_year, args.stop_year, args.month)?;
    if files.is_empty() {
        bail!(
            "no daily charts for month {} in {}-{} under {}",
            args.month,
            args.start_year,
            args.stop_year,
            args.input_root.display()
        );
    }

    let series = pipeline.load_series(&files)?;
    if args.keep_daily {
        pipeline.write_daily_charts(&series, &args.output_dir.join("daily"))?;
    }

    let products = pipeline.process(&series, &masks)?;
    if let Some(report) = &products.coastal_report {
        log::info!(
            "Coastal filter: {} pixels downgraded, {} missing neighbour days",
            report.downgraded_pixels,
            report.missing_neighbor_days
        );
    }

    let paths = pipeline.write_products(&products, &args.output_dir)?;
    let reprojected = pipeline.reproject_products(&paths)?;

    log::info!(
        "Done: {} charts, products {} ({} reprojected files)",
        products.days,
        products.period_tag(),
        reprojected.len()
    );
    Ok(())
}
