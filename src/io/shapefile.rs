//! ESRI Shapefile persistence of extent polygons and ice-edge lines

use crate::io::gdal_store::spatial_ref_from;
use crate::io::IcePolygon;
use crate::types::{GridGeolocation, IceError, IceResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::{FieldValue, Geometry, LayerAccess, LayerOptions, OGRFieldType, ToGdal};
use gdal::{Dataset, DriverManager};
use geo::{Geometry as GeoGeometry, MultiLineString, MultiPolygon};
use std::path::Path;

/// Attribute carrying the extent value of each polygon
pub const DN_FIELD: &str = "DN";

fn create_shapefile(path: &Path) -> IceResult<Dataset> {
    let driver = DriverManager::get_driver_by_name("ESRI Shapefile")?;
    for extension in ["shp", "shx", "dbf", "prj", "cpg"] {
        let sidecar = path.with_extension(extension);
        if sidecar.exists() {
            std::fs::remove_file(&sidecar)?;
        }
    }
    Ok(driver.create_vector_only(path)?)
}

fn layer_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("layer")
        .to_string()
}

/// Write polygons with their `DN` attribute
pub fn write_polygons(
    polygons: &[IcePolygon],
    path: &Path,
    geolocation: &GridGeolocation,
) -> IceResult<()> {
    log::info!("Writing {} polygons to {}", polygons.len(), path.display());

    let srs = spatial_ref_from(&geolocation.projection)?;
    let mut dataset = create_shapefile(path)?;
    let name = layer_name(path);
    let mut layer = dataset.create_layer(LayerOptions {
        name: &name,
        srs: Some(&srs),
        ty: gdal_sys::OGRwkbGeometryType::wkbPolygon,
        ..Default::default()
    })?;
    layer.create_defn_fields(&[(DN_FIELD, OGRFieldType::OFTInteger)])?;

    for polygon in polygons {
        layer.create_feature_fields(
            polygon.geometry.to_gdal()?,
            &[DN_FIELD],
            &[FieldValue::IntegerValue(i32::from(polygon.dn))],
        )?;
    }
    Ok(())
}

/// Write ice-edge lines as a single multi-line feature
pub fn write_lines(
    lines: &MultiLineString<f64>,
    path: &Path,
    geolocation: &GridGeolocation,
) -> IceResult<()> {
    log::info!("Writing {} edge lines to {}", lines.0.len(), path.display());

    let srs = spatial_ref_from(&geolocation.projection)?;
    let mut dataset = create_shapefile(path)?;
    let name = layer_name(path);
    let mut layer = dataset.create_layer(LayerOptions {
        name: &name,
        srs: Some(&srs),
        ty: gdal_sys::OGRwkbGeometryType::wkbMultiLineString,
        ..Default::default()
    })?;

    if !lines.0.is_empty() {
        layer.create_feature(lines.to_gdal()?)?;
    }
    Ok(())
}

/// Polygons of a clip layer (coastline or ocean buffer) in the grid's projection
pub fn read_clip_region(path: &Path, geolocation: &GridGeolocation) -> IceResult<MultiPolygon<f64>> {
    log::info!("Reading clip region from {}", path.display());

    let dataset = Dataset::open(path)?;
    let mut layer = dataset.layer(0)?;
    let transform = match layer.spatial_ref() {
        Some(source) if !geolocation.projection.is_empty() => {
            source.set_axis_mapping_strategy(
                gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
            );
            let target = spatial_ref_from(&geolocation.projection)?;
            Some(CoordTransform::new(&source, &target)?)
        }
        _ => None,
    };

    let mut polygons = Vec::new();
    for feature in layer.features() {
        let Some(geometry) = feature.geometry() else {
            continue;
        };
        let geometry = match &transform {
            Some(t) => geometry.transform(t)?.to_geo()?,
            None => geometry.to_geo()?,
        };
        match geometry {
            GeoGeometry::Polygon(p) => polygons.push(p),
            GeoGeometry::MultiPolygon(mp) => polygons.extend(mp.0),
            other => log::warn!("Skipping non-polygon clip geometry: {:?}", other),
        }
    }

    if polygons.is_empty() {
        return Err(IceError::Processing(format!(
            "no polygons in clip layer {}",
            path.display()
        )));
    }
    Ok(MultiPolygon::new(polygons))
}

/// Copy the first layer of `src` into a new shapefile in `target` coordinates
pub(crate) fn reproject_layer(src: &Path, dst: &Path, target: &SpatialRef) -> IceResult<()> {
    let source = Dataset::open(src)?;
    let mut source_layer = source.layer(0)?;
    let source_srs = source_layer.spatial_ref().ok_or_else(|| {
        IceError::Processing(format!("{} has no coordinate system", src.display()))
    })?;
    source_srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    let transform = CoordTransform::new(&source_srs, target)?;

    let has_dn = source_layer.defn().fields().any(|f| f.name() == DN_FIELD);
    let features: Vec<(Geometry, Option<i32>)> = source_layer
        .features()
        .filter_map(|feature| {
            let dn = if has_dn {
                feature.field_as_integer_by_name(DN_FIELD).ok().flatten()
            } else {
                None
            };
            feature.geometry().map(|g| (g.clone(), dn))
        })
        .collect();

    let mut dataset = create_shapefile(dst)?;
    let name = layer_name(dst);
    let mut layer = dataset.create_layer(LayerOptions {
        name: &name,
        srs: Some(target),
        ty: gdal_sys::OGRwkbGeometryType::wkbUnknown,
        ..Default::default()
    })?;
    if has_dn {
        layer.create_defn_fields(&[(DN_FIELD, OGRFieldType::OFTInteger)])?;
    }

    let count = features.len();
    for (geometry, dn) in features {
        let projected = geometry.transform(&transform)?;
        match dn {
            Some(value) => layer.create_feature_fields(
                projected,
                &[DN_FIELD],
                &[FieldValue::IntegerValue(value)],
            )?,
            None => layer.create_feature(projected)?,
        }
    }
    log::debug!("Reprojected {} features into {}", count, dst.display());
    Ok(())
}
