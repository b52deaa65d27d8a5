use crate::crs::crs_utils::{
    auth_code_of, build_projection, epsg_code_to_authority_string, same_crs, transform_geometries,
};

use super::{
    layers::{PointLayer, PolygonLayer},
    matcher::MergedFeature,
};

/// Reproject the points into the CRS of the polygons if the two layers differ.
pub fn ensure_points_in_polygon_crs(
    polygon_layer: &PolygonLayer,
    point_layer: &mut PointLayer,
) -> anyhow::Result<()> {
    if !same_crs(&polygon_layer.spatial_ref, &point_layer.spatial_ref)? {
        log::info!(
            "CRS mismatch, projecting points from {} to {}",
            epsg_code_to_authority_string(auth_code_of(&point_layer.spatial_ref)?),
            epsg_code_to_authority_string(auth_code_of(&polygon_layer.spatial_ref)?)
        );
        point_layer.project(&polygon_layer.spatial_ref)?;
    }
    Ok(())
}

/// Reproject merged records from the CRS they were matched in to the output CRS.
pub fn project_merged_features(
    merged: &mut [MergedFeature],
    from_crs: &gdal::spatial_ref::SpatialRef,
    to_crs: &gdal::spatial_ref::SpatialRef,
) -> anyhow::Result<()> {
    if same_crs(from_crs, to_crs)? {
        return Ok(());
    }
    log::info!(
        "Projecting {} merged features to {}",
        merged.len(),
        epsg_code_to_authority_string(auth_code_of(to_crs)?)
    );
    let projection = build_projection(from_crs, to_crs)?;
    transform_geometries(
        merged.iter_mut().map(|feature| &mut feature.geometry),
        &projection,
    )
}

fn is_empty_polygon(polygon: &geo::Polygon) -> bool {
    polygon.exterior().0.len() < 4
}

/// Drop features whose geometry cannot intersect anything: polygons without a closed exterior ring and empty
/// multipoints. Empty parts of multipolygons are removed as well.
pub fn drop_empty_geometries(polygon_layer: &mut PolygonLayer, point_layer: &mut PointLayer) {
    let num_polygons = polygon_layer.features.len();
    for feature in polygon_layer.features.iter_mut() {
        feature
            .geometry
            .0
            .retain(|polygon| !is_empty_polygon(polygon));
    }
    polygon_layer
        .features
        .retain(|feature| !feature.geometry.0.is_empty());
    if polygon_layer.features.len() != num_polygons {
        log::warn!(
            "Dropped {} polygons with empty geometry",
            num_polygons - polygon_layer.features.len()
        );
    }

    let num_points = point_layer.features.len();
    point_layer
        .features
        .retain(|feature| !feature.geometry.0.is_empty());
    if point_layer.features.len() != num_points {
        log::warn!(
            "Dropped {} points with empty geometry",
            num_points - point_layer.features.len()
        );
    }
}
