use std::path::Path;

use anyhow::anyhow;

use crate::{
    crs::crs_utils::{build_projection, transform_geometries},
    geofile::{
        feature::FeatureMap,
        gdal_geofile::{read_layer_from_geofile, GeofileLayer},
    },
};

/// A park boundary from the open-data extract.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonFeature {
    pub id: String,
    pub geometry: geo::MultiPolygon,
}

/// An authoritative park record. `index` is the position of the feature in its source layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PointFeature {
    pub index: usize,
    pub geometry: geo::MultiPoint,
    pub attributes: FeatureMap,
}

pub struct PolygonLayer {
    pub features: Vec<PolygonFeature>,
    pub spatial_ref: gdal::spatial_ref::SpatialRef,
}

pub struct PointLayer {
    pub features: Vec<PointFeature>,
    pub spatial_ref: gdal::spatial_ref::SpatialRef,
}

fn to_multipolygon(geometry: geo::Geometry) -> Option<geo::MultiPolygon> {
    match geometry {
        geo::Geometry::Polygon(polygon) => Some(geo::MultiPolygon(vec![polygon])),
        geo::Geometry::MultiPolygon(multipolygon) => Some(multipolygon),
        _ => None,
    }
}

fn to_multipoint(geometry: geo::Geometry) -> Option<geo::MultiPoint> {
    match geometry {
        geo::Geometry::Point(point) => Some(geo::MultiPoint(vec![point])),
        geo::Geometry::MultiPoint(multipoint) => Some(multipoint),
        _ => None,
    }
}

fn ensure_fields_exist(layer: &GeofileLayer, required: &[&str]) -> anyhow::Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .filter(|field_name| !layer.field_names.iter().any(|name| name == *field_name))
        .copied()
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(anyhow!(
        "Layer '{}' is missing the fields {:?}. Available fields: {:?}",
        layer.name,
        missing,
        layer.field_names
    ))
}

impl PolygonLayer {
    /// Build the polygon layer, taking the identifier of each feature from `id_field`.
    ///
    /// Features without an identifier or without a (multi)polygon geometry are skipped.
    pub fn from_geofile_layer(layer: GeofileLayer, id_field: &str) -> anyhow::Result<Self> {
        ensure_fields_exist(&layer, &[id_field])?;
        let num_features = layer.features.len();
        let mut num_without_id = 0;
        let features: Vec<PolygonFeature> = layer
            .features
            .into_iter()
            .filter_map(|feature| {
                let id = feature.attribute(id_field).map(|id| id.to_owned());
                if id.is_none() {
                    num_without_id += 1;
                }
                Some(PolygonFeature {
                    id: id?,
                    geometry: to_multipolygon(feature.geometry)?,
                })
            })
            .collect();
        if num_without_id > 0 {
            log::warn!(
                "{} features of layer '{}' have no value for '{}'",
                num_without_id,
                layer.name,
                id_field
            );
        }
        if features.len() != num_features {
            log::warn!(
                "Out of {} features read, only {} were Polygons with an identifier.",
                num_features,
                features.len()
            )
        }
        Ok(Self {
            features,
            spatial_ref: layer.spatial_ref,
        })
    }

    pub fn load_from_geofile(
        filepath: &Path,
        layer_name: Option<&str>,
        id_field: &str,
    ) -> anyhow::Result<Self> {
        Self::from_geofile_layer(read_layer_from_geofile(filepath, layer_name)?, id_field)
    }
}

impl PointLayer {
    /// Build the point layer. Every name in `attribute_names` must be a field of the layer; only those fields are
    /// kept on the features.
    pub fn from_geofile_layer(
        layer: GeofileLayer,
        attribute_names: &[String],
    ) -> anyhow::Result<Self> {
        let required: Vec<&str> = attribute_names.iter().map(|name| name.as_str()).collect();
        ensure_fields_exist(&layer, &required)?;
        let num_features = layer.features.len();
        let features: Vec<PointFeature> = layer
            .features
            .into_iter()
            .enumerate()
            .filter_map(|(index, feature)| {
                let attributes: FeatureMap = attribute_names
                    .iter()
                    .filter_map(|name| {
                        feature
                            .attribute(name)
                            .map(|value| (name.to_owned(), value.to_owned()))
                    })
                    .collect();
                Some(PointFeature {
                    index,
                    geometry: to_multipoint(feature.geometry)?,
                    attributes,
                })
            })
            .collect();
        if features.len() != num_features {
            log::warn!(
                "Out of {} features read, only {} were Points.",
                num_features,
                features.len()
            )
        }
        Ok(Self {
            features,
            spatial_ref: layer.spatial_ref,
        })
    }

    pub fn load_from_geofile(
        filepath: &Path,
        layer_name: Option<&str>,
        attribute_names: &[String],
    ) -> anyhow::Result<Self> {
        Self::from_geofile_layer(read_layer_from_geofile(filepath, layer_name)?, attribute_names)
    }

    pub fn project(&mut self, to_crs: &gdal::spatial_ref::SpatialRef) -> anyhow::Result<()> {
        let projection = build_projection(&self.spatial_ref, to_crs)?;
        transform_geometries(
            self.features.iter_mut().map(|feature| &mut feature.geometry),
            &projection,
        )?;
        self.spatial_ref = to_crs.clone();
        Ok(())
    }
}
