use anyhow::Context;
use std::{fs, path::Path};

use super::feature::Feature;

/// Write features as a GeoJSON FeatureCollection. Each feature gets one property per entry of `field_names`,
/// null where the feature has no value for it.
pub fn write_features_to_geojson(
    features: &[Feature],
    field_names: &[String],
    output_filepath: &Path,
) -> anyhow::Result<()> {
    let feature_collection: geojson::FeatureCollection = features
        .iter()
        .map(|feature| {
            let properties: geojson::JsonObject = field_names
                .iter()
                .map(|field_name| {
                    let value = match feature.attribute(field_name) {
                        Some(value) => geojson::JsonValue::from(value),
                        None => geojson::JsonValue::Null,
                    };
                    (field_name.to_owned(), value)
                })
                .collect();
            geojson::Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(
                    &feature.geometry,
                ))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();
    let geojson_contents = geojson::GeoJson::from(feature_collection);
    log::info!(
        "Writing {} features to {:?}",
        features.len(),
        output_filepath
    );
    fs::write(output_filepath, geojson_contents.to_string())
        .with_context(|| format!("Writing GeoJSON to {:?}", output_filepath))
}

/// Read a FeatureCollection back into features, dropping null properties. Only used to check written output.
#[cfg(test)]
pub fn read_features_from_geojson(filepath: &Path) -> anyhow::Result<Vec<Feature>> {
    use super::feature::FeatureMap;
    use anyhow::anyhow;

    let contents = fs::read_to_string(filepath)
        .with_context(|| format!("Reading GeoJSON from {:?}", filepath))?;
    let feature_collection = match contents.parse::<geojson::GeoJson>()? {
        geojson::GeoJson::FeatureCollection(feature_collection) => feature_collection,
        _ => return Err(anyhow!("{:?} is not a GeoJSON FeatureCollection", filepath)),
    };
    feature_collection
        .features
        .into_iter()
        .map(|feature| {
            let geometry = feature
                .geometry
                .ok_or_else(|| anyhow!("GeoJSON feature without geometry in {:?}", filepath))?;
            let geometry = geo::Geometry::<f64>::try_from(geometry.value)?;
            let attributes: FeatureMap = feature
                .properties
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(key, value)| match value {
                    geojson::JsonValue::Null => None,
                    geojson::JsonValue::String(value) => Some((key, value)),
                    other => Some((key, other.to_string())),
                })
                .collect();
            Ok(Feature::new_with_attributes(geometry, attributes))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use testdir::testdir;

    use super::{read_features_from_geojson, write_features_to_geojson};
    use crate::geofile::feature::{Feature, FeatureMap};

    #[rstest]
    fn test_missing_fields_are_written_as_null() {
        let polygon = geo::Polygon::new(
            vec![(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (0.0, 0.0)].into(),
            vec![],
        );
        let features = vec![Feature::new_with_attributes(
            geo::Geometry::MultiPolygon(geo::MultiPolygon(vec![polygon])),
            FeatureMap::from([
                ("osm_id".to_string(), "7".to_string()),
                ("NAME".to_string(), "Al Malaz Park".to_string()),
            ]),
        )];
        let field_names = vec![
            "osm_id".to_string(),
            "NAME".to_string(),
            "DISTRICT".to_string(),
        ];

        let test_dir = testdir!();
        let filepath = test_dir.join("parks.geojson");
        write_features_to_geojson(&features, &field_names, &filepath).unwrap();

        let contents = std::fs::read_to_string(&filepath).unwrap();
        assert!(contents.contains("\"DISTRICT\":null"));

        // Null properties are dropped again on read.
        let read_back = read_features_from_geojson(&filepath).unwrap();
        assert_eq!(features, read_back);
    }

    #[rstest]
    fn test_read_rejects_non_collections() {
        let test_dir = testdir!();
        let filepath = test_dir.join("point.geojson");
        std::fs::write(&filepath, r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#).unwrap();
        assert!(read_features_from_geojson(&filepath).is_err());
    }
}
