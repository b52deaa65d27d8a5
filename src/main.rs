extern crate log;
pub mod crs;
pub mod geofile;
pub mod join;
use crate::crs::crs_utils::{spatial_ref_from_epsg, EpsgCode};
use crate::geofile::feature::Feature;
use crate::geofile::gdal_geofile::{write_features_to_geofile, GeofileFormat};
use crate::join::layers::{PointLayer, PolygonLayer};
use crate::join::matcher::{
    match_polygons_to_points, output_field_names, MatchOrder, MatchParams, MergedFeature,
};
use crate::join::summary::{check_summary_agrees, count_points_per_polygon};
use anyhow::{anyhow, Context};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::{fs::read_to_string, path::Path};

/// Join park records to the park boundaries they fall in.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input config file.
    #[arg(short, long)]
    config_filepath: String,
}

#[derive(Deserialize, Debug)]
struct PolygonLayerConfig {
    filepath: PathBuf,
    layer_name: Option<String>,
    id_field: String,
}

#[derive(Deserialize, Debug)]
struct PointLayerConfig {
    filepath: PathBuf,
    layer_name: Option<String>,
}

fn default_output_crs() -> EpsgCode {
    4326
}

#[derive(Deserialize, Debug)]
struct OutputConfig {
    filepath: PathBuf,
    #[serde(default = "default_output_crs")]
    crs: EpsgCode,
    summary_filepath: Option<PathBuf>,
}

#[derive(Deserialize, Debug)]
struct Config {
    polygons: PolygonLayerConfig,
    points: PointLayerConfig,
    attributes: Vec<String>,
    #[serde(default)]
    match_order: MatchOrder,
    #[serde(default)]
    exclusive_points: bool,
    output: OutputConfig,
}

fn load_config(config_filepath: &Path) -> anyhow::Result<Config> {
    if !config_filepath.exists() {
        return Err(anyhow!("Config file {:?} not found", config_filepath));
    }
    let config_contents = read_to_string(config_filepath)?;
    serde_yaml::from_str(&config_contents)
        .with_context(|| format!("Parsing config file {:?}", config_filepath))
}

fn ensure_parent_dir(filepath: &Path) -> anyhow::Result<()> {
    if let Some(parent) = filepath.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            log::info!("Creating output directory {:?}", parent);
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Creating output directory {:?}", parent))?;
        }
    }
    Ok(())
}

fn write_merged_features(
    merged: &[MergedFeature],
    id_field: &str,
    attributes: &[String],
    output_filepath: &Path,
    crs: &gdal::spatial_ref::SpatialRef,
) -> anyhow::Result<()> {
    let format = GeofileFormat::from_path(output_filepath)?;
    ensure_parent_dir(output_filepath)?;
    let features: Vec<Feature> = merged
        .iter()
        .map(|feature| feature.to_feature(id_field))
        .collect();
    let field_names = output_field_names(id_field, attributes);
    match format {
        GeofileFormat::GeoJson => {
            if crs::crs_utils::auth_code_of(crs)? != 4326 {
                log::warn!("Writing GeoJSON with a CRS other than EPSG:4326, readers may assume WGS 84");
            }
            geofile::geojson::write_features_to_geojson(&features, &field_names, output_filepath)
        }
        GeofileFormat::GeoPackage => {
            let layer_name = output_filepath
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("merged");
            write_features_to_geofile(
                &features,
                &field_names,
                output_filepath,
                layer_name,
                gdal::vector::OGRwkbGeometryType::wkbMultiPolygon,
                Some(crs),
                format.name(),
            )
        }
    }
}

fn try_main() -> anyhow::Result<()> {
    let args = Args::try_parse()?;
    let config = load_config(Path::new(&args.config_filepath))?;

    let mut polygon_layer = PolygonLayer::load_from_geofile(
        &config.polygons.filepath,
        config.polygons.layer_name.as_deref(),
        &config.polygons.id_field,
    )?;
    log::info!("Read {} polygons", polygon_layer.features.len());
    let mut point_layer = PointLayer::load_from_geofile(
        &config.points.filepath,
        config.points.layer_name.as_deref(),
        &config.attributes,
    )?;
    log::info!("Read {} points", point_layer.features.len());

    join::preprocessing::drop_empty_geometries(&mut polygon_layer, &mut point_layer);
    join::preprocessing::ensure_points_in_polygon_crs(&polygon_layer, &mut point_layer)?;

    let mut merged = match_polygons_to_points(
        &polygon_layer.features,
        &point_layer.features,
        &MatchParams {
            attributes: config.attributes.clone(),
            order: config.match_order,
            exclusive_points: config.exclusive_points,
        },
    );

    // Counted before reprojecting so both steps see the same coordinates.
    let counts = config
        .output
        .summary_filepath
        .as_ref()
        .map(|_| count_points_per_polygon(&merged, &point_layer.features));
    if let Some(counts) = &counts {
        let disagreeing = check_summary_agrees(&merged, counts);
        if !disagreeing.is_empty() {
            log::warn!(
                "{} polygons disagree between merge and summary",
                disagreeing.len()
            );
        }
    }

    let output_crs = spatial_ref_from_epsg(config.output.crs)?;
    join::preprocessing::project_merged_features(
        &mut merged,
        &polygon_layer.spatial_ref,
        &output_crs,
    )?;

    write_merged_features(
        &merged,
        &config.polygons.id_field,
        &config.attributes,
        &config.output.filepath,
        &output_crs,
    )
    .map_err(|err| {
        log::error!("Error saving merged layer: {:?}", err);
        err
    })?;

    if let (Some(summary_filepath), Some(counts)) = (&config.output.summary_filepath, &counts) {
        ensure_parent_dir(summary_filepath)?;
        geofile::summary_csv::write_point_counts_to_csv(
            counts,
            &config.polygons.id_field,
            summary_filepath,
        )
        .map_err(|err| {
            log::error!("Error saving summary: {:?}", err);
            err
        })?;
    }
    Ok(())
}

fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    env_logger::init();
    if let Err(e) = try_main() {
        eprintln!("Error: {:?}", e);
        std::process::exit(1)
    }
}

#[cfg(test)]
mod tests {
    use gdal::vector::LayerAccess;
    use rstest::rstest;
    use testdir::testdir;

    use super::{load_config, write_merged_features, Config};
    use crate::{
        crs::crs_utils::epsg_4326,
        geofile::{feature::FeatureMap, gdal_geofile::read_layer_from_geofile, geojson},
        join::matcher::{MatchOrder, MergedFeature},
    };

    #[rstest]
    fn test_config_defaults() {
        let config: Config = serde_yaml::from_str(
            r#"
polygons:
  filepath: data/osm_parks.gpkg
  id_field: osm_id
points:
  filepath: data/portal_parks.geojson
  layer_name: portal-parks
attributes: [OBJECTID, FEATURE_ANAME]
output:
  filepath: out/parks.geojson
"#,
        )
        .unwrap();
        assert_eq!(None, config.polygons.layer_name);
        assert_eq!(Some("portal-parks".to_string()), config.points.layer_name);
        assert_eq!(MatchOrder::PointsFirst, config.match_order);
        assert!(!config.exclusive_points);
        assert_eq!(4326, config.output.crs);
        assert_eq!(None, config.output.summary_filepath);
    }

    #[rstest]
    fn test_config_overrides() {
        let config: Config = serde_yaml::from_str(
            r#"
polygons:
  filepath: data/osm_parks.gpkg
  layer_name: OSM_parks
  id_field: osm_id
points:
  filepath: data/portal_parks.gpkg
attributes: []
match_order: PolygonsFirst
exclusive_points: true
output:
  filepath: out/parks.gpkg
  crs: 32638
  summary_filepath: out/counts.csv
"#,
        )
        .unwrap();
        assert_eq!(MatchOrder::PolygonsFirst, config.match_order);
        assert!(config.exclusive_points);
        assert_eq!(32638, config.output.crs);
        assert!(config.output.summary_filepath.is_some());
    }

    #[rstest]
    fn test_missing_config_file() {
        let test_dir = testdir!();
        assert!(load_config(&test_dir.join("missing.yaml")).is_err());
    }

    fn merged_fixture() -> Vec<MergedFeature> {
        vec![MergedFeature {
            id: "way/1".to_string(),
            geometry: geo::MultiPolygon(vec![
                geo::Rect::new((46.6, 24.6), (46.7, 24.7)).to_polygon()
            ]),
            attributes: FeatureMap::from([("NAME".to_string(), "X".to_string())]),
            point_index: 0,
        }]
    }

    #[rstest]
    #[case("nested/dir/parks.geojson")]
    #[case("nested/dir/parks.gpkg")]
    fn test_write_merged_features_creates_directories(#[case] relative_path: &str) {
        let test_dir = testdir!();
        let filepath = test_dir.join(relative_path);
        let merged = merged_fixture();
        write_merged_features(
            &merged,
            "osm_id",
            &["NAME".to_string()],
            &filepath,
            &epsg_4326().unwrap(),
        )
        .unwrap();

        let features = if relative_path.ends_with(".gpkg") {
            read_layer_from_geofile(&filepath, Some("parks"))
                .unwrap()
                .features
        } else {
            geojson::read_features_from_geojson(&filepath).unwrap()
        };
        assert_eq!(vec![merged[0].to_feature("osm_id")], features);
    }

    #[rstest]
    fn test_write_merged_features_rejects_unknown_format() {
        let test_dir = testdir!();
        let result = write_merged_features(
            &merged_fixture(),
            "osm_id",
            &[],
            &test_dir.join("parks.shp"),
            &epsg_4326().unwrap(),
        );
        assert!(result.is_err());
    }

    #[rstest]
    fn test_empty_merge_is_written_as_multipolygon_layer() {
        let test_dir = testdir!();
        let filepath = test_dir.join("parks.gpkg");
        write_merged_features(
            &[],
            "osm_id",
            &["NAME".to_string()],
            &filepath,
            &epsg_4326().unwrap(),
        )
        .unwrap();

        let dataset = gdal::Dataset::open(&filepath).unwrap();
        let layer = dataset.layer_by_name("parks").unwrap();
        let geometry_type = unsafe { gdal_sys::OGR_L_GetGeomType(layer.c_layer()) };
        assert_eq!(
            gdal::vector::OGRwkbGeometryType::wkbMultiPolygon,
            geometry_type
        );
        assert_eq!(0, layer.feature_count());
    }
}
