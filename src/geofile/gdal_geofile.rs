use anyhow::{anyhow, Context};
use gdal::vector::LayerAccess;
use indicatif::ProgressBar;
use std::{fs, path::Path};

use crate::crs::crs_utils::epsg_4326;

use super::feature::{Feature, FeatureMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeofileFormat {
    GeoPackage,
    GeoJson,
}

impl GeofileFormat {
    /// GDAL driver name of the format.
    pub fn name(&self) -> &'static str {
        match self {
            GeofileFormat::GeoPackage => "GPKG",
            GeofileFormat::GeoJson => "GeoJSON",
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| extension.to_ascii_lowercase());
        match extension.as_deref() {
            Some("gpkg") => Ok(GeofileFormat::GeoPackage),
            Some("geojson") | Some("json") => Ok(GeofileFormat::GeoJson),
            _ => Err(anyhow!(
                "Cannot derive an output format from {:?}, expected a .gpkg or .geojson extension",
                path
            )),
        }
    }
}

/// One vector layer read from a geofile.
pub struct GeofileLayer {
    pub name: String,
    pub features: Vec<Feature>,
    /// Field names in schema order.
    pub field_names: Vec<String>,
    pub spatial_ref: gdal::spatial_ref::SpatialRef,
}

/// Write features to a new layer of `layer_type`, replacing `output_filepath` if it exists. All fields are
/// written as strings in the order of `field_names`.
pub fn write_features_to_geofile(
    features: &[Feature],
    field_names: &[String],
    output_filepath: &Path,
    layer_name: &str,
    layer_type: gdal::vector::OGRwkbGeometryType::Type,
    crs: Option<&gdal::spatial_ref::SpatialRef>,
    driver: &str,
) -> anyhow::Result<()> {
    gdal::DriverManager::register_all();
    let driver = gdal::DriverManager::get_driver_by_name(driver).context("Getting GDAL driver")?;

    let crs = match crs {
        Some(crs) => crs.clone(),
        None => epsg_4326()?,
    };
    let crs_name = crs.name()?;
    log::debug!("Using spatial ref {} for writing geofile", crs_name);

    if output_filepath.exists() {
        log::info!("Replacing existing file {:?}", output_filepath);
        fs::remove_file(output_filepath)
            .with_context(|| format!("Removing existing file {:?}", output_filepath))?;
    }
    let mut dataset = driver
        .create_vector_only(output_filepath)
        .with_context(|| format!("Creating {:?}", output_filepath))?;
    let layer_options = gdal::LayerOptions {
        name: layer_name,
        srs: Some(&crs),
        ty: layer_type,
        options: None,
    };

    let mut layer = dataset.create_layer(layer_options)?;

    log::info!("Setting up {} fields", field_names.len());
    let field_definitions: Vec<(&str, gdal::vector::OGRFieldType::Type)> = field_names
        .iter()
        .map(|field_name| (field_name as &str, gdal::vector::OGRFieldType::OFTString))
        .collect();
    layer.create_defn_fields(&field_definitions)?;

    log::info!(
        "Writing {} features to {:?}",
        features.len(),
        output_filepath
    );
    unsafe {
        // Start a transaction in case the driver supports transactions, e.g. GeoPackage.
        // Committing all features once as opposed to per-feature is a massive speedup for these drivers.
        gdal_sys::OGR_L_StartTransaction(layer.c_layer());
    };
    let bar = ProgressBar::new(features.len() as u64);
    for feature in features {
        let wkb = wkb::geom_to_wkb(&feature.geometry)
            .map_err(|err| anyhow!("Could not write geometry to WKB, {:?}", err))?;
        let geometry = gdal::vector::Geometry::from_wkb(&wkb)?;

        match &feature.attributes {
            Some(attributes) => {
                // Fields missing from the feature are left null.
                let mut names = Vec::new();
                let mut values = Vec::new();
                for field_name in field_names {
                    if let Some(value) = attributes.get(field_name) {
                        names.push(field_name as &str);
                        values.push(gdal::vector::FieldValue::StringValue(value.to_owned()));
                    }
                }
                layer.create_feature_fields(geometry, &names, &values)?;
            }
            None => layer.create_feature(geometry)?,
        }

        bar.inc(1);
    }
    bar.finish_and_clear();
    let commit_result = unsafe { gdal_sys::OGR_L_CommitTransaction(layer.c_layer()) };
    if commit_result != gdal_sys::OGRErr::OGRERR_NONE {
        return Err(anyhow!(
            "Could not commit features to {:?}, OGR error {}",
            output_filepath,
            commit_result
        ));
    }
    Ok(())
}

fn field_value_to_string(value: gdal::vector::FieldValue) -> String {
    use gdal::vector::FieldValue::*;
    fn join<T: ToString>(values: Vec<T>) -> String {
        values
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<String>>()
            .join(",")
    }
    match value {
        StringValue(value) => value,
        IntegerValue(value) => value.to_string(),
        Integer64Value(value) => value.to_string(),
        RealValue(value) => value.to_string(),
        StringListValue(values) => values.join(","),
        IntegerListValue(values) => join(values),
        Integer64ListValue(values) => join(values),
        RealListValue(values) => join(values),
        DateValue(date) => date.naive_local().to_string(),
        DateTimeValue(datetime) => datetime.to_rfc3339(),
    }
}

fn open_vector_dataset(filepath: &Path) -> anyhow::Result<gdal::Dataset> {
    gdal::DriverManager::register_all();
    let mut open_options = gdal::DatasetOptions::default();
    open_options.open_flags = gdal::GdalOpenFlags::GDAL_OF_VECTOR;
    gdal::Dataset::open_ex(filepath, open_options)
        .with_context(|| format!("Opening vector dataset {:?}", filepath))
}

pub fn list_layer_names(dataset: &gdal::Dataset) -> Vec<String> {
    (0..dataset.layer_count())
        .filter_map(|index| dataset.layer(index).ok())
        .map(|layer| layer.name())
        .collect()
}

/// Read all features of one layer.
///
/// # Arguments
/// * filepath - any vector file GDAL can open.
/// * layer_name - the layer to read. If not specified, the file must contain exactly one layer.
pub fn read_layer_from_geofile(
    filepath: &Path,
    layer_name: Option<&str>,
) -> anyhow::Result<GeofileLayer> {
    let dataset = open_vector_dataset(filepath)?;

    let mut layer = match layer_name {
        Some(layer_name) => dataset.layer_by_name(layer_name).map_err(|_| {
            let message = format!(
                "Layer '{}' not found in {:?}. Available layers: {:?}",
                layer_name,
                filepath,
                list_layer_names(&dataset)
            );
            log::error!("{}", message);
            anyhow!(message)
        })?,
        None => {
            let layer_count = dataset.layer_count();
            if 0 == layer_count || 1 < layer_count {
                return Err(anyhow!(
                    "Found {} layers in {:?}, name the layer to read.",
                    layer_count,
                    filepath
                ));
            }
            dataset.layer(0)?
        }
    };
    let name = layer.name();

    let spatial_ref = match layer.spatial_ref() {
        Ok(spatial_ref) => spatial_ref,
        Err(_) => {
            log::warn!("Layer '{}' has no CRS, assuming EPSG:4326", name);
            epsg_4326()?
        }
    };
    let field_names: Vec<String> = layer.defn().fields().map(|field| field.name()).collect();

    let mut features = Vec::new();
    let mut num_without_geometry = 0;
    for gdal_feature in layer.features() {
        let geometry = match gdal_feature.geometry_by_index(0) {
            Ok(geometry) => geometry,
            Err(_) => {
                num_without_geometry += 1;
                continue;
            }
        };
        let wkb = geometry.wkb()?;
        let geometry = wkb::wkb_to_geom(&mut wkb.as_slice())
            .map_err(|err| anyhow!("Could not read geometry from WKB, {:?}", err))?;

        let attributes: FeatureMap = gdal_feature
            .fields()
            .filter_map(|(field_name, value)| {
                value.map(|value| (field_name, field_value_to_string(value)))
            })
            .collect();
        features.push(Feature::new_with_attributes(geometry, attributes));
    }
    if num_without_geometry > 0 {
        log::warn!(
            "Skipped {} features without geometry in layer '{}'",
            num_without_geometry,
            name
        );
    }
    log::info!(
        "Read {} features from layer '{}' of {:?}",
        features.len(),
        name,
        filepath
    );

    Ok(GeofileLayer {
        name,
        features,
        field_names,
        spatial_ref,
    })
}
