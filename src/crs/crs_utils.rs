use anyhow::{anyhow, Context};
use proj::Transform;

pub type EpsgCode = u32;

pub fn epsg_4326() -> anyhow::Result<gdal::spatial_ref::SpatialRef> {
    spatial_ref_from_epsg(4326)
}

pub fn spatial_ref_from_epsg(code: EpsgCode) -> anyhow::Result<gdal::spatial_ref::SpatialRef> {
    gdal::spatial_ref::SpatialRef::from_epsg(code)
        .map_err(|err| anyhow!("Could not create SpatialRef from EPSG code {}. {}", code, err))
}

pub fn epsg_code_to_authority_string(code: EpsgCode) -> String {
    format!("EPSG:{}", code)
}

/// EPSG authority code of a spatial reference. Fails for CRSs that are not registered with EPSG, since those
/// cannot be handed to PROJ by name.
pub fn auth_code_of(spatial_ref: &gdal::spatial_ref::SpatialRef) -> anyhow::Result<EpsgCode> {
    let code = spatial_ref
        .auth_code()
        .context("CRS has no EPSG authority code")?;
    EpsgCode::try_from(code).map_err(|_| anyhow!("Invalid EPSG authority code {}", code))
}

pub fn same_crs(
    a: &gdal::spatial_ref::SpatialRef,
    b: &gdal::spatial_ref::SpatialRef,
) -> anyhow::Result<bool> {
    Ok(auth_code_of(a)? == auth_code_of(b)?)
}

/// Build a PROJ transformation between two spatial references. Coordinates are in x/y (lon/lat) order on both
/// sides, regardless of the axis order the authority defines.
pub fn build_projection(
    from_crs: &gdal::spatial_ref::SpatialRef,
    to_crs: &gdal::spatial_ref::SpatialRef,
) -> anyhow::Result<proj::Proj> {
    let from = epsg_code_to_authority_string(auth_code_of(from_crs)?);
    let to = epsg_code_to_authority_string(auth_code_of(to_crs)?);
    proj::Proj::new_known_crs(&from, &to, None)
        .with_context(|| format!("Could not build projection from {} to {}", from, to))
}

/// Transform every geometry in place with the given projection.
pub fn transform_geometries<'a, G, I>(geometries: I, projection: &proj::Proj) -> anyhow::Result<()>
where
    G: Transform<f64> + 'a,
    I: IntoIterator<Item = &'a mut G>,
{
    for geometry in geometries {
        geometry
            .transform(projection)
            .map_err(|err| anyhow!("Could not project geometry, {}", err))?;
    }
    Ok(())
}
