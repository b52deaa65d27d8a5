use std::collections::HashSet;

use geo::{BoundingRect, Intersects};
use indicatif::ProgressBar;
use serde::Deserialize;

use crate::geofile::feature::{Feature, FeatureMap};

use super::layers::{PointFeature, PolygonFeature};

/// Which layer drives the outer loop of the matcher. The first intersecting pair found for a polygon wins, so
/// the order decides the order of the output records.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchOrder {
    #[default]
    PointsFirst,
    PolygonsFirst,
}

#[derive(Debug, Clone, Default)]
pub struct MatchParams {
    /// Names of the point attributes copied into each merged record.
    pub attributes: Vec<String>,
    pub order: MatchOrder,
    /// If set, a point supplies attributes to at most one polygon.
    pub exclusive_points: bool,
}

/// A polygon together with the attributes of the point that matched it.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedFeature {
    pub id: String,
    pub geometry: geo::MultiPolygon,
    pub attributes: FeatureMap,
    /// `PointFeature::index` of the point the attributes were copied from.
    pub point_index: usize,
}

impl MergedFeature {
    fn new(polygon: &PolygonFeature, point: &PointFeature, attribute_names: &[String]) -> Self {
        let attributes = attribute_names
            .iter()
            .filter_map(|name| {
                point
                    .attributes
                    .get(name)
                    .map(|value| (name.to_owned(), value.to_owned()))
            })
            .collect();
        Self {
            id: polygon.id.clone(),
            geometry: polygon.geometry.clone(),
            attributes,
            point_index: point.index,
        }
    }

    /// Convert into a writable feature, storing the identifier under `id_field`.
    pub fn to_feature(&self, id_field: &str) -> Feature {
        let mut attributes = self.attributes.clone();
        attributes.insert(id_field.to_owned(), self.id.clone());
        Feature::new_with_attributes(geo::Geometry::MultiPolygon(self.geometry.clone()), attributes)
    }
}

/// Field names of the output layer: the identifier first, then the copied attributes.
pub fn output_field_names(id_field: &str, attributes: &[String]) -> Vec<String> {
    let mut field_names = vec![id_field.to_owned()];
    for name in attributes {
        if !field_names.contains(name) {
            field_names.push(name.to_owned());
        }
    }
    field_names
}

/// True if any point lies inside or on the boundary of any polygon.
pub fn polygon_intersects_points(polygon: &geo::MultiPolygon, points: &geo::MultiPoint) -> bool {
    points
        .iter()
        .any(|point| polygon.iter().any(|part| part.intersects(&point.0)))
}

type Envelope = rstar::primitives::GeomWithData<rstar::primitives::Rectangle<[f64; 2]>, usize>;

/// R-tree over the bounding boxes of a sequence of geometries, keyed by their position in the sequence.
pub struct EnvelopeIndex {
    rtree: rstar::RTree<Envelope>,
}

impl EnvelopeIndex {
    /// Geometries without a bounding box (empty ones) are left out of the index.
    pub fn new<I: IntoIterator<Item = Option<geo::Rect>>>(rects: I) -> Self {
        let envelopes: Vec<Envelope> = rects
            .into_iter()
            .enumerate()
            .filter_map(|(index, rect)| {
                let rect = rect?;
                let rectangle = rstar::primitives::Rectangle::from_corners(
                    [rect.min().x, rect.min().y],
                    [rect.max().x, rect.max().y],
                );
                Some(Envelope::new(rectangle, index))
            })
            .collect();
        Self {
            rtree: rstar::RTree::bulk_load(envelopes),
        }
    }

    /// Positions of all geometries whose bounding box touches `rect`, in ascending order.
    pub fn candidates(&self, rect: &geo::Rect) -> Vec<usize> {
        let envelope = rstar::AABB::from_corners(
            [rect.min().x, rect.min().y],
            [rect.max().x, rect.max().y],
        );
        let mut candidates: Vec<usize> = self
            .rtree
            .locate_in_envelope_intersecting(&envelope)
            .map(|item| item.data)
            .collect();
        candidates.sort_unstable();
        candidates
    }
}

/// Join points to the polygons they intersect.
///
/// Each polygon identifier is recorded at most once: the first intersecting point found, in the iteration order
/// given by `params.order`, supplies the attributes and later matches for that identifier are skipped. Polygons
/// that no point intersects produce no record. Candidate pairs are pruned with bounding boxes only; the result is
/// the same as testing every pair in input order.
pub fn match_polygons_to_points(
    polygons: &[PolygonFeature],
    points: &[PointFeature],
    params: &MatchParams,
) -> Vec<MergedFeature> {
    log::info!(
        "Matching {} polygons against {} points, {:?}",
        polygons.len(),
        points.len(),
        params.order
    );
    let merged = match params.order {
        MatchOrder::PointsFirst => match_points_first(polygons, points, params),
        MatchOrder::PolygonsFirst => match_polygons_first(polygons, points, params),
    };
    log::info!(
        "Matched {} of {} polygons",
        merged.len(),
        polygons.len()
    );
    merged
}

fn match_points_first(
    polygons: &[PolygonFeature],
    points: &[PointFeature],
    params: &MatchParams,
) -> Vec<MergedFeature> {
    let index = EnvelopeIndex::new(polygons.iter().map(|polygon| polygon.geometry.bounding_rect()));
    let mut consumed_ids: HashSet<&str> = HashSet::new();
    let mut merged = Vec::new();

    let bar = ProgressBar::new(points.len() as u64);
    for point in points {
        bar.inc(1);
        let rect = match point.geometry.bounding_rect() {
            Some(rect) => rect,
            None => continue,
        };
        for polygon_index in index.candidates(&rect) {
            let polygon = &polygons[polygon_index];
            if consumed_ids.contains(polygon.id.as_str())
                || !polygon_intersects_points(&polygon.geometry, &point.geometry)
            {
                continue;
            }
            merged.push(MergedFeature::new(polygon, point, &params.attributes));
            consumed_ids.insert(polygon.id.as_str());
            if params.exclusive_points {
                break;
            }
        }
    }
    bar.finish_and_clear();
    merged
}

fn match_polygons_first(
    polygons: &[PolygonFeature],
    points: &[PointFeature],
    params: &MatchParams,
) -> Vec<MergedFeature> {
    let index = EnvelopeIndex::new(points.iter().map(|point| point.geometry.bounding_rect()));
    let mut consumed_ids: HashSet<&str> = HashSet::new();
    let mut used_points: HashSet<usize> = HashSet::new();
    let mut merged = Vec::new();

    let bar = ProgressBar::new(polygons.len() as u64);
    for polygon in polygons {
        bar.inc(1);
        if consumed_ids.contains(polygon.id.as_str()) {
            continue;
        }
        let rect = match polygon.geometry.bounding_rect() {
            Some(rect) => rect,
            None => continue,
        };
        let matching_point = index.candidates(&rect).into_iter().find(|point_index| {
            !(params.exclusive_points && used_points.contains(point_index))
                && polygon_intersects_points(&polygon.geometry, &points[*point_index].geometry)
        });
        if let Some(point_index) = matching_point {
            merged.push(MergedFeature::new(
                polygon,
                &points[point_index],
                &params.attributes,
            ));
            consumed_ids.insert(polygon.id.as_str());
            used_points.insert(point_index);
        }
    }
    bar.finish_and_clear();
    merged
}
