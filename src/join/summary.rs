use std::collections::HashMap;

use rayon::prelude::*;

use super::{
    layers::PointFeature,
    matcher::{polygon_intersects_points, MergedFeature},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointCount {
    pub id: String,
    pub point_count: usize,
}

/// Count, for every merged polygon, the distinct points intersecting its geometry.
///
/// Every polygon is tested against every point, polygons outer, without the matcher's index.
pub fn count_points_per_polygon(
    merged: &[MergedFeature],
    points: &[PointFeature],
) -> Vec<PointCount> {
    merged
        .par_iter()
        .map(|feature| PointCount {
            id: feature.id.clone(),
            point_count: points
                .iter()
                .filter(|point| polygon_intersects_points(&feature.geometry, &point.geometry))
                .count(),
        })
        .collect()
}

/// Check the counts against the merge. Every merged polygon must have exactly one count, and since it was merged
/// with a point, that count must be at least one. Returns the ids that disagree.
pub fn check_summary_agrees(merged: &[MergedFeature], counts: &[PointCount]) -> Vec<String> {
    let mut counts_by_id: HashMap<&str, Vec<usize>> = HashMap::new();
    for count in counts {
        counts_by_id
            .entry(count.id.as_str())
            .or_default()
            .push(count.point_count);
    }

    let mut disagreeing = Vec::new();
    for feature in merged {
        match counts_by_id.get(feature.id.as_str()).map(|counts| counts.as_slice()) {
            Some([count]) if *count > 0 => {}
            Some([0]) => {
                log::warn!(
                    "Polygon {} was merged with point {} but no intersecting point was counted",
                    feature.id,
                    feature.point_index
                );
                disagreeing.push(feature.id.clone());
            }
            Some(counts) => {
                log::warn!("Polygon {} has {} summary rows", feature.id, counts.len());
                disagreeing.push(feature.id.clone());
            }
            None => {
                log::warn!("Polygon {} is missing from the summary", feature.id);
                disagreeing.push(feature.id.clone());
            }
        }
    }
    if disagreeing.is_empty() {
        log::info!("Summary counts agree with {} merged polygons", merged.len());
    }
    disagreeing
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{check_summary_agrees, count_points_per_polygon, PointCount};
    use crate::{
        geofile::feature::FeatureMap,
        join::{
            layers::{PointFeature, PolygonFeature},
            matcher::{match_polygons_to_points, MatchOrder, MatchParams, MergedFeature},
        },
    };

    fn rect_polygon(id: &str, min: (f64, f64), max: (f64, f64)) -> PolygonFeature {
        PolygonFeature {
            id: id.to_string(),
            geometry: geo::MultiPolygon(vec![geo::Rect::new(min, max).to_polygon()]),
        }
    }

    fn point(index: usize, x: f64, y: f64) -> PointFeature {
        PointFeature {
            index,
            geometry: geo::MultiPoint(vec![geo::Point::new(x, y)]),
            attributes: FeatureMap::new(),
        }
    }

    fn count(id: &str, point_count: usize) -> PointCount {
        PointCount {
            id: id.to_string(),
            point_count,
        }
    }

    #[rstest]
    fn test_counts_distinct_points_per_kept_polygon(
        #[values(MatchOrder::PointsFirst, MatchOrder::PolygonsFirst)] order: MatchOrder,
    ) {
        let polygons = vec![
            rect_polygon("A", (0.0, 0.0), (2.0, 2.0)),
            rect_polygon("B", (1.0, 1.0), (3.0, 3.0)),
            rect_polygon("C", (10.0, 10.0), (11.0, 11.0)),
        ];
        let points = vec![
            point(0, 0.5, 0.5),
            point(1, 1.5, 1.5),
            point(2, 2.5, 2.5),
            point(3, 2.0, 2.0),
            point(4, 50.0, 50.0),
        ];
        let merged = match_polygons_to_points(
            &polygons,
            &points,
            &MatchParams {
                order,
                ..Default::default()
            },
        );
        let mut counts = count_points_per_polygon(&merged, &points);
        counts.sort_by(|a, b| a.id.cmp(&b.id));

        // C has no points and therefore no merged record to count.
        assert_eq!(vec![count("A", 3), count("B", 3)], counts);
        assert!(check_summary_agrees(&merged, &counts).is_empty());
    }

    #[rstest]
    fn test_counts_keep_merge_order() {
        let merged: Vec<MergedFeature> = ["Z", "A", "M"]
            .iter()
            .map(|id| MergedFeature {
                id: id.to_string(),
                geometry: geo::MultiPolygon(vec![geo::Rect::new((0.0, 0.0), (1.0, 1.0)).to_polygon()]),
                attributes: FeatureMap::new(),
                point_index: 0,
            })
            .collect();
        let counts = count_points_per_polygon(&merged, &[point(0, 0.5, 0.5)]);
        assert_eq!(vec![count("Z", 1), count("A", 1), count("M", 1)], counts);
    }

    #[rstest]
    fn test_check_summary_reports_disagreements() {
        let merged: Vec<MergedFeature> = ["ok", "zero", "missing", "twice"]
            .iter()
            .map(|id| MergedFeature {
                id: id.to_string(),
                geometry: geo::MultiPolygon(vec![]),
                attributes: FeatureMap::new(),
                point_index: 0,
            })
            .collect();
        let counts = vec![
            count("ok", 2),
            count("zero", 0),
            count("twice", 1),
            count("twice", 1),
            count("unrelated", 4),
        ];
        assert_eq!(
            vec!["zero", "missing", "twice"],
            check_summary_agrees(&merged, &counts)
        );
    }
}
