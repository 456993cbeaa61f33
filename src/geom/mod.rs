use anyhow::{Result, bail};
use geo::algorithm::centroid::Centroid;
use geo::Contains;
use geo_types::{Geometry, Point};
use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::features::{Feature, FeatureCollection, FieldValue, GeometryKind, Schema};

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// One nearest-neighbor match for an input point.
///
/// `angle` is the planar angle from the input point to the match location,
/// in degrees from the positive x axis, counterclockwise, range (-180, 180].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NearMatch {
    pub index: usize,
    pub distance: f64,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
}

/// Finds the nearest reference point for every input point under planar
/// Euclidean distance, unbounded search radius.
///
/// Ties are broken toward the lowest reference index (row order in the
/// reference collection), which keeps the result deterministic regardless of
/// index internals. An empty reference set yields `None` for every point.
pub fn nearest_matches(points: &[(f64, f64)], reference: &[(f64, f64)]) -> Vec<Option<NearMatch>> {
    if reference.is_empty() {
        return vec![None; points.len()];
    }

    let tree = RTree::bulk_load(
        reference
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| IndexedPoint::new([x, y], i))
            .collect(),
    );

    points
        .iter()
        .map(|&(x, y)| {
            let mut iter = tree.nearest_neighbor_iter_with_distance_2(&[x, y]);
            let (first, best_d2) = iter.next()?;
            let mut best = first.data;
            for (candidate, d2) in iter {
                if d2 > best_d2 {
                    break;
                }
                if candidate.data < best {
                    best = candidate.data;
                }
            }
            let (nx, ny) = reference[best];
            Some(NearMatch {
                index: best,
                distance: best_d2.sqrt(),
                x: nx,
                y: ny,
                angle: (ny - y).atan2(nx - x).to_degrees(),
            })
        })
        .collect()
}

/// Point-in-polygon test; a point exactly on the boundary belongs to no
/// polygon. Non-polygon geometries contain nothing.
pub fn polygon_contains(geometry: &Geometry<f64>, point: &Point<f64>) -> bool {
    match geometry {
        Geometry::Polygon(p) => p.contains(point),
        Geometry::MultiPolygon(mp) => mp.contains(point),
        _ => false,
    }
}

/// Partitions `features` into per-zone subsets by point-in-polygon test
/// against `zones`. Returned pairs are in zone listing order (the order
/// polygons appear in the zones collection); a zone key appearing on several
/// polygons accumulates into one subset. Zones with a null key are skipped
/// with a warning; empty subsets are not created.
pub fn split_by_zone(
    features: &FeatureCollection,
    zones: &FeatureCollection,
    zone_field: &str,
) -> Result<Vec<(String, FeatureCollection)>> {
    if zones.kind != GeometryKind::Polygon {
        bail!(
            "split: zone collection '{}' is {}-typed, expected polygons",
            zones.name,
            zones.kind.label()
        );
    }

    let mut subsets: Vec<(String, FeatureCollection)> = Vec::new();

    for zone in &zones.features {
        let Some(key) = zone.value(zone_field).key_string() else {
            tracing::warn!(
                "Zone polygon in '{}' has null {} value; skipping it",
                zones.name,
                zone_field
            );
            continue;
        };

        let members: Vec<Feature> = features
            .features
            .iter()
            .filter(|f| {
                f.point_coords()
                    .map(|(x, y)| polygon_contains(&zone.geometry, &Point::new(x, y)))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        if members.is_empty() {
            continue;
        }

        match subsets.iter_mut().find(|(k, _)| *k == key) {
            Some((_, subset)) => subset.features.extend(members),
            None => {
                let mut subset = FeatureCollection::new(
                    &format!("{}_{}", features.name, key),
                    features.kind,
                    features.schema.clone(),
                );
                subset.features = members;
                subsets.push((key, subset));
            }
        }
    }

    Ok(subsets)
}

/// Copies `fields` from `source` rows onto `target` rows, keyed by the
/// integer row index stored in `target`'s `key_field`. Rows with a null or
/// out-of-range key receive null values. Mutates `target` in place,
/// extending its schema with the joined fields.
pub fn join_field(
    target: &mut FeatureCollection,
    key_field: &str,
    source: &FeatureCollection,
    fields: &[&str],
) -> Result<()> {
    for field in fields {
        let Some(field_type) = source.schema.field_type(field) else {
            bail!(
                "join: field '{}' does not exist on '{}'",
                field,
                source.name
            );
        };
        target.schema.add_field(field, field_type);
    }

    for row in &mut target.features {
        let key = row.value(key_field).as_i64();
        for field in fields {
            let value = key
                .and_then(|k| usize::try_from(k).ok())
                .and_then(|k| source.features.get(k))
                .map(|src| src.value(field).clone())
                .unwrap_or(FieldValue::Null);
            row.set(field, value);
        }
    }

    Ok(())
}

/// Converts each polygon to its centroid point, carrying all attributes.
pub fn polygon_to_point(polygons: &FeatureCollection) -> Result<FeatureCollection> {
    let mut points = FeatureCollection::new(
        &format!("{}_points", polygons.name),
        GeometryKind::Point,
        polygons.schema.clone(),
    );

    for polygon in &polygons.features {
        let centroid = match &polygon.geometry {
            Geometry::Polygon(p) => p.centroid(),
            Geometry::MultiPolygon(mp) => mp.centroid(),
            _ => None,
        };
        let Some(centroid) = centroid else {
            bail!(
                "centroid: degenerate polygon in '{}' has no centroid",
                polygons.name
            );
        };
        let mut point = Feature::new(Geometry::Point(centroid));
        point.attrs = polygon.attrs.clone();
        points.push(point);
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FieldType;
    use geo_types::{LineString, Polygon};

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry<f64> {
        Geometry::Polygon(Polygon::new(
            LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]),
            vec![],
        ))
    }

    #[test]
    fn nearest_match_picks_closest() {
        let matches = nearest_matches(&[(0.0, 0.0)], &[(0.0, 1.0), (0.0, 10.0)]);
        let m = matches[0].unwrap();
        assert_eq!(m.index, 0);
        assert!((m.distance - 1.0).abs() < 1e-12);
        assert_eq!((m.x, m.y), (0.0, 1.0));
        assert!((m.angle - 90.0).abs() < 1e-9);
    }

    #[test]
    fn nearest_match_empty_reference_is_none() {
        let matches = nearest_matches(&[(0.0, 0.0), (1.0, 1.0)], &[]);
        assert_eq!(matches, vec![None, None]);
    }

    #[test]
    fn nearest_match_tie_breaks_to_lowest_index() {
        // Both references are exactly 1.0 away.
        let matches = nearest_matches(&[(0.0, 0.0)], &[(1.0, 0.0), (-1.0, 0.0)]);
        assert_eq!(matches[0].unwrap().index, 0);

        // Same geometry, swapped row order: the other one wins now.
        let matches = nearest_matches(&[(0.0, 0.0)], &[(-1.0, 0.0), (1.0, 0.0)]);
        assert_eq!(matches[0].unwrap().index, 0);
        assert_eq!((matches[0].unwrap().x, matches[0].unwrap().y), (-1.0, 0.0));
    }

    #[test]
    fn nearest_match_angle_is_planar_degrees() {
        let matches = nearest_matches(&[(0.0, 0.0)], &[(-1.0, 0.0)]);
        assert!((matches[0].unwrap().angle - 180.0).abs() < 1e-9);

        let matches = nearest_matches(&[(0.0, 0.0)], &[(1.0, -1.0)]);
        assert!((matches[0].unwrap().angle + 45.0).abs() < 1e-9);
    }

    fn zone_collection() -> FeatureCollection {
        let mut schema = Schema::new();
        schema.add_field("Name", FieldType::Text);
        let mut zones = FeatureCollection::new("zones", GeometryKind::Polygon, schema);

        let mut west = Feature::new(square(0.0, 0.0, 2.0, 4.0));
        west.set("Name", FieldValue::Text("West".into()));
        zones.push(west);

        let mut east = Feature::new(square(2.0, 0.0, 4.0, 4.0));
        east.set("Name", FieldValue::Text("East".into()));
        zones.push(east);

        zones
    }

    fn point_collection(coords: &[(f64, f64)]) -> FeatureCollection {
        let mut fc = FeatureCollection::new("points", GeometryKind::Point, Schema::new());
        for &(x, y) in coords {
            fc.push(Feature::point(x, y));
        }
        fc
    }

    #[test]
    fn split_assigns_points_to_containing_zone() {
        let zones = zone_collection();
        let points = point_collection(&[(0.5, 0.5), (3.5, 3.5), (1.0, 1.0)]);

        let subsets = split_by_zone(&points, &zones, "Name").unwrap();
        assert_eq!(subsets.len(), 2);
        assert_eq!(subsets[0].0, "West");
        assert_eq!(subsets[0].1.len(), 2);
        assert_eq!(subsets[1].0, "East");
        assert_eq!(subsets[1].1.len(), 1);
    }

    #[test]
    fn split_omits_empty_zones() {
        let zones = zone_collection();
        let points = point_collection(&[(0.5, 0.5)]);

        let subsets = split_by_zone(&points, &zones, "Name").unwrap();
        assert_eq!(subsets.len(), 1);
        assert_eq!(subsets[0].0, "West");
    }

    #[test]
    fn split_skips_null_zone_key() {
        let mut zones = zone_collection();
        zones.push(Feature::new(square(0.0, 4.0, 4.0, 8.0)));
        let points = point_collection(&[(1.0, 6.0)]);

        let subsets = split_by_zone(&points, &zones, "Name").unwrap();
        assert!(subsets.is_empty());
    }

    #[test]
    fn split_follows_zone_listing_order() {
        let mut zones = zone_collection();
        zones.features.reverse();
        let points = point_collection(&[(0.5, 0.5), (3.5, 3.5)]);

        let subsets = split_by_zone(&points, &zones, "Name").unwrap();
        assert_eq!(subsets[0].0, "East");
        assert_eq!(subsets[1].0, "West");
    }

    #[test]
    fn join_field_copies_values_by_row_index() {
        let mut source_schema = Schema::new();
        source_schema.add_field("RM_final", FieldType::Double);
        let mut source = FeatureCollection::new("miles", GeometryKind::Point, source_schema);
        let mut m = Feature::point(0.0, 1.0);
        m.set("RM_final", FieldValue::Double(5.0));
        source.push(m);

        let mut target = point_collection(&[(0.0, 0.0), (9.0, 9.0)]);
        target.schema.add_field("NEAR_FID", FieldType::Integer);
        target.features[0].set("NEAR_FID", FieldValue::Integer(0));
        target.features[1].set("NEAR_FID", FieldValue::Null);

        join_field(&mut target, "NEAR_FID", &source, &["RM_final"]).unwrap();

        assert_eq!(
            target.features[0].value("RM_final"),
            &FieldValue::Double(5.0)
        );
        assert!(target.features[1].value("RM_final").is_null());
        assert_eq!(
            target.schema.field_type("RM_final"),
            Some(FieldType::Double)
        );
    }

    #[test]
    fn join_field_rejects_missing_source_field() {
        let source = point_collection(&[(0.0, 0.0)]);
        let mut target = point_collection(&[(0.0, 0.0)]);
        let err = join_field(&mut target, "NEAR_FID", &source, &["missing"]).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn polygon_to_point_keeps_attributes() {
        let zones = zone_collection();
        let points = polygon_to_point(&zones).unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points.kind, GeometryKind::Point);
        assert_eq!(points.features[0].point_coords(), Some((1.0, 2.0)));
        assert_eq!(
            points.features[0].value("Name"),
            &FieldValue::Text("West".into())
        );
    }
}
