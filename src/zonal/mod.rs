use anyhow::{Context, Result};
use geo_types::Point;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::features::{FeatureCollection, FieldType, FieldValue};
use crate::geom;
use crate::io;
use crate::raster::GridRaster;

pub const MIN_FIELD: &str = "MIN";
pub const MAX_FIELD: &str = "MAX";
pub const MEAN_FIELD: &str = "MEAN";

pub struct ZonalStatsParams {
    pub zones: FeatureCollection,
    pub zone_field: String,
    pub raster: GridRaster,
    pub output_path: PathBuf,
}

/// Aggregate raster statistics for one zone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZoneStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub cell_count: u64,
}

#[derive(Clone, Copy, Debug)]
struct Accumulating {
    min: f64,
    max: f64,
    sum: f64,
    count: u64,
}

/// Computes MIN/MAX/MEAN of raster cell values per zone in a single pass
/// over the grid. A cell belongs to the first zone (in listing order) whose
/// polygon contains its center; cells outside every zone are ignored. Zones
/// covering no cells are absent from the result.
pub fn zonal_statistics(
    zones: &FeatureCollection,
    zone_field: &str,
    raster: &GridRaster,
) -> Result<HashMap<String, ZoneStats>> {
    let keyed: Vec<(String, &crate::features::Feature)> = zones
        .features
        .iter()
        .filter_map(|z| z.value(zone_field).key_string().map(|k| (k, z)))
        .collect();

    let mut accumulators: HashMap<String, Accumulating> = HashMap::new();
    for (x, y, value) in raster.cells() {
        let center = Point::new(x, y);
        let Some((key, _)) = keyed
            .iter()
            .find(|(_, zone)| geom::polygon_contains(&zone.geometry, &center))
        else {
            continue;
        };
        accumulators
            .entry(key.clone())
            .and_modify(|acc| {
                acc.min = acc.min.min(value);
                acc.max = acc.max.max(value);
                acc.sum += value;
                acc.count += 1;
            })
            .or_insert(Accumulating {
                min: value,
                max: value,
                sum: value,
                count: 1,
            });
    }

    Ok(accumulators
        .into_iter()
        .map(|(key, acc)| {
            (
                key,
                ZoneStats {
                    min: acc.min,
                    max: acc.max,
                    mean: acc.sum / acc.count as f64,
                    cell_count: acc.count,
                },
            )
        })
        .collect())
}

/// Full zonal-statistics operation: statistics over all zones in one pass,
/// zone polygons converted to centroid points, statistics joined onto the
/// points by zone-field value. Any step failing aborts the whole
/// aggregation; the output file is written only at the very end, so there
/// is never a partial result on disk.
pub fn run(params: ZonalStatsParams) -> Result<usize> {
    let ZonalStatsParams {
        zones,
        zone_field,
        raster,
        output_path,
    } = params;

    tracing::info!("Computing zonal statistics ...");
    let stats = zonal_statistics(&zones, &zone_field, &raster)?;

    tracing::info!("Converting zones to points ...");
    let mut points = geom::polygon_to_point(&zones).context("ZonalStats: centroid step failed")?;

    tracing::info!("Joining statistics ...");
    points.schema.add_field(MIN_FIELD, FieldType::Double);
    points.schema.add_field(MAX_FIELD, FieldType::Double);
    points.schema.add_field(MEAN_FIELD, FieldType::Double);
    for point in &mut points.features {
        let zone_stats = point
            .value(&zone_field)
            .key_string()
            .and_then(|key| stats.get(&key).copied());
        match zone_stats {
            Some(s) => {
                point.set(MIN_FIELD, FieldValue::Double(s.min));
                point.set(MAX_FIELD, FieldValue::Double(s.max));
                point.set(MEAN_FIELD, FieldValue::Double(s.mean));
            }
            None => {
                point.set(MIN_FIELD, FieldValue::Null);
                point.set(MAX_FIELD, FieldValue::Null);
                point.set(MEAN_FIELD, FieldValue::Null);
            }
        }
    }

    io::write_feature_collection(&output_path, &points)
        .context("ZonalStats: failed to write output")?;
    tracing::info!("All done!");
    Ok(points.len())
}
