use geo_types::{Geometry, LineString};
use std::path::PathBuf;
use thiserror::Error;

use crate::features::{FeatureCollection, FieldType, FieldValue, GeometryKind};
use crate::geom;
use crate::io;
use crate::raster::GridRaster;
use crate::workspace::Workspace;

pub const NEAR_FID: &str = "NEAR_FID";
pub const NEAR_DIST: &str = "NEAR_DIST";
pub const NEAR_X: &str = "NEAR_X";
pub const NEAR_Y: &str = "NEAR_Y";
pub const NEAR_ANGLE: &str = "NEAR_ANGLE";

#[derive(Debug, Error)]
pub enum ProjectError {
    /// A geometry or raster operation failed. Carries the underlying
    /// message text; fatal to the run, no retry.
    #[error("{stage} failed: {message}")]
    Service { stage: &'static str, message: String },

    /// A zone present in one partition but absent in the other. Fatal:
    /// silently skipping the zone would produce an output that looks
    /// complete while missing unannounced data.
    #[error("zone '{zone}' has {present} features but no matching {missing} subset")]
    PartitionMismatch {
        zone: String,
        present: &'static str,
        missing: &'static str,
    },

    /// A later zone's result disagrees with the established output schema.
    #[error(
        "schema mismatch appending zone '{zone}': output fields {expected:?}, zone fields {found:?}"
    )]
    SchemaMismatch {
        zone: String,
        expected: Vec<String>,
        found: Vec<String>,
    },
}

impl ProjectError {
    fn service(stage: &'static str, err: anyhow::Error) -> Self {
        ProjectError::Service {
            stage,
            message: format!("{err:#}"),
        }
    }

    fn internal(stage: &'static str, message: &str) -> Self {
        ProjectError::Service {
            stage,
            message: message.to_string(),
        }
    }
}

pub struct ZoneParams {
    pub zones: FeatureCollection,
    pub zone_field: String,
}

pub struct ProjectParams {
    pub points: FeatureCollection,
    pub reference: FeatureCollection,
    pub distance_field: String,
    pub zones: Option<ZoneParams>,
    pub raster: GridRaster,
    pub elevation_field: String,
    pub output_path: PathBuf,
    pub remove_nulls: bool,
    pub lines_path: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub zones_processed: usize,
    pub output_rows: usize,
    pub nulls_removed: usize,
    pub lines_written: usize,
}

/// One zone's paired subsets, by scratch workspace name. Pairing is
/// explicit; the storage names are never parsed to recover the zone.
#[derive(Clone, Debug)]
pub struct ZonePair {
    pub key: String,
    pub points: String,
    pub reference: String,
}

/// Splits both inputs by zone and pairs the subsets. Pairs follow the
/// points-partition listing order. A zone key present on one side only is a
/// fatal `PartitionMismatch`; every mismatch is logged before the first one
/// aborts the run.
pub fn partition_zones(
    workspace: &mut Workspace,
    points: &FeatureCollection,
    reference: &FeatureCollection,
    zones: &FeatureCollection,
    zone_field: &str,
) -> Result<Vec<ZonePair>, ProjectError> {
    tracing::info!("Splitting points based on zones ...");
    let point_subsets = geom::split_by_zone(points, zones, zone_field)
        .map_err(|err| ProjectError::service("Split", err))?;

    tracing::info!("Splitting reference points based on zones ...");
    let reference_subsets = geom::split_by_zone(reference, zones, zone_field)
        .map_err(|err| ProjectError::service("Split", err))?;

    let mut mismatch: Option<ProjectError> = None;
    for (key, _) in &point_subsets {
        if !reference_subsets.iter().any(|(k, _)| k == key) {
            tracing::error!("Zone '{}' has points but no reference subset", key);
            mismatch.get_or_insert(ProjectError::PartitionMismatch {
                zone: key.clone(),
                present: "point",
                missing: "reference",
            });
        }
    }
    for (key, _) in &reference_subsets {
        if !point_subsets.iter().any(|(k, _)| k == key) {
            tracing::error!("Zone '{}' has reference points but no point subset", key);
            mismatch.get_or_insert(ProjectError::PartitionMismatch {
                zone: key.clone(),
                present: "reference",
                missing: "point",
            });
        }
    }
    if let Some(err) = mismatch {
        return Err(err);
    }

    let mut pairs = Vec::with_capacity(point_subsets.len());
    let mut reference_names: Vec<(String, String)> = Vec::new();
    for (key, subset) in reference_subsets {
        reference_names.push((key, workspace.insert(subset)));
    }
    for (key, subset) in point_subsets {
        let points_name = workspace.insert(subset);
        let reference_name = reference_names
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, name)| name.clone())
            .ok_or_else(|| ProjectError::internal("Split", "paired subset vanished"))?;
        pairs.push(ZonePair {
            key,
            points: points_name,
            reference: reference_name,
        });
    }
    Ok(pairs)
}

/// The near join: nearest-neighbor match, distance-field join, elevation
/// extraction. Mutates `q` in place; the three steps are not transactional,
/// which is safe because `q` lives in scratch storage that is discarded
/// wholesale on abort.
pub fn near_join_extract(
    q: &mut FeatureCollection,
    reference: &FeatureCollection,
    distance_field: &str,
    raster: &GridRaster,
    elevation_field: &str,
) -> Result<(), ProjectError> {
    tracing::info!("Finding closest points ...");
    let matches = geom::nearest_matches(&q.point_coords(), &reference.point_coords());

    q.schema.add_field(NEAR_FID, FieldType::Integer);
    q.schema.add_field(NEAR_DIST, FieldType::Double);
    q.schema.add_field(NEAR_X, FieldType::Double);
    q.schema.add_field(NEAR_Y, FieldType::Double);
    q.schema.add_field(NEAR_ANGLE, FieldType::Double);

    for (feature, near) in q.features.iter_mut().zip(&matches) {
        match near {
            Some(m) => {
                feature.set(NEAR_FID, FieldValue::Integer(m.index as i64));
                feature.set(NEAR_DIST, FieldValue::Double(m.distance));
                feature.set(NEAR_X, FieldValue::Double(m.x));
                feature.set(NEAR_Y, FieldValue::Double(m.y));
                feature.set(NEAR_ANGLE, FieldValue::Double(m.angle));
            }
            None => {
                feature.set(NEAR_FID, FieldValue::Null);
                feature.set(NEAR_DIST, FieldValue::Null);
                feature.set(NEAR_X, FieldValue::Null);
                feature.set(NEAR_Y, FieldValue::Null);
                feature.set(NEAR_ANGLE, FieldValue::Null);
            }
        }
    }

    tracing::info!("Joining ...");
    if reference.schema.has_field(distance_field) {
        geom::join_field(q, NEAR_FID, reference, &[distance_field])
            .map_err(|err| ProjectError::service("Join", err))?;
    } else if reference.is_empty() {
        // Nothing to join from; the field still lands on the schema so the
        // output always carries it, null throughout.
        q.schema.add_field(distance_field, FieldType::Double);
        for feature in &mut q.features {
            feature.set(distance_field, FieldValue::Null);
        }
    } else {
        return Err(ProjectError::internal(
            "Join",
            &format!(
                "field '{}' does not exist on reference collection '{}'",
                distance_field, reference.name
            ),
        ));
    }

    tracing::info!("Extracting elevation ...");
    q.schema.add_field(elevation_field, FieldType::Double);
    for feature in &mut q.features {
        let value = feature
            .point_coords()
            .and_then(|(x, y)| raster.sample(x, y))
            .map(FieldValue::Double)
            .unwrap_or(FieldValue::Null);
        feature.set(elevation_field, value);
    }

    Ok(())
}

/// Builds the final output incrementally: the first zone's result is copied
/// (merge; establishes the schema) and each later result is appended after a
/// field-set check. The file on disk is rewritten after every successful
/// accumulate, so the output exists and is complete-per-zone throughout.
pub struct OutputAccumulator {
    path: PathBuf,
    output: Option<FeatureCollection>,
    zones_written: usize,
}

impl OutputAccumulator {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            output: None,
            zones_written: 0,
        }
    }

    pub fn accumulate(
        &mut self,
        zone: &str,
        mut result: FeatureCollection,
    ) -> Result<(), ProjectError> {
        match &mut self.output {
            None => {
                result.name = "output".to_string();
                self.output = Some(result);
            }
            Some(output) => {
                if !output.schema.same_fields(&result.schema) {
                    return Err(ProjectError::SchemaMismatch {
                        zone: zone.to_string(),
                        expected: output.schema.names().map(String::from).collect(),
                        found: result.schema.names().map(String::from).collect(),
                    });
                }
                output.features.append(&mut result.features);
            }
        }

        if let Some(output) = &self.output {
            io::write_feature_collection(&self.path, output)
                .map_err(|err| ProjectError::service("Accumulate", err))?;
        }
        self.zones_written += 1;
        Ok(())
    }

    pub fn zones_written(&self) -> usize {
        self.zones_written
    }

    pub fn output(&self) -> Option<&FeatureCollection> {
        self.output.as_ref()
    }

    pub fn output_mut(&mut self) -> Option<&mut FeatureCollection> {
        self.output.as_mut()
    }

    /// Removes a half-built output file. Called only when the run aborts
    /// before any zone accumulated; a missing file is not an error.
    pub fn discard(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Deletes output rows whose distance field is null. Runs once over the
/// whole accumulated output, never per zone. Idempotent.
pub fn remove_null_distance(output: &mut FeatureCollection, distance_field: &str) -> usize {
    let before = output.len();
    output
        .features
        .retain(|f| !f.value(distance_field).is_null());
    before - output.len()
}

pub fn deletion_message(count: usize) -> String {
    if count == 1 {
        "1 projected point with no distance value was deleted.".to_string()
    } else {
        format!("{} projected points with no distance value were deleted.", count)
    }
}

/// One line per matched output point, from the point's location to its
/// recorded match location. Reads the output without mutating it; unmatched
/// points (null NEAR_X/NEAR_Y) produce no line.
pub fn projection_lines(output: &FeatureCollection) -> FeatureCollection {
    let mut lines =
        FeatureCollection::new("projection_lines", GeometryKind::Line, output.schema.clone());

    for feature in &output.features {
        let Some((x, y)) = feature.point_coords() else {
            continue;
        };
        let (Some(nx), Some(ny)) = (
            feature.value(NEAR_X).as_f64(),
            feature.value(NEAR_Y).as_f64(),
        ) else {
            continue;
        };
        let mut line = feature.clone();
        line.geometry = Geometry::LineString(LineString::from(vec![(x, y), (nx, ny)]));
        lines.push(line);
    }

    lines
}

/// Runs the whole projection. The caller supplies the scratch workspace;
/// it is cleared exactly once here on every exit path. An output file is
/// deleted on failure only when no zone accumulated successfully, so a
/// partially completed zoned run keeps exactly its finished zones.
pub fn run(workspace: &mut Workspace, params: ProjectParams) -> Result<RunSummary, ProjectError> {
    let mut accumulator = OutputAccumulator::new(params.output_path.clone());
    let result = run_stages(workspace, &mut accumulator, params);

    workspace.clear();
    if result.is_err() && accumulator.zones_written() == 0 {
        accumulator.discard();
    }
    result
}

fn run_stages(
    workspace: &mut Workspace,
    accumulator: &mut OutputAccumulator,
    params: ProjectParams,
) -> Result<RunSummary, ProjectError> {
    tracing::info!("Getting things started ...");
    let ProjectParams {
        points,
        reference,
        distance_field,
        zones,
        raster,
        elevation_field,
        output_path: _,
        remove_nulls,
        lines_path,
    } = params;

    let mut summary = RunSummary::default();

    if let Some(zone_params) = zones {
        let pairs = partition_zones(
            workspace,
            &points,
            &reference,
            &zone_params.zones,
            &zone_params.zone_field,
        )?;

        for pair in &pairs {
            tracing::info!("Working on zone: {}", pair.key);
            let reference_subset = workspace
                .take(&pair.reference)
                .ok_or_else(|| ProjectError::internal("Near", "reference subset missing"))?;
            let subset = workspace
                .get_mut(&pair.points)
                .ok_or_else(|| ProjectError::internal("Near", "point subset missing"))?;
            near_join_extract(
                subset,
                &reference_subset,
                &distance_field,
                &raster,
                &elevation_field,
            )?;
            let subset = workspace
                .take(&pair.points)
                .ok_or_else(|| ProjectError::internal("Merge", "point subset missing"))?;
            accumulator.accumulate(&pair.key, subset)?;
            summary.zones_processed += 1;
        }
    } else {
        let mut working = points;
        working.name = "points_working".to_string();
        let name = workspace.insert(working);
        let subset = workspace
            .get_mut(&name)
            .ok_or_else(|| ProjectError::internal("Near", "working copy missing"))?;
        near_join_extract(subset, &reference, &distance_field, &raster, &elevation_field)?;
        let subset = workspace
            .take(&name)
            .ok_or_else(|| ProjectError::internal("Merge", "working copy missing"))?;
        accumulator.accumulate("all", subset)?;
        summary.zones_processed = 1;
    }

    if remove_nulls && let Some(output) = accumulator.output_mut() {
        summary.nulls_removed = remove_null_distance(output, &distance_field);
        tracing::info!("{}", deletion_message(summary.nulls_removed));
        if summary.nulls_removed > 0 {
            let output = accumulator
                .output()
                .ok_or_else(|| ProjectError::internal("Filter", "output vanished"))?;
            io::write_feature_collection(&accumulator.path, output)
                .map_err(|err| ProjectError::service("Filter", err))?;
        }
    }

    if let Some(lines_path) = &lines_path
        && let Some(output) = accumulator.output()
    {
        tracing::info!("Drawing projection lines ...");
        let lines = projection_lines(output);
        summary.lines_written = lines.len();
        io::write_feature_collection(lines_path, &lines)
            .map_err(|err| ProjectError::service("Lines", err))?;
    }

    summary.output_rows = accumulator.output().map(|o| o.len()).unwrap_or(0);
    tracing::info!("All done!");
    Ok(summary)
}
