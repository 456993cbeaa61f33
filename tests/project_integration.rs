use std::process::Command;

fn output_features(path: &std::path::Path) -> Vec<serde_json::Value> {
    let content = std::fs::read_to_string(path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(parsed["type"], "FeatureCollection");
    parsed["features"].as_array().unwrap().clone()
}

fn rm_value(feature: &serde_json::Value) -> f64 {
    feature["properties"]["RM_final"].as_f64().unwrap()
}

#[test]
fn projects_points_without_zones() {
    let output_file = tempfile::NamedTempFile::with_suffix(".geojson").unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_rivermile"))
        .arg("project")
        .arg("--points")
        .arg("fixture/points.geojson")
        .arg("--reference")
        .arg("fixture/miles.geojson")
        .arg("--distance-field")
        .arg("RM_final")
        .arg("--output")
        .arg(output_file.path())
        .arg("--dem")
        .arg("fixture/dem.asc")
        .arg("--verbose")
        .status()
        .expect("failed to execute process");
    assert!(status.success());

    let features = output_features(output_file.path());
    assert_eq!(features.len(), 2);

    for feature in &features {
        let props = &feature["properties"];
        assert_eq!(props["ELEVATION"].as_f64().unwrap(), 100.0);
        assert!(props["NEAR_DIST"].as_f64().unwrap() > 0.0);
        assert!(props["NEAR_X"].is_number());
        assert!(props["NEAR_ANGLE"].is_number());
    }

    // S1 at (0.5, 0.5) is nearest mile 10; S2 at (3.5, 3.5) nearest mile 20.
    let mut miles: Vec<f64> = features.iter().map(rm_value).collect();
    miles.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(miles, vec![10.0, 20.0]);
}

#[test]
fn zoned_run_produces_same_mile_values() {
    let output_file = tempfile::NamedTempFile::with_suffix(".geojson").unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_rivermile"))
        .arg("project")
        .arg("--points")
        .arg("fixture/points.geojson")
        .arg("--reference")
        .arg("fixture/miles.geojson")
        .arg("--distance-field")
        .arg("RM_final")
        .arg("--zones")
        .arg("fixture/zones.geojson")
        .arg("--zone-field")
        .arg("Name")
        .arg("--output")
        .arg(output_file.path())
        .arg("--dem")
        .arg("fixture/dem.asc")
        .arg("--verbose")
        .status()
        .expect("failed to execute process");
    assert!(status.success());

    let features = output_features(output_file.path());
    assert_eq!(features.len(), 2);
    let mut miles: Vec<f64> = features.iter().map(rm_value).collect();
    miles.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(miles, vec![10.0, 20.0]);
}

#[test]
fn writes_projection_lines_when_requested() {
    let output_file = tempfile::NamedTempFile::with_suffix(".geojson").unwrap();
    let lines_file = tempfile::NamedTempFile::with_suffix(".geojson").unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_rivermile"))
        .arg("project")
        .arg("--points")
        .arg("fixture/points.geojson")
        .arg("--reference")
        .arg("fixture/miles.geojson")
        .arg("--distance-field")
        .arg("RM_final")
        .arg("--output")
        .arg(output_file.path())
        .arg("--dem")
        .arg("fixture/dem.asc")
        .arg("--lines")
        .arg(lines_file.path())
        .status()
        .expect("failed to execute process");
    assert!(status.success());

    let lines = output_features(lines_file.path());
    assert_eq!(lines.len(), 2);
    for line in &lines {
        assert_eq!(line["geometry"]["type"], "LineString");
    }
}

#[test]
fn missing_zone_field_is_a_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_rivermile"))
        .arg("project")
        .arg("--points")
        .arg("fixture/points.geojson")
        .arg("--reference")
        .arg("fixture/miles.geojson")
        .arg("--distance-field")
        .arg("RM_final")
        .arg("--zones")
        .arg("fixture/zones.geojson")
        .arg("--output")
        .arg("unused.geojson")
        .arg("--dem")
        .arg("fixture/dem.asc")
        .output()
        .expect("failed to execute process");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("zone-field"));
}
