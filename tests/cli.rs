use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

use spatialdata::array::{ArrayBuffer, InMemoryArray, NdArray};
use spatialdata::model::{AnnotationTarget, Column, ColumnarTable, PointData, Points, Raster, Table};
use spatialdata::store::{read_from_directory, write_to_directory, ReadOptions, SaveOptions};
use spatialdata::transform::{Coords, Transformation};
use spatialdata::SpatialData;

fn write_valid_store(root: &Path) {
    let array = NdArray::new(vec![20, 20], ArrayBuffer::U8(vec![7; 400])).unwrap();
    let mut image = Raster::image("pixels", &["y", "x"], InMemoryArray::new(array)).unwrap();
    image
        .add_transformation("global", Transformation::scale(&["y", "x"], &[2.0, 2.0]).unwrap())
        .unwrap();

    let coords = vec![Coords::from_slice(&[1.0, 1.0]), Coords::from_slice(&[30.0, 30.0])];
    let points = Points::new("global", &["x", "y"], PointData::new(coords)).unwrap();

    let mut sd = SpatialData::new();
    sd.add_image("he", image).unwrap();
    sd.add("spots", points).unwrap();
    write_to_directory(root, &sd, &SaveOptions::default()).unwrap();
}

fn write_invalid_store(root: &Path) {
    let table = ColumnarTable::new()
        .with_column("region", Column::categorical(&["ghost"]))
        .unwrap()
        .with_column("id", Column::Int(vec![1]))
        .unwrap();
    let mut sd = SpatialData::new();
    sd.add_table("obs", Table::annotating(table, AnnotationTarget::new(&["ghost"], "region", "id")))
        .unwrap();
    write_to_directory(root, &sd, &SaveOptions::default()).unwrap();
}

#[test]
fn runs() {
    let mut cmd = Command::cargo_bin("spatialdata").unwrap();
    cmd.assert().success();
}

#[test]
fn outputs_tool_name() {
    let mut cmd = Command::cargo_bin("spatialdata").unwrap();
    cmd.arg("-V");
    cmd.assert().success().stdout("spatialdata 0.1.0\n");
}

// Validate subcommand tests

#[test]
fn validate_valid_store_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    write_valid_store(dir.path());
    let mut cmd = Command::cargo_bin("spatialdata").unwrap();
    cmd.arg("validate").arg(dir.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Validation passed"));
}

#[test]
fn validate_invalid_store_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_invalid_store(dir.path());
    let mut cmd = Command::cargo_bin("spatialdata").unwrap();
    cmd.arg("validate").arg(dir.path());
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("error(s)"))
        .stdout(predicate::str::contains("MissingAnnotationTarget"));
}

#[test]
fn validate_json_output_format() {
    let dir = tempfile::tempdir().unwrap();
    write_valid_store(dir.path());
    let mut cmd = Command::cargo_bin("spatialdata").unwrap();
    cmd.arg("validate").arg(dir.path()).args(["--output", "json"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"error_count\": 0"))
        .stdout(predicate::str::contains("\"warning_count\": 0"));
}

#[test]
fn validate_nonexistent_store_fails() {
    let mut cmd = Command::cargo_bin("spatialdata").unwrap();
    cmd.args(["validate", "nonexistent_store.sdata"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn validate_rejects_unknown_output_format() {
    let dir = tempfile::tempdir().unwrap();
    write_valid_store(dir.path());
    let mut cmd = Command::cargo_bin("spatialdata").unwrap();
    cmd.arg("validate").arg(dir.path()).args(["--output", "yaml"]);
    cmd.assert().failure();
}

// Inspect subcommand tests

#[test]
fn inspect_prints_report() {
    let dir = tempfile::tempdir().unwrap();
    write_valid_store(dir.path());
    let mut cmd = Command::cargo_bin("spatialdata").unwrap();
    cmd.arg("inspect").arg(dir.path()).arg("--transformations");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("SpatialData Inspection Report"))
        .stdout(predicate::str::contains("spots"))
        .stdout(predicate::str::contains("global"));
}

#[test]
fn inspect_json_output() {
    let dir = tempfile::tempdir().unwrap();
    write_valid_store(dir.path());
    let mut cmd = Command::cargo_bin("spatialdata").unwrap();
    cmd.arg("inspect").arg(dir.path()).args(["--output", "json"]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value["elements"].as_array().unwrap().len(), 2);
    assert_eq!(value["elements"][0]["name"], "he");
}

#[test]
fn inspect_rejects_invalid_store() {
    let dir = tempfile::tempdir().unwrap();
    write_invalid_store(dir.path());
    let mut cmd = Command::cargo_bin("spatialdata").unwrap();
    cmd.arg("inspect").arg(dir.path());
    cmd.assert().failure().stderr(predicate::str::contains("Validation"));
}

// Query subcommand tests

#[test]
fn query_writes_result_store() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let out = dir.path().join("out");
    write_valid_store(&input);

    let mut cmd = Command::cargo_bin("spatialdata").unwrap();
    cmd.arg("query")
        .arg(&input)
        .args(["--system", "global", "--bbox", "0,0,10,10", "--out"])
        .arg(&out);
    cmd.assert().success().stdout(predicate::str::contains("he"));

    let result = read_from_directory(&out, &ReadOptions::default()).unwrap();
    let raster = result.get("he").unwrap().as_raster().unwrap();
    assert_eq!(raster.shape(), &[5, 5]);
    assert_eq!(result.len(), 2);
}

#[test]
fn query_reports_skipped_elements() {
    let dir = tempfile::tempdir().unwrap();
    write_valid_store(dir.path());
    let mut cmd = Command::cargo_bin("spatialdata").unwrap();
    cmd.arg("query")
        .arg(dir.path())
        .args(["--system", "pixels", "--bbox", "0,0,5,5", "--output", "json"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"skipped\""));
}

#[test]
fn query_fail_on_missing_path() {
    let dir = tempfile::tempdir().unwrap();
    write_valid_store(dir.path());
    let mut cmd = Command::cargo_bin("spatialdata").unwrap();
    cmd.arg("query")
        .arg(dir.path())
        .args(["--system", "elsewhere", "--bbox", "0,0,5,5", "--fail-on-missing"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("elsewhere"));
}

#[test]
fn query_rejects_bbox_of_wrong_length() {
    let dir = tempfile::tempdir().unwrap();
    write_valid_store(dir.path());
    let mut cmd = Command::cargo_bin("spatialdata").unwrap();
    cmd.arg("query")
        .arg(dir.path())
        .args(["--system", "global", "--bbox", "0,0,5"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--bbox needs 4 values"));
}

#[test]
fn query_accepts_negative_bounds() {
    let dir = tempfile::tempdir().unwrap();
    write_valid_store(dir.path());
    let mut cmd = Command::cargo_bin("spatialdata").unwrap();
    cmd.arg("query")
        .arg(dir.path())
        .args(["--system", "global", "--bbox", "-10,-10,4,4"]);
    cmd.assert().success();
}
