//! End-to-end alignment and query scenarios.

use std::sync::Arc;

use spatialdata::align::{
    query, resolve_transformation, transform_element, AlignMode, BoundingBox, MissingPathPolicy, QueryOptions,
};
use spatialdata::array::{ArrayBuffer, ChunkedArray, InMemoryArray, NdArray};
use spatialdata::error::{ErrorKind, SpatialDataError};
use spatialdata::model::{
    AnnotationTarget, Column, ColumnarTable, ElementKind, PointData, Points, Raster, Shape, ShapeData, Shapes,
    SpatialElement, Table,
};
use spatialdata::store::{read_spatialdata, write_spatialdata, MemoryStore, ReadOptions, SaveOptions};
use spatialdata::transform::{axis_names, Coords, Transformation};
use spatialdata::SpatialData;

fn image(shape: Vec<usize>) -> Raster {
    let n: usize = shape.iter().product();
    let array = NdArray::new(shape, ArrayBuffer::U16((0..n).map(|v| (v % 65_536) as u16).collect())).unwrap();
    Raster::image("pixels", &["y", "x"], InMemoryArray::new(array)).unwrap()
}

fn scaled_image_container() -> SpatialData {
    let mut raster = image(vec![200, 200]);
    raster
        .add_transformation("global", Transformation::scale(&["y", "x"], &[2.0, 2.0]).unwrap())
        .unwrap();
    let mut sd = SpatialData::new();
    sd.add_image("he", raster).unwrap();
    sd
}

fn raster_of<'a>(sd: &'a SpatialData, name: &str) -> &'a Raster {
    sd.get(name).and_then(SpatialElement::as_raster).expect("raster element")
}

fn labels_with_table() -> SpatialData {
    let mut values = vec![0u16; 100];
    values[11] = 3; // (1, 1)
    values[22] = 7; // (2, 2)
    values[88] = 5; // (8, 8)
    let array = NdArray::new(vec![10, 10], ArrayBuffer::U16(values)).unwrap();
    let mut labels = Raster::labels("pixels", &["y", "x"], InMemoryArray::new(array)).unwrap();
    labels.add_transformation("global", Transformation::Identity).unwrap();

    let table = ColumnarTable::new()
        .with_column("region", Column::categorical(&["nuclei"; 4]))
        .unwrap()
        .with_column("label_id", Column::Int(vec![3, 7, 5, 3]))
        .unwrap()
        .with_column("area", Column::Float(vec![1.0, 2.0, 3.0, 4.0]))
        .unwrap();

    let mut sd = SpatialData::new();
    sd.add_labels("nuclei", labels).unwrap();
    sd.add_table(
        "obs",
        Table::annotating(table, AnnotationTarget::new(&["nuclei"], "region", "label_id")),
    )
    .unwrap();
    sd
}

#[test]
fn scaled_image_query_crops_pixel_space() {
    let sd = scaled_image_container();
    let bbox = BoundingBox::xy(0.0, 0.0, 100.0, 100.0).unwrap();
    let result = query(&sd, "global", &bbox, &QueryOptions::default()).unwrap();

    let raster = raster_of(&result.data, "he");
    assert_eq!(raster.shape(), &[50, 50]);
    assert_eq!(raster.native_coordinate_system(), "pixels");

    let original = raster_of(&sd, "he").levels()[0].data().read_region(&spatialdata::array::Region::new(vec![0..50, 0..50]));
    assert_eq!(raster.levels()[0].data().read_all().unwrap(), original.unwrap());

    let t = raster.transformations().get("global").unwrap();
    let corner = t.apply_point(&axis_names(&["y", "x"]), &[50.0, 50.0]).unwrap();
    assert_eq!(corner.as_slice(), &[100.0, 100.0]);
}

#[test]
fn label_query_filters_annotation_rows() {
    let sd = labels_with_table();
    let bbox = BoundingBox::xy(0.0, 0.0, 5.0, 5.0).unwrap();
    let result = query(&sd, "global", &bbox, &QueryOptions::default()).unwrap();

    let table = result.data.get("obs").and_then(SpatialElement::as_table).unwrap();
    let data = table.data().unwrap();
    assert_eq!(data.n_rows(), 3);
    let Some(Column::Int(ids)) = data.column("label_id") else {
        panic!("label_id column");
    };
    assert_eq!(ids, &vec![3, 7, 3]);
    let Some(Column::Float(area)) = data.column("area") else {
        panic!("area column");
    };
    assert_eq!(area, &vec![1.0, 2.0, 4.0]);
}

#[test]
fn unreachable_system_names_both_ends() {
    let sd = scaled_image_container();
    let err = resolve_transformation(&sd, None, "he", "nowhere").unwrap_err();
    match &err {
        SpatialDataError::NoTransformationPath {
            source_system,
            target_system,
        } => {
            assert_eq!(source_system, "pixels");
            assert_eq!(target_system, "nowhere");
        }
        other => panic!("unexpected error {:?}", other),
    }
    let message = err.to_string();
    assert!(message.contains("pixels") && message.contains("nowhere"));
}

#[test]
fn duplicate_name_leaves_container_untouched() {
    let mut sd = SpatialData::new();
    let first = Shapes::new("global", ShapeData::new(vec![Shape::circle(0.0, 0.0, 1.0)])).unwrap();
    sd.add("cells", first).unwrap();

    let second = Shapes::new("global", ShapeData::new(vec![Shape::circle(9.0, 9.0, 1.0), Shape::circle(1.0, 1.0, 1.0)])).unwrap();
    let err = sd.add("cells", second).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateName);
    assert_eq!(sd.len(), 1);

    let SpatialElement::Shapes(kept) = sd.get("cells").unwrap() else {
        panic!("shapes element");
    };
    assert_eq!(kept.data().unwrap().len(), 1);
}

#[test]
fn query_is_idempotent() {
    let mut sd = scaled_image_container();
    let points = PointData::new((0..50).map(|i| Coords::from_slice(&[i as f64 * 4.0, i as f64 * 2.0])).collect());
    sd.add("spots", Points::new("global", &["x", "y"], points).unwrap()).unwrap();
    let shapes = ShapeData::new(vec![
        Shape::circle(20.0, 20.0, 5.0),
        Shape::circle(300.0, 300.0, 5.0),
        Shape::circle(59.0, 30.0, 2.0),
    ]);
    sd.add("cells", Shapes::new("global", shapes).unwrap()).unwrap();

    let bbox = BoundingBox::xy(10.0, 10.0, 60.0, 70.0).unwrap();
    let opts = QueryOptions::default();
    let once = query(&sd, "global", &bbox, &opts).unwrap().data;
    let twice = query(&once, "global", &bbox, &opts).unwrap().data;

    let first = raster_of(&once, "he");
    let second = raster_of(&twice, "he");
    assert_eq!(first.shape(), &[30, 25]);
    assert_eq!(first.shape(), second.shape());
    assert_eq!(
        first.levels()[0].data().read_all().unwrap(),
        second.levels()[0].data().read_all().unwrap()
    );
    let axes = axis_names(&["y", "x"]);
    let t1 = first.transformations().get("global").unwrap();
    let t2 = second.transformations().get("global").unwrap();
    assert!(t1.approx_eq_on(t2, &axes, 1e-9).unwrap());

    let count = |sd: &SpatialData, name: &str| match sd.get(name).unwrap() {
        SpatialElement::Points(p) => p.data().unwrap().len(),
        SpatialElement::Shapes(s) => s.data().unwrap().len(),
        _ => unreachable!(),
    };
    assert_eq!(count(&once, "spots"), count(&twice, "spots"));
    assert_eq!(count(&once, "cells"), 2);
    assert_eq!(count(&twice, "cells"), 2);
}

#[test]
fn degenerate_box_keeps_table_schema() {
    let sd = labels_with_table();
    let bbox = BoundingBox::xy(2.0, 0.0, 2.0, 5.0).unwrap();
    let result = query(&sd, "global", &bbox, &QueryOptions::default()).unwrap();

    assert_eq!(result.data.count(ElementKind::Labels), 0);
    let table = result.data.get("obs").and_then(SpatialElement::as_table).unwrap();
    let data = table.data().unwrap();
    assert_eq!(data.n_rows(), 0);
    assert_eq!(data.column_names(), vec!["region", "label_id", "area"]);
}

#[test]
fn missing_paths_follow_policy() {
    let mut sd = scaled_image_container();
    let stray = Points::new("other", &["x", "y"], PointData::new(vec![Coords::from_slice(&[1.0, 1.0])])).unwrap();
    sd.add("stray", stray).unwrap();
    let bbox = BoundingBox::xy(0.0, 0.0, 10.0, 10.0).unwrap();

    let result = query(&sd, "global", &bbox, &QueryOptions::default()).unwrap();
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].name, "stray");
    assert!(result.data.get("he").is_some());

    let strict = QueryOptions {
        missing_path: MissingPathPolicy::Fail,
        ..Default::default()
    };
    let err = query(&sd, "global", &bbox, &strict).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoTransformationPath);
}

#[test]
fn transitive_path_resolves_through_graph() {
    let mut raster = image(vec![4, 4]);
    raster
        .add_transformation("aligned", Transformation::translation(&["x"], &[10.0]).unwrap())
        .unwrap();
    let mut sd = SpatialData::new();
    sd.add_image("he", raster).unwrap();
    let mut anchor = Points::new("global", &["x", "y"], PointData::new(vec![])).unwrap();
    anchor
        .add_transformation("aligned", Transformation::scale(&["x", "y"], &[2.0, 2.0]).unwrap())
        .unwrap();
    sd.add("anchor", anchor).unwrap();

    let t = resolve_transformation(&sd, Some(ElementKind::Image), "he", "global").unwrap();
    let p = t.apply_point(&axis_names(&["y", "x"]), &[4.0, 2.0]).unwrap();
    assert_eq!(p.as_slice(), &[2.0, 6.0]);

    let lazy = transform_element(&sd, None, "he", "global", AlignMode::Lazy).unwrap();
    assert_eq!(lazy.transformations().unwrap().targets(), vec!["global"]);
}

#[test]
fn stored_raster_query_reads_only_intersecting_chunks() {
    let array = NdArray::new(vec![64, 64], ArrayBuffer::U8(vec![1; 4096])).unwrap();
    let chunked = InMemoryArray::with_chunks(array, vec![16, 16]).unwrap();
    let mut raster = Raster::image("pixels", &["y", "x"], chunked).unwrap();
    raster.add_transformation("global", Transformation::Identity).unwrap();
    let mut sd = SpatialData::new();
    sd.add_image("he", raster).unwrap();

    let store = Arc::new(MemoryStore::new());
    write_spatialdata(store.as_ref(), &sd, &SaveOptions::default()).unwrap();
    let loaded = read_spatialdata(store.clone(), &ReadOptions::default()).unwrap();
    store.reset_reads();

    let bbox = BoundingBox::xy(20.0, 20.0, 40.0, 30.0).unwrap();
    let result = query(&loaded, "global", &bbox, &QueryOptions::default()).unwrap();
    assert_eq!(raster_of(&result.data, "he").shape(), &[10, 20]);
    // rows 20..30 sit in chunk row 1, columns 20..40 in chunk columns 1 and 2
    assert_eq!(store.reads(), 2);
}
