//! Bounding-box queries.
//!
//! Vector elements keep the geometries whose transformed extent meets the
//! box. Rasters are cropped to the inverse image of the box, reading only
//! the chunks that region touches. Annotation tables keep the rows whose
//! instances survived.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

use super::resample::{is_spatial, origin_translation};
use super::{resolve_with, xy_matrix, BoundingBox, TransformGraph};
use crate::array::{InMemoryArray, Region};
use crate::container::SpatialData;
use crate::error::{Result, SpatialDataError};
use crate::model::{
    ElementKind, Points, Raster, RasterKind, RasterLevel, Shapes, SpatialElement, Table,
    TransformationMap,
};
use crate::transform::{axis_names, compose, invert, Coords, Transformation};

/// What to do with elements that have no path into the query system.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MissingPathPolicy {
    /// Leave the element out, log a warning and record it in
    /// [`QueryResult::skipped`].
    #[default]
    Skip,
    /// Fail the whole query with `NoTransformationPath`.
    Fail,
}

/// Which pyramid level a multiscale raster is cropped from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LevelSelection {
    /// Always the finest level.
    Finest,
    /// The coarsest level whose crop still has at least this many spatial
    /// pixels, else the finest.
    MinPixels(usize),
}

impl Default for LevelSelection {
    fn default() -> Self {
        LevelSelection::MinPixels(65_536)
    }
}

#[derive(Clone, Debug)]
pub struct QueryOptions {
    pub missing_path: MissingPathPolicy,
    pub level_selection: LevelSelection,
    /// Pixel bounds closer than this to an integer snap to it.
    pub tolerance: f64,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            missing_path: MissingPathPolicy::default(),
            level_selection: LevelSelection::default(),
            tolerance: 1e-6,
        }
    }
}

/// An element left out of a query because it could not be placed in the
/// query system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedElement {
    pub kind: ElementKind,
    pub name: String,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct QueryResult {
    pub data: SpatialData,
    pub skipped: Vec<SkippedElement>,
}

/// Selects the parts of `sd` inside `bbox`, expressed in `target`.
///
/// Elements keep their native frame; each carries a transformation to
/// `target` (the resolved one if it had none). Elements with nothing inside
/// the box are left out, and a degenerate box leaves out every spatial
/// element. Annotation tables keep their schema even when all rows go.
/// Unannotated tables pass through.
///
/// # Errors
/// `NoTransformationPath` under [`MissingPathPolicy::Fail`]; otherwise only
/// errors from reading element data or from non-invertible raster
/// transformations.
pub fn query(sd: &SpatialData, target: &str, bbox: &BoundingBox, opts: &QueryOptions) -> Result<QueryResult> {
    let graph = TransformGraph::build(sd);
    let mut out = SpatialData::with_name_policy(sd.name_policy());
    for cs in sd.declared_coordinate_systems() {
        out.declare_coordinate_system(cs.clone())?;
    }
    let mut skipped = Vec::new();
    let mut retained: BTreeMap<(ElementKind, String), BTreeSet<i64>> = BTreeMap::new();

    if bbox.is_degenerate() {
        debug!(?bbox, "degenerate bounding box, selecting nothing");
    }

    for (kind, name, element) in sd.elements() {
        if !kind.is_spatial() || bbox.is_degenerate() {
            continue;
        }
        let t = match resolve_with(&graph, element, name, target) {
            Ok(t) => t,
            Err(e @ SpatialDataError::NoTransformationPath { .. }) => {
                if opts.missing_path == MissingPathPolicy::Fail {
                    return Err(e);
                }
                warn!(kind = %kind, element = name, target, "no transformation path, skipping element");
                skipped.push(SkippedElement {
                    kind,
                    name: name.to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
            Err(e) => return Err(e),
        };

        let selected: Option<(SpatialElement, BTreeSet<i64>)> = match element {
            SpatialElement::Points(p) => query_points(p, &t, target, bbox)?.map(|(p, ids)| (p.into(), ids)),
            SpatialElement::Shapes(s) => query_shapes(s, &t, target, bbox)?.map(|(s, ids)| (s.into(), ids)),
            SpatialElement::Image(r) | SpatialElement::Labels(r) => {
                query_raster(r, &t, target, bbox, opts)?.map(|(r, ids)| (SpatialElement::raster(r), ids))
            }
            SpatialElement::Table(_) => None,
        };
        match selected {
            Some((el, ids)) => {
                debug!(kind = %kind, element = name, instances = ids.len(), "selected");
                retained.insert((kind, name.to_string()), ids);
                out.add(name, el)?;
            }
            None => debug!(kind = %kind, element = name, "nothing inside the box"),
        }
    }

    for (_, name, element) in sd.elements() {
        if let SpatialElement::Table(table) = element {
            out.add(name, filter_table(sd, table, &retained)?)?;
        }
    }
    Ok(QueryResult { data: out, skipped })
}

fn query_points(
    points: &Points,
    t: &Transformation,
    target: &str,
    bbox: &BoundingBox,
) -> Result<Option<(Points, BTreeSet<i64>)>> {
    let data = points.data()?;
    let (out_axes, moved) = t.apply(points.axes(), &data.coords)?;
    let rows: Vec<usize> = moved
        .iter()
        .enumerate()
        .filter(|(_, c)| bbox.contains(&out_axes, c.as_slice()))
        .map(|(i, _)| i)
        .collect();
    if rows.is_empty() {
        return Ok(None);
    }
    let kept = data.take(&rows);
    let ids = kept.instance_ids.iter().map(|id| id.as_i64()).collect();
    let mut selected = points.with_data(kept);
    if !selected.transformations().contains(target) {
        selected.add_transformation(target, t.clone())?;
    }
    Ok(Some((selected, ids)))
}

fn query_shapes(
    shapes: &Shapes,
    t: &Transformation,
    target: &str,
    bbox: &BoundingBox,
) -> Result<Option<(Shapes, BTreeSet<i64>)>> {
    let m = xy_matrix(t)?;
    let xy = axis_names(&["x", "y"]);
    let rect = bbox.rect_xy();
    let data = shapes.data()?;
    let rows: Vec<usize> = data
        .geometries
        .iter()
        .enumerate()
        .filter(|(_, g)| {
            let moved = g.transformed(&m);
            match &rect {
                Some(r) => moved.intersects_rect(r),
                None => moved.bounding_rect().is_some_and(|b| {
                    bbox.overlaps(&xy, &[b.min().x, b.min().y], &[b.max().x, b.max().y])
                }),
            }
        })
        .map(|(i, _)| i)
        .collect();
    if rows.is_empty() {
        return Ok(None);
    }
    let kept = data.take(&rows);
    let ids = kept.instance_ids.iter().map(|id| id.as_i64()).collect();
    let mut selected = shapes.with_data(kept);
    if !selected.transformations().contains(target) {
        selected.add_transformation(target, t.clone())?;
    }
    Ok(Some((selected, ids)))
}

fn query_raster(
    raster: &Raster,
    t: &Transformation,
    target: &str,
    bbox: &BoundingBox,
    opts: &QueryOptions,
) -> Result<Option<(Raster, BTreeSet<i64>)>> {
    let level_transformation = |i: usize| -> Result<Transformation> {
        match raster.levels()[i].transformations().get(target) {
            Some(direct) => Ok(direct.clone()),
            None => compose(&raster.level_scale(i)?, t),
        }
    };

    let mut chosen = None;
    if let LevelSelection::MinPixels(min) = opts.level_selection {
        for i in (1..raster.levels().len()).rev() {
            let tk = level_transformation(i)?;
            let shape = raster.levels()[i].shape();
            if let Some(region) = native_region(raster.axes(), shape, &tk, bbox, opts.tolerance)? {
                if spatial_pixels(raster.axes(), &region) >= min {
                    chosen = Some((i, tk, region));
                    break;
                }
            }
        }
    }
    let (index, tk, region) = match chosen {
        Some(c) => c,
        None => {
            let tk = level_transformation(0)?;
            match native_region(raster.axes(), raster.shape(), &tk, bbox, opts.tolerance)? {
                Some(region) => (0, tk, region),
                None => return Ok(None),
            }
        }
    };

    let level = &raster.levels()[index];
    let cropped = level.data().read_region(&region)?;
    debug!(level = index, region = ?region.ranges, "cropped raster");
    let ids = match raster.kind() {
        RasterKind::Labels => cropped.unique_i64().into_iter().filter(|&v| v != 0).collect(),
        RasterKind::Image => BTreeSet::new(),
    };

    let axes = raster.axes();
    let spatial: Vec<usize> = (0..axes.len()).filter(|&d| is_spatial(&axes[d])).collect();
    let origin: Vec<f64> = region.ranges.iter().map(|r| r.start as f64).collect();
    let shift = origin_translation(axes, &spatial, &origin)?;
    let mut transformations = TransformationMap::new();
    for (system, tr) in level.transformations().iter() {
        transformations.insert(system, compose(&shift, tr)?);
    }
    if !transformations.contains(target) {
        transformations.insert(target, compose(&shift, &tk)?);
    }
    let level = RasterLevel::with_transformations(Arc::new(InMemoryArray::new(cropped)), transformations);
    Ok(Some((raster.with_levels(vec![level])?, ids)))
}

/// Pixel region of a level covered by `bbox`, or `None` if they do not
/// meet.
///
/// Target axes the box does not constrain take the level's full extent.
fn native_region(
    axes: &[String],
    shape: &[usize],
    t: &Transformation,
    bbox: &BoundingBox,
    tolerance: f64,
) -> Result<Option<Region>> {
    let inverse = invert(t)?;
    let spatial: Vec<usize> = (0..axes.len()).filter(|&d| is_spatial(&axes[d])).collect();

    let corners: Vec<Coords> = (0..1usize << spatial.len())
        .map(|mask| {
            (0..axes.len())
                .map(|d| match spatial.iter().position(|&s| s == d) {
                    Some(bit) if (mask >> bit) & 1 == 1 => shape[d] as f64,
                    _ => 0.0,
                })
                .collect()
        })
        .collect();
    let (out_axes, projected) = t.apply(axes, &corners)?;

    let mut lo = vec![f64::INFINITY; out_axes.len()];
    let mut hi = vec![f64::NEG_INFINITY; out_axes.len()];
    for p in &projected {
        for j in 0..out_axes.len() {
            lo[j] = lo[j].min(p[j]);
            hi[j] = hi[j].max(p[j]);
        }
    }
    let out_spatial: Vec<usize> = (0..out_axes.len()).filter(|&j| is_spatial(&out_axes[j])).collect();
    for &j in &out_spatial {
        if let Some((min, max)) = bbox.interval(&out_axes[j]) {
            lo[j] = lo[j].max(min);
            hi[j] = hi[j].min(max);
            if lo[j] > hi[j] {
                return Ok(None);
            }
        }
    }

    let box_corners: Vec<Coords> = (0..1usize << out_spatial.len())
        .map(|mask| {
            (0..out_axes.len())
                .map(|j| match out_spatial.iter().position(|&s| s == j) {
                    Some(bit) if (mask >> bit) & 1 == 1 => hi[j],
                    _ => lo[j],
                })
                .collect()
        })
        .collect();
    let (back_axes, native) = inverse.apply(&out_axes, &box_corners)?;

    let snap = |v: f64| if (v - v.round()).abs() < tolerance { v.round() } else { v };
    let mut ranges = Vec::with_capacity(axes.len());
    for (d, axis) in axes.iter().enumerate() {
        if !spatial.contains(&d) {
            ranges.push(0..shape[d]);
            continue;
        }
        let Some(k) = back_axes.iter().position(|a| a == axis) else {
            ranges.push(0..shape[d]);
            continue;
        };
        let min = native.iter().map(|p| p[k]).fold(f64::INFINITY, f64::min);
        let max = native.iter().map(|p| p[k]).fold(f64::NEG_INFINITY, f64::max);
        let start = snap(min).floor().max(0.0);
        let end = snap(max).ceil().min(shape[d] as f64);
        if start >= end {
            return Ok(None);
        }
        ranges.push(start as usize..end as usize);
    }
    Ok(Some(Region::new(ranges)))
}

fn spatial_pixels(axes: &[String], region: &Region) -> usize {
    axes.iter()
        .zip(&region.ranges)
        .filter(|(a, _)| is_spatial(a))
        .map(|(_, r)| r.len())
        .product()
}

/// Keeps the rows of an annotation table whose region survived and whose
/// instance was selected in it. Regions resolve against `sd` the way
/// validation resolves them.
fn filter_table(
    sd: &SpatialData,
    table: &Table,
    retained: &BTreeMap<(ElementKind, String), BTreeSet<i64>>,
) -> Result<Table> {
    let Some(target) = table.annotation() else {
        return Ok(table.clone());
    };
    let selected: BTreeMap<&str, &BTreeSet<i64>> = target
        .regions
        .iter()
        .filter_map(|region| {
            let (kind, _) = sd.annotation_target(region)?;
            retained
                .get(&(kind, region.clone()))
                .map(|ids| (region.as_str(), ids))
        })
        .collect();
    let data = table.data()?;
    let rows: BTreeSet<usize> = match (data.column(&target.region_key), data.column(&target.instance_key)) {
        (Some(regions), Some(instances)) => (0..data.n_rows())
            .filter(|&r| {
                let ids = regions
                    .get_str(r)
                    .filter(|region| target.annotates(region))
                    .and_then(|region| selected.get(region).copied());
                match (ids, instances.get_i64(r)) {
                    (Some(ids), Some(id)) => ids.contains(&id),
                    _ => false,
                }
            })
            .collect(),
        _ => BTreeSet::new(),
    };
    let mut annotation = target.clone();
    annotation.regions.retain(|r| selected.contains_key(r.as_str()));
    Ok(Table::annotating(data.filter_rows(&rows), annotation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{ArrayBuffer, ChunkedArray, DType, NdArray};
    use crate::model::{PointData, Shape, ShapeData};
    use smallvec::smallvec;

    fn image(shape: Vec<usize>) -> Raster {
        Raster::image("pixels", &["y", "x"], InMemoryArray::new(NdArray::zeros(shape, DType::U8))).unwrap()
    }

    #[test]
    fn test_raster_crop_through_scale() {
        let mut sd = SpatialData::new();
        let mut raster = image(vec![200, 200]);
        raster
            .add_transformation("global", Transformation::scale(&["y", "x"], &[2.0, 2.0]).unwrap())
            .unwrap();
        sd.add("img", raster).unwrap();

        let bbox = BoundingBox::xy(0.0, 0.0, 100.0, 100.0).unwrap();
        let result = query(&sd, "global", &bbox, &QueryOptions::default()).unwrap();
        let cropped = result.data.get("img").unwrap().as_raster().unwrap();
        assert_eq!(cropped.shape(), &[50, 50]);
    }

    #[test]
    fn test_crop_offset_is_folded_into_transformation() {
        let mut sd = SpatialData::new();
        let mut raster = image(vec![100, 100]);
        raster.add_transformation("global", Transformation::Identity).unwrap();
        sd.add("img", raster).unwrap();

        let bbox = BoundingBox::xy(10.0, 20.0, 30.0, 40.0).unwrap();
        let result = query(&sd, "global", &bbox, &QueryOptions::default()).unwrap();
        let cropped = result.data.get("img").unwrap().as_raster().unwrap();
        assert_eq!(cropped.shape(), &[20, 20]);
        let t = cropped.transformations().get("global").unwrap();
        let p = t.apply_point(cropped.axes(), &[0.0, 0.0]).unwrap();
        assert_eq!(p.as_slice(), &[20.0, 10.0]);
    }

    #[test]
    fn test_coarsest_sufficient_level_is_chosen() {
        let levels: Vec<Arc<dyn ChunkedArray>> = [64usize, 32, 16]
            .iter()
            .map(|&n| Arc::new(InMemoryArray::new(NdArray::zeros(vec![n, n], DType::U8))) as Arc<dyn ChunkedArray>)
            .collect();
        let mut raster = Raster::multiscale(RasterKind::Image, "pixels", &["y", "x"], levels).unwrap();
        raster.add_transformation("global", Transformation::Identity).unwrap();
        let mut sd = SpatialData::new();
        sd.add("img", raster).unwrap();
        let bbox = BoundingBox::xy(0.0, 0.0, 64.0, 64.0).unwrap();

        let opts = QueryOptions {
            level_selection: LevelSelection::MinPixels(1000),
            ..QueryOptions::default()
        };
        let result = query(&sd, "global", &bbox, &opts).unwrap();
        assert_eq!(result.data.get("img").unwrap().as_raster().unwrap().shape(), &[32, 32]);

        let opts = QueryOptions {
            level_selection: LevelSelection::MinPixels(1_000_000),
            ..QueryOptions::default()
        };
        let result = query(&sd, "global", &bbox, &opts).unwrap();
        assert_eq!(result.data.get("img").unwrap().as_raster().unwrap().shape(), &[64, 64]);
    }

    #[test]
    fn test_labels_crop_retains_present_ids() {
        let mut values = vec![0u32; 16];
        values[0] = 3;
        values[15] = 7;
        let labels = Raster::labels(
            "global",
            &["y", "x"],
            InMemoryArray::new(NdArray::new(vec![4, 4], ArrayBuffer::U32(values)).unwrap()),
        )
        .unwrap();
        let mut sd = SpatialData::new();
        sd.add("cells", labels).unwrap();
        let bbox = BoundingBox::xy(0.0, 0.0, 2.0, 2.0).unwrap();
        let result = query(&sd, "global", &bbox, &QueryOptions::default()).unwrap();
        let crop = result.data.get("cells").unwrap().as_raster().unwrap();
        let values = crop.levels()[0].data().read_all().unwrap();
        assert_eq!(values.unique_i64(), [0, 3].into_iter().collect());
    }

    #[test]
    fn test_table_rows_follow_the_annotatable_element_of_a_shared_name() {
        use crate::container::NamePolicy;
        use crate::model::{AnnotationTarget, Column, ColumnarTable};

        let mut values = vec![0u32; 16];
        values[0] = 3;
        values[15] = 7;
        let labels = Raster::labels(
            "global",
            &["y", "x"],
            InMemoryArray::new(NdArray::new(vec![4, 4], ArrayBuffer::U32(values)).unwrap()),
        )
        .unwrap();
        let shapes = Shapes::new(
            "global",
            ShapeData::new(vec![Shape::circle(1.0, 1.0, 0.5), Shape::circle(1.5, 1.5, 0.2)]),
        )
        .unwrap();
        let mut sd = SpatialData::with_name_policy(NamePolicy::AllowCrossKind);
        let pixels = InMemoryArray::new(NdArray::zeros(vec![4, 4], DType::U8));
        sd.add_image("cells", Raster::image("global", &["y", "x"], pixels).unwrap())
            .unwrap();
        sd.add_labels("cells", labels).unwrap();
        sd.add("cells", shapes).unwrap();
        let rows = ColumnarTable::new()
            .with_column("region", Column::categorical(&["cells", "cells", "cells"]))
            .unwrap()
            .with_column("instance_id", Column::Int(vec![3, 7, 0]))
            .unwrap();
        sd.add_table(
            "obs",
            Table::annotating(rows, AnnotationTarget::new(&["cells"], "region", "instance_id")),
        )
        .unwrap();

        let bbox = BoundingBox::xy(0.0, 0.0, 2.0, 2.0).unwrap();
        let result = query(&sd, "global", &bbox, &QueryOptions::default()).unwrap();
        assert_eq!(result.data.find("cells").len(), 3);
        let table = result.data.get_kind(ElementKind::Table, "obs").unwrap().as_table().unwrap();
        assert_eq!(table.data().unwrap().column("instance_id"), Some(&Column::Int(vec![3])));
        assert_eq!(table.annotation().unwrap().regions, vec!["cells".to_string()]);
    }

    #[test]
    fn test_shapes_filtered_on_transformed_extent() {
        let mut shapes = Shapes::new(
            "local",
            ShapeData::new(vec![Shape::circle(1.0, 1.0, 0.5), Shape::circle(10.0, 10.0, 0.5)]),
        )
        .unwrap();
        shapes
            .add_transformation("global", Transformation::translation(&["x"], &[100.0]).unwrap())
            .unwrap();
        let mut sd = SpatialData::new();
        sd.add("circles", shapes).unwrap();
        let bbox = BoundingBox::xy(100.0, 0.0, 102.0, 2.0).unwrap();
        let result = query(&sd, "global", &bbox, &QueryOptions::default()).unwrap();
        let SpatialElement::Shapes(kept) = result.data.get("circles").unwrap() else {
            panic!("expected shapes");
        };
        assert_eq!(kept.data().unwrap().len(), 1);
        assert_eq!(kept.native_coordinate_system(), "local");
    }

    #[test]
    fn test_missing_path_skips_or_fails() {
        let mut sd = SpatialData::new();
        let p = Points::new("elsewhere", &["x", "y"], PointData::new(vec![smallvec![1.0, 1.0]])).unwrap();
        sd.add("pts", p).unwrap();
        let bbox = BoundingBox::xy(0.0, 0.0, 2.0, 2.0).unwrap();

        let result = query(&sd, "global", &bbox, &QueryOptions::default()).unwrap();
        assert!(result.data.is_empty());
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].name, "pts");

        let strict = QueryOptions {
            missing_path: MissingPathPolicy::Fail,
            ..QueryOptions::default()
        };
        let err = query(&sd, "global", &bbox, &strict).unwrap_err();
        assert!(matches!(err, SpatialDataError::NoTransformationPath { .. }));
    }

    #[test]
    fn test_degenerate_box_selects_nothing() {
        let mut sd = SpatialData::new();
        let p = Points::new("global", &["x", "y"], PointData::new(vec![smallvec![1.0, 1.0]])).unwrap();
        sd.add("pts", p).unwrap();
        let bbox = BoundingBox::xy(1.0, 0.0, 1.0, 2.0).unwrap();
        let result = query(&sd, "global", &bbox, &QueryOptions::default()).unwrap();
        assert_eq!(result.data.count(ElementKind::Points), 0);
        assert!(result.skipped.is_empty());
    }
}
