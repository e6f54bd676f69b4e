//! Alignment and query engine.
//!
//! Resolves, for any element, the transformation from its native frame into
//! a requested coordinate system and uses it to transform, crop or filter
//! elements. Resolution is pure: it reads the container and never mutates
//! it, so concurrent readers of one container are safe.

mod bbox;
pub mod graph;
mod query;
mod resample;

pub use bbox::BoundingBox;
pub use graph::{Edge, TransformGraph};
use graph::{compose_path, describe_path};
pub use query::{query, LevelSelection, MissingPathPolicy, QueryOptions, QueryResult, SkippedElement};
pub use resample::{resample_raster, unpad_raster};

use std::collections::BTreeSet;
use tracing::debug;

use crate::container::{restrict_table_regions, SpatialData};
use crate::error::{Result, SpatialDataError};
use crate::model::{
    ElementKind, PointData, Points, ShapeData, Shapes, SpatialElement, TransformationMap,
};
use crate::transform::{axis_names, spatial_axes, AffineMatrix, Coords, Transformation};

/// How a transformation is applied to element data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlignMode {
    /// Keep native data and attach the resolved transformation.
    #[default]
    Lazy,
    /// Rewrite the data into the target frame.
    Resample,
}

/// Resolves the transformation from element `name` to `target`.
///
/// A direct entry wins; otherwise the shortest path through the
/// container's coordinate system graph is composed.
///
/// # Errors
/// `ElementNotFound`, `NotSpatial` for tables, `NoTransformationPath`
/// naming the element's native system and `target`.
pub fn resolve_transformation(
    sd: &SpatialData,
    kind: Option<ElementKind>,
    name: &str,
    target: &str,
) -> Result<Transformation> {
    let graph = TransformGraph::build(sd);
    resolve_with(&graph, sd.element(kind, name)?, name, target)
}

fn resolve_with(graph: &TransformGraph, element: &SpatialElement, name: &str, target: &str) -> Result<Transformation> {
    let (Some(native), Some(map)) = (element.native_coordinate_system(), element.transformations()) else {
        return Err(SpatialDataError::NotSpatial {
            name: name.to_string(),
        });
    };
    if let Some(direct) = map.get(target) {
        return Ok(direct.clone());
    }
    let t = graph.path_transformation(native, target)?;
    debug!(element = name, source = native, target, transformation = %t, "resolved by path search");
    Ok(t)
}

/// Transformation between two coordinate systems, optionally forced
/// through `via`.
///
/// Unlike element resolution, which takes the shortest path, this
/// considers every path that visits no system twice. A single one-edge
/// path wins outright; otherwise the candidates (those through `via`,
/// when given) must all compose to the same transformation.
///
/// # Errors
/// `NoTransformationPath` if no candidate exists,
/// `AmbiguousTransformationPath` listing the candidates if they disagree.
pub fn transformation_between(
    sd: &SpatialData,
    source: &str,
    target: &str,
    via: Option<&str>,
) -> Result<Transformation> {
    if source == target {
        return Ok(Transformation::Identity);
    }
    let graph = TransformGraph::build(sd);
    let mut paths = graph.simple_paths(source, target);
    let no_path = || SpatialDataError::NoTransformationPath {
        source_system: source.to_string(),
        target_system: target.to_string(),
    };
    match via {
        None => {
            let direct: Vec<&Vec<&Edge>> = paths.iter().filter(|p| p.len() == 1).collect();
            if let [only] = direct.as_slice() {
                return compose_path(only);
            }
        }
        Some(mid) => paths.retain(|p| p.iter().any(|e| e.target == mid)),
    }

    let mut candidates = paths.iter().map(|p| compose_path(p));
    let first = candidates.next().ok_or_else(no_path)??;
    for other in candidates {
        if other? != first {
            return Err(SpatialDataError::AmbiguousTransformationPath {
                source_system: source.to_string(),
                target_system: target.to_string(),
                paths: paths.iter().map(|p| describe_path(p)).collect(),
            });
        }
    }
    debug!(source, target, candidates = paths.len(), "resolved system-to-system transformation");
    Ok(first)
}

/// Expresses one element in `target`.
///
/// In [`AlignMode::Lazy`] the element keeps its data and carries only the
/// resolved transformation to `target`. In [`AlignMode::Resample`] vector
/// coordinates are transformed and rasters resampled, and the result is
/// native to `target` (rasters to `"<target>_pixels"`, placed by a
/// translation).
pub fn transform_element(
    sd: &SpatialData,
    kind: Option<ElementKind>,
    name: &str,
    target: &str,
    mode: AlignMode,
) -> Result<SpatialElement> {
    let graph = TransformGraph::build(sd);
    transform_with(&graph, sd.element(kind, name)?, name, target, mode)
}

fn transform_with(
    graph: &TransformGraph,
    element: &SpatialElement,
    name: &str,
    target: &str,
    mode: AlignMode,
) -> Result<SpatialElement> {
    let t = resolve_with(graph, element, name, target)?;
    match mode {
        AlignMode::Lazy => {
            let mut out = element.clone();
            out.remove_all_transformations();
            out.add_transformation(name, target, t)?;
            Ok(out)
        }
        AlignMode::Resample => match element {
            SpatialElement::Points(p) => Ok(transform_points(p, &t, target)?.into()),
            SpatialElement::Shapes(s) => Ok(transform_shapes(s, &t, target)?.into()),
            SpatialElement::Image(r) | SpatialElement::Labels(r) => {
                Ok(SpatialElement::raster(resample_raster(r, &t, target)?))
            }
            SpatialElement::Table(_) => Err(SpatialDataError::NotSpatial {
                name: name.to_string(),
            }),
        },
    }
}

/// Transforms every element with a path into `target`.
///
/// Elements without a path are left out, like
/// [`SpatialData::filter_by_coordinate_system`]; annotation tables follow
/// their retained regions.
pub fn transform_to_coordinate_system(sd: &SpatialData, target: &str, mode: AlignMode) -> Result<SpatialData> {
    let graph = TransformGraph::build(sd);
    let mut out = SpatialData::with_name_policy(sd.name_policy());
    for (kind, name, element) in sd.elements() {
        if !kind.is_spatial() {
            continue;
        }
        match transform_with(&graph, element, name, target, mode) {
            Ok(el) => out.add(name, el)?,
            Err(SpatialDataError::NoTransformationPath { .. }) => {
                debug!(element = name, target, "no path, left out");
            }
            Err(e) => return Err(e),
        }
    }
    let retained: BTreeSet<String> = out
        .elements()
        .filter(|(k, _, _)| k.is_annotatable())
        .map(|(_, n, _)| n.to_string())
        .collect();
    for (_, name, element) in sd.elements() {
        if let SpatialElement::Table(table) = element {
            if let Some(kept) = restrict_table_regions(table, &retained)? {
                out.add(name, kept)?;
            }
        }
    }
    Ok(out)
}

fn transform_points(points: &Points, t: &Transformation, target: &str) -> Result<Points> {
    let data = points.data()?;
    let (out_axes, coords) = t.apply(points.axes(), &data.coords)?;
    let keep = spatial_axes(&out_axes);
    let idx: Vec<usize> = keep
        .iter()
        .filter_map(|a| out_axes.iter().position(|o| o == a))
        .collect();
    let coords: Vec<Coords> = coords
        .into_iter()
        .map(|c| idx.iter().map(|&i| c[i]).collect::<Coords>())
        .collect();
    let moved = PointData {
        coords,
        instance_ids: data.instance_ids.clone(),
        attributes: data.attributes.clone(),
    };
    Ok(Points::reframed(target, keep, TransformationMap::new(), moved))
}

/// The planar matrix of a transformation applied to shapes.
fn xy_matrix(t: &Transformation) -> Result<AffineMatrix> {
    let xy = axis_names(&["x", "y"]);
    let produced = t.infer_output_axes(&xy)?;
    if !xy.iter().all(|a| produced.contains(a)) {
        return Err(SpatialDataError::axis_mismatch("shapes transformation output", &xy, &produced));
    }
    t.to_affine_matrix(&xy, &xy)
}

fn transform_shapes(shapes: &Shapes, t: &Transformation, target: &str) -> Result<Shapes> {
    let m = xy_matrix(t)?;
    let data = shapes.data()?;
    let moved = ShapeData {
        geometries: data.geometries.iter().map(|g| g.transformed(&m)).collect(),
        instance_ids: data.instance_ids.clone(),
        attributes: data.attributes.clone(),
    };
    Ok(Shapes::reframed(target, TransformationMap::new(), moved))
}
