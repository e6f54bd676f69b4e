//! Polygon and circle collections.

use geo::{AffineOps, AffineTransform, BoundingRect, Coord, Intersects, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ids::{sequential_ids, InstanceId};
use super::lazy::{Lazy, LoadState};
use super::points::check_vector_axes;
use super::table::ColumnarTable;
use super::TransformationMap;
use crate::error::{Result, SpatialDataError};
use crate::transform::{axis_names, AffineMatrix, Transformation};

/// One geometry of a [`Shapes`] element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    Circle { center: Coord<f64>, radius: f64 },
    Polygon { polygon: Polygon<f64> },
    MultiPolygon { polygons: MultiPolygon<f64> },
}

impl Shape {
    pub fn circle(x: f64, y: f64, radius: f64) -> Self {
        Shape::Circle {
            center: Coord { x, y },
            radius,
        }
    }

    pub fn polygon(polygon: Polygon<f64>) -> Self {
        Shape::Polygon { polygon }
    }

    /// Axis-aligned extent, or `None` for empty geometries.
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        match self {
            Shape::Circle { center, radius } => Some(Rect::new(
                Coord {
                    x: center.x - radius,
                    y: center.y - radius,
                },
                Coord {
                    x: center.x + radius,
                    y: center.y + radius,
                },
            )),
            Shape::Polygon { polygon } => polygon.bounding_rect(),
            Shape::MultiPolygon { polygons } => polygons.bounding_rect(),
        }
    }

    /// Returns true if the geometry touches `rect`.
    pub fn intersects_rect(&self, rect: &Rect<f64>) -> bool {
        match self {
            Shape::Circle { center, radius } => {
                let nx = center.x.clamp(rect.min().x, rect.max().x);
                let ny = center.y.clamp(rect.min().y, rect.max().y);
                let (dx, dy) = (center.x - nx, center.y - ny);
                dx * dx + dy * dy <= radius * radius
            }
            Shape::Polygon { polygon } => polygon.intersects(rect),
            Shape::MultiPolygon { polygons } => polygons.intersects(rect),
        }
    }

    /// Applies a 2D homogeneous matrix over `(x, y)`.
    ///
    /// Circle radii are scaled by the square root of the absolute
    /// determinant, which is exact for similarity transforms.
    pub fn transformed(&self, m: &AffineMatrix) -> Shape {
        let affine = AffineTransform::new(
            m.get(0, 0),
            m.get(0, 1),
            m.get(0, 2),
            m.get(1, 0),
            m.get(1, 1),
            m.get(1, 2),
        );
        match self {
            Shape::Circle { center, radius } => {
                let p = m.apply(&[center.x, center.y]);
                let det = m.linear_determinant().unwrap_or(1.0);
                Shape::Circle {
                    center: Coord { x: p[0], y: p[1] },
                    radius: radius * det.abs().sqrt(),
                }
            }
            Shape::Polygon { polygon } => Shape::Polygon {
                polygon: polygon.affine_transform(&affine),
            },
            Shape::MultiPolygon { polygons } => Shape::MultiPolygon {
                polygons: polygons.affine_transform(&affine),
            },
        }
    }
}

/// Geometries, ids and per-geometry attributes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShapeData {
    pub geometries: Vec<Shape>,
    pub instance_ids: Vec<InstanceId>,
    pub attributes: Option<ColumnarTable>,
}

impl ShapeData {
    /// Geometries with sequential ids and no attributes.
    pub fn new(geometries: Vec<Shape>) -> Self {
        let instance_ids = sequential_ids(geometries.len());
        Self {
            geometries,
            instance_ids,
            attributes: None,
        }
    }

    pub fn with_ids(mut self, ids: Vec<InstanceId>) -> Self {
        self.instance_ids = ids;
        self
    }

    pub fn with_attributes(mut self, attributes: ColumnarTable) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    pub fn check(&self) -> Result<()> {
        if self.instance_ids.len() != self.geometries.len() {
            return Err(SpatialDataError::invalid_element(
                "<shapes>",
                format!(
                    "{} instance ids for {} geometries",
                    self.instance_ids.len(),
                    self.geometries.len()
                ),
            ));
        }
        for (i, g) in self.geometries.iter().enumerate() {
            if let Shape::Circle { radius, .. } = g {
                if !radius.is_finite() || *radius < 0.0 {
                    return Err(SpatialDataError::invalid_element(
                        "<shapes>",
                        format!("circle {} has invalid radius {}", i, radius),
                    ));
                }
            }
        }
        if let Some(attrs) = &self.attributes {
            if attrs.n_columns() > 0 && attrs.n_rows() != self.geometries.len() {
                return Err(SpatialDataError::invalid_element(
                    "<shapes>",
                    format!(
                        "{} attribute rows for {} geometries",
                        attrs.n_rows(),
                        self.geometries.len()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Keeps the geometries at `rows`, in order.
    pub fn take(&self, rows: &[usize]) -> ShapeData {
        ShapeData {
            geometries: rows.iter().map(|&r| self.geometries[r].clone()).collect(),
            instance_ids: rows.iter().map(|&r| self.instance_ids[r]).collect(),
            attributes: self
                .attributes
                .as_ref()
                .map(|a| a.filter_rows(&rows.iter().copied().collect())),
        }
    }
}

/// A collection of 2D geometries. Axes are always `x, y`.
#[derive(Clone, Debug)]
pub struct Shapes {
    native_coordinate_system: String,
    axes: Vec<String>,
    transformations: TransformationMap,
    data: Lazy<ShapeData>,
}

impl Shapes {
    pub fn new(native_coordinate_system: &str, data: ShapeData) -> Result<Self> {
        let axes = axis_names(&["x", "y"]);
        check_vector_axes(native_coordinate_system, &axes)?;
        data.check()?;
        Ok(Self {
            native_coordinate_system: native_coordinate_system.to_string(),
            axes,
            transformations: TransformationMap::new(),
            data: Lazy::loaded(data),
        })
    }

    /// Shapes whose data is loaded on first access.
    pub fn lazy(
        native_coordinate_system: &str,
        transformations: TransformationMap,
        data: Lazy<ShapeData>,
    ) -> Result<Self> {
        let axes = axis_names(&["x", "y"]);
        check_vector_axes(native_coordinate_system, &axes)?;
        Ok(Self {
            native_coordinate_system: native_coordinate_system.to_string(),
            axes,
            transformations,
            data,
        })
    }

    pub fn native_coordinate_system(&self) -> &str {
        &self.native_coordinate_system
    }

    pub fn axes(&self) -> &[String] {
        &self.axes
    }

    pub fn transformations(&self) -> &TransformationMap {
        &self.transformations
    }

    pub fn data(&self) -> Result<Arc<ShapeData>> {
        self.data.get()
    }

    pub fn load_state(&self) -> LoadState {
        self.data.state()
    }

    pub fn add_transformation(&mut self, target: &str, t: Transformation) -> Result<()> {
        t.check()?;
        t.infer_output_axes(&self.axes)?;
        self.transformations.insert(target, t);
        Ok(())
    }

    pub fn remove_transformation(&mut self, target: &str) -> Option<Transformation> {
        self.transformations.remove(target)
    }

    pub fn remove_all_transformations(&mut self) {
        self.transformations.clear();
    }

    pub(crate) fn with_data(&self, data: ShapeData) -> Self {
        Self {
            native_coordinate_system: self.native_coordinate_system.clone(),
            axes: self.axes.clone(),
            transformations: self.transformations.clone(),
            data: Lazy::loaded(data),
        }
    }

    pub(crate) fn reframed(
        native_coordinate_system: &str,
        transformations: TransformationMap,
        data: ShapeData,
    ) -> Self {
        Self {
            native_coordinate_system: native_coordinate_system.to_string(),
            axes: axis_names(&["x", "y"]),
            transformations,
            data: Lazy::loaded(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square() -> Polygon<f64> {
        polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)]
    }

    #[test]
    fn test_bounding_rect() {
        let c = Shape::circle(5.0, 5.0, 1.0).bounding_rect().unwrap();
        assert_eq!(c.min(), Coord { x: 4.0, y: 4.0 });
        let p = Shape::polygon(square()).bounding_rect().unwrap();
        assert_eq!(p.max(), Coord { x: 2.0, y: 2.0 });
    }

    #[test]
    fn test_circle_rect_intersection() {
        let rect = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 });
        assert!(Shape::circle(1.5, 0.5, 0.6).intersects_rect(&rect));
        assert!(!Shape::circle(3.0, 3.0, 1.0).intersects_rect(&rect));
    }

    #[test]
    fn test_transformed_polygon() {
        let scale = Transformation::scale(&["x", "y"], &[2.0, 3.0]).unwrap();
        let xy = axis_names(&["x", "y"]);
        let m = scale.to_affine_matrix(&xy, &xy).unwrap();
        let moved = Shape::polygon(square()).transformed(&m);
        let r = moved.bounding_rect().unwrap();
        assert_eq!(r.max(), Coord { x: 4.0, y: 6.0 });
    }

    #[test]
    fn test_transformed_circle_radius() {
        let scale = Transformation::scale(&["x", "y"], &[2.0, 2.0]).unwrap();
        let xy = axis_names(&["x", "y"]);
        let m = scale.to_affine_matrix(&xy, &xy).unwrap();
        match Shape::circle(1.0, 1.0, 1.5).transformed(&m) {
            Shape::Circle { center, radius } => {
                assert_eq!(center, Coord { x: 2.0, y: 2.0 });
                assert!((radius - 3.0).abs() < 1e-12);
            }
            other => panic!("expected circle, got {:?}", other),
        }
    }

    #[test]
    fn test_shape_data_checks_ids() {
        let data = ShapeData::new(vec![Shape::polygon(square())]).with_ids(vec![]);
        assert!(Shapes::new("global", data).is_err());
    }

    #[test]
    fn test_shape_serde_tag() {
        let json = serde_json::to_value(Shape::circle(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(json["type"], "circle");
        assert_eq!(json["radius"], 3.0);
    }
}
