//! The spatial element model.
//!
//! Five element kinds form a closed set: [`SpatialElement`] is matched
//! exhaustively everywhere. Each spatial element owns a native coordinate
//! system name and an ordered [`TransformationMap`] into other systems;
//! tables carry neither and are linked to geometries through an
//! [`AnnotationTarget`].

mod ids;
mod lazy;
mod points;
mod raster;
mod shapes;
mod table;

pub use ids::{sequential_ids, InstanceId};
pub use lazy::{Lazy, LoadState};
pub use points::{PointData, Points};
pub use raster::{Raster, RasterKind, RasterLevel};
pub use shapes::{Shape, ShapeData, Shapes};
pub use table::{AnnotationTarget, CardinalityPolicy, Column, ColumnType, ColumnarTable, Table};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SpatialDataError};
use crate::transform::Transformation;

/// The kind of a [`SpatialElement`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Image,
    Labels,
    Points,
    Shapes,
    Table,
}

impl ElementKind {
    /// All kinds, in collection order.
    pub const ALL: [ElementKind; 5] = [
        ElementKind::Image,
        ElementKind::Labels,
        ElementKind::Points,
        ElementKind::Shapes,
        ElementKind::Table,
    ];

    /// Name of the collection group holding elements of this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            ElementKind::Image => "images",
            ElementKind::Labels => "labels",
            ElementKind::Points => "points",
            ElementKind::Shapes => "shapes",
            ElementKind::Table => "tables",
        }
    }

    pub fn from_collection(name: &str) -> Option<Self> {
        ElementKind::ALL.into_iter().find(|k| k.collection() == name)
    }

    /// Returns false for tables.
    pub fn is_spatial(&self) -> bool {
        !matches!(self, ElementKind::Table)
    }

    /// Kinds a table may annotate.
    pub fn is_annotatable(&self) -> bool {
        matches!(self, ElementKind::Labels | ElementKind::Shapes | ElementKind::Points)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElementKind::Image => "image",
            ElementKind::Labels => "labels",
            ElementKind::Points => "points",
            ElementKind::Shapes => "shapes",
            ElementKind::Table => "table",
        };
        write!(f, "{}", s)
    }
}

/// Ordered mapping from target coordinate system to transformation.
///
/// Insertion order is kept; replacing an entry keeps its position.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransformationMap {
    entries: Vec<(String, Transformation)>,
}

impl TransformationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, target: &str) -> Option<&Transformation> {
        self.entries
            .iter()
            .find(|(t, _)| t == target)
            .map(|(_, tr)| tr)
    }

    pub fn contains(&self, target: &str) -> bool {
        self.get(target).is_some()
    }

    /// Inserts or replaces the entry for `target`.
    pub fn insert(&mut self, target: &str, t: Transformation) {
        match self.entries.iter_mut().find(|(name, _)| name == target) {
            Some((_, existing)) => *existing = t,
            None => self.entries.push((target.to_string(), t)),
        }
    }

    pub fn remove(&mut self, target: &str) -> Option<Transformation> {
        let pos = self.entries.iter().position(|(t, _)| t == target)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Transformation)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    /// Target system names in declaration order.
    pub fn targets(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Transformation)> for TransformationMap {
    fn from_iter<I: IntoIterator<Item = (String, Transformation)>>(iter: I) -> Self {
        let mut map = TransformationMap::new();
        for (target, t) in iter {
            map.insert(&target, t);
        }
        map
    }
}

/// One element of a container.
#[derive(Clone, Debug)]
pub enum SpatialElement {
    Image(Raster),
    Labels(Raster),
    Points(Points),
    Shapes(Shapes),
    Table(Table),
}

impl SpatialElement {
    pub fn kind(&self) -> ElementKind {
        match self {
            SpatialElement::Image(_) => ElementKind::Image,
            SpatialElement::Labels(_) => ElementKind::Labels,
            SpatialElement::Points(_) => ElementKind::Points,
            SpatialElement::Shapes(_) => ElementKind::Shapes,
            SpatialElement::Table(_) => ElementKind::Table,
        }
    }

    /// Wraps a raster under the kind matching its [`RasterKind`].
    pub fn raster(raster: Raster) -> Self {
        match raster.kind() {
            RasterKind::Image => SpatialElement::Image(raster),
            RasterKind::Labels => SpatialElement::Labels(raster),
        }
    }

    /// Native coordinate system, or `None` for tables.
    pub fn native_coordinate_system(&self) -> Option<&str> {
        match self {
            SpatialElement::Image(r) | SpatialElement::Labels(r) => Some(r.native_coordinate_system()),
            SpatialElement::Points(p) => Some(p.native_coordinate_system()),
            SpatialElement::Shapes(s) => Some(s.native_coordinate_system()),
            SpatialElement::Table(_) => None,
        }
    }

    /// Native axes, or `None` for tables.
    pub fn axes(&self) -> Option<&[String]> {
        match self {
            SpatialElement::Image(r) | SpatialElement::Labels(r) => Some(r.axes()),
            SpatialElement::Points(p) => Some(p.axes()),
            SpatialElement::Shapes(s) => Some(s.axes()),
            SpatialElement::Table(_) => None,
        }
    }

    /// Declared transformations, or `None` for tables.
    pub fn transformations(&self) -> Option<&TransformationMap> {
        match self {
            SpatialElement::Image(r) | SpatialElement::Labels(r) => Some(r.transformations()),
            SpatialElement::Points(p) => Some(p.transformations()),
            SpatialElement::Shapes(s) => Some(s.transformations()),
            SpatialElement::Table(_) => None,
        }
    }

    /// Direct lookup of the transformation to `target`. No path search.
    ///
    /// # Errors
    /// `NotSpatial` for tables, `TransformNotFound` if there is no entry.
    pub fn get_transformation(&self, name: &str, target: &str) -> Result<&Transformation> {
        let map = self.transformations().ok_or_else(|| SpatialDataError::NotSpatial {
            name: name.to_string(),
        })?;
        map.get(target).ok_or_else(|| SpatialDataError::TransformNotFound {
            element: name.to_string(),
            target_system: target.to_string(),
        })
    }

    /// Adds or replaces the transformation to `target`.
    ///
    /// # Errors
    /// `AxisMismatch` if `t` cannot consume the native axes, `NotSpatial`
    /// for tables. The element is unchanged on error.
    pub fn add_transformation(&mut self, name: &str, target: &str, t: Transformation) -> Result<()> {
        if target.is_empty() {
            return Err(SpatialDataError::invalid_element(
                name,
                "target coordinate system name must not be empty",
            ));
        }
        match self {
            SpatialElement::Image(r) | SpatialElement::Labels(r) => r.add_transformation(target, t),
            SpatialElement::Points(p) => p.add_transformation(target, t),
            SpatialElement::Shapes(s) => s.add_transformation(target, t),
            SpatialElement::Table(_) => Err(SpatialDataError::NotSpatial {
                name: name.to_string(),
            }),
        }
    }

    pub fn remove_transformation(&mut self, target: &str) -> Option<Transformation> {
        match self {
            SpatialElement::Image(r) | SpatialElement::Labels(r) => r.remove_transformation(target),
            SpatialElement::Points(p) => p.remove_transformation(target),
            SpatialElement::Shapes(s) => s.remove_transformation(target),
            SpatialElement::Table(_) => None,
        }
    }

    pub fn remove_all_transformations(&mut self) {
        match self {
            SpatialElement::Image(r) | SpatialElement::Labels(r) => r.remove_all_transformations(),
            SpatialElement::Points(p) => p.remove_all_transformations(),
            SpatialElement::Shapes(s) => s.remove_all_transformations(),
            SpatialElement::Table(_) => {}
        }
    }

    /// Load state of the element's bulk data.
    pub fn load_state(&self) -> LoadState {
        match self {
            SpatialElement::Image(r) | SpatialElement::Labels(r) => r.load_state(),
            SpatialElement::Points(p) => p.load_state(),
            SpatialElement::Shapes(s) => s.load_state(),
            SpatialElement::Table(t) => t.load_state(),
        }
    }

    pub fn as_raster(&self) -> Option<&Raster> {
        match self {
            SpatialElement::Image(r) | SpatialElement::Labels(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            SpatialElement::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Instance ids carried by a vector element, loading its data.
    pub(crate) fn vector_instance_ids(&self) -> Result<Option<Vec<InstanceId>>> {
        Ok(match self {
            SpatialElement::Points(p) => Some(p.data()?.instance_ids.clone()),
            SpatialElement::Shapes(s) => Some(s.data()?.instance_ids.clone()),
            _ => None,
        })
    }
}

impl From<Points> for SpatialElement {
    fn from(p: Points) -> Self {
        SpatialElement::Points(p)
    }
}

impl From<Shapes> for SpatialElement {
    fn from(s: Shapes) -> Self {
        SpatialElement::Shapes(s)
    }
}

impl From<Table> for SpatialElement {
    fn from(t: Table) -> Self {
        SpatialElement::Table(t)
    }
}

impl From<Raster> for SpatialElement {
    fn from(r: Raster) -> Self {
        SpatialElement::raster(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use smallvec::smallvec;

    fn points() -> SpatialElement {
        Points::new("global", &["x", "y"], PointData::new(vec![smallvec![1.0, 2.0]]))
            .unwrap()
            .into()
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(ElementKind::Image.collection(), "images");
        assert_eq!(ElementKind::from_collection("tables"), Some(ElementKind::Table));
        assert_eq!(ElementKind::from_collection("nope"), None);
    }

    #[test]
    fn test_transformation_map_keeps_order_on_replace() {
        let mut map = TransformationMap::new();
        map.insert("a", Transformation::Identity);
        map.insert("b", Transformation::Identity);
        map.insert("a", Transformation::scale(&["x"], &[2.0]).unwrap());
        assert_eq!(map.targets(), vec!["a", "b"]);
        assert_eq!(map.get("a").unwrap().type_name(), "scale");
        assert!(map.remove("a").is_some());
        assert_eq!(map.targets(), vec!["b"]);
    }

    #[test]
    fn test_get_transformation_is_direct_lookup() {
        let mut el = points();
        el.add_transformation("pts", "aligned", Transformation::Identity)
            .unwrap();
        assert!(el.get_transformation("pts", "aligned").is_ok());
        let err = el.get_transformation("pts", "other").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransformNotFound);
    }

    #[test]
    fn test_table_is_not_spatial() {
        let mut el: SpatialElement = Table::new(ColumnarTable::new()).into();
        assert!(el.native_coordinate_system().is_none());
        let err = el
            .add_transformation("t", "global", Transformation::Identity)
            .unwrap_err();
        assert!(matches!(err, SpatialDataError::NotSpatial { .. }));
    }
}
