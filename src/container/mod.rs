//! The [`SpatialData`] container.
//!
//! Owns kind-segregated, ordered collections of elements. Elements refer to
//! each other (tables to annotated geometries) only by name; the container
//! is the sole owner.

mod concat;

pub use concat::{concatenate, concatenate_tables};

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::align::graph::TransformGraph;
use crate::error::{Result, SpatialDataError};
use crate::model::{ElementKind, Raster, RasterKind, SpatialElement, Table};
use crate::transform::{CoordinateSystem, Transformation};
use crate::validation::{validate_container, ValidateOptions, ValidationReport};

/// Whether one name may be shared by elements of different kinds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NamePolicy {
    /// Names are unique across the whole container.
    #[default]
    Exclusive,
    /// Names are only unique within a kind.
    AllowCrossKind,
}

type Collection = Vec<(String, SpatialElement)>;

/// A set of co-registered spatial elements.
#[derive(Clone, Debug, Default)]
pub struct SpatialData {
    images: Collection,
    labels: Collection,
    points: Collection,
    shapes: Collection,
    tables: Collection,
    declared: Vec<CoordinateSystem>,
    name_policy: NamePolicy,
}

impl SpatialData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name_policy(name_policy: NamePolicy) -> Self {
        Self {
            name_policy,
            ..Self::default()
        }
    }

    pub fn name_policy(&self) -> NamePolicy {
        self.name_policy
    }

    fn collection(&self, kind: ElementKind) -> &Collection {
        match kind {
            ElementKind::Image => &self.images,
            ElementKind::Labels => &self.labels,
            ElementKind::Points => &self.points,
            ElementKind::Shapes => &self.shapes,
            ElementKind::Table => &self.tables,
        }
    }

    fn collection_mut(&mut self, kind: ElementKind) -> &mut Collection {
        match kind {
            ElementKind::Image => &mut self.images,
            ElementKind::Labels => &mut self.labels,
            ElementKind::Points => &mut self.points,
            ElementKind::Shapes => &mut self.shapes,
            ElementKind::Table => &mut self.tables,
        }
    }

    /// Attaches an element under `name`.
    ///
    /// # Errors
    /// `InvalidElement` if the name cannot be stored (see
    /// [`check_element_name`]). `DuplicateName` if the name is taken in the
    /// element's kind, or in any kind under [`NamePolicy::Exclusive`]. The
    /// container is unchanged on error.
    pub fn add(&mut self, name: &str, element: impl Into<SpatialElement>) -> Result<()> {
        let element = element.into();
        let kind = element.kind();
        check_element_name(name)?;
        self.check_name_free(kind, name)?;
        debug!(kind = %kind, name, "adding element");
        self.collection_mut(kind).push((name.to_string(), element));
        Ok(())
    }

    fn check_name_free(&self, kind: ElementKind, name: &str) -> Result<()> {
        for existing_kind in ElementKind::ALL {
            if existing_kind != kind && self.name_policy == NamePolicy::AllowCrossKind {
                continue;
            }
            if self.collection(existing_kind).iter().any(|(n, _)| n == name) {
                return Err(SpatialDataError::DuplicateName {
                    kind,
                    name: name.to_string(),
                    existing_kind,
                });
            }
        }
        Ok(())
    }

    pub fn add_image(&mut self, name: &str, raster: Raster) -> Result<()> {
        self.add_raster(name, raster, RasterKind::Image)
    }

    pub fn add_labels(&mut self, name: &str, raster: Raster) -> Result<()> {
        self.add_raster(name, raster, RasterKind::Labels)
    }

    fn add_raster(&mut self, name: &str, raster: Raster, expected: RasterKind) -> Result<()> {
        if raster.kind() != expected {
            return Err(SpatialDataError::invalid_element(
                name,
                format!("expected a {:?} raster, got {:?}", expected, raster.kind()),
            ));
        }
        self.add(name, raster)
    }

    pub fn add_table(&mut self, name: &str, table: Table) -> Result<()> {
        self.add(name, table)
    }

    /// Looks up an element by kind and name.
    pub fn get_kind(&self, kind: ElementKind, name: &str) -> Option<&SpatialElement> {
        self.collection(kind)
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }

    /// Looks up an element by name across all kinds, in kind order.
    pub fn get(&self, name: &str) -> Option<&SpatialElement> {
        self.find(name).first().map(|(_, e)| *e)
    }

    /// Every element called `name`, in kind order.
    pub fn find(&self, name: &str) -> Vec<(ElementKind, &SpatialElement)> {
        ElementKind::ALL
            .into_iter()
            .filter_map(|k| self.get_kind(k, name).map(|e| (k, e)))
            .collect()
    }

    /// The element a table region called `name` refers to: the first
    /// annotatable element of that name, else the first of any kind.
    pub fn annotation_target(&self, name: &str) -> Option<(ElementKind, &SpatialElement)> {
        let found = self.find(name);
        found
            .iter()
            .find(|(k, _)| k.is_annotatable())
            .or_else(|| found.first())
            .copied()
    }

    /// Looks up an element, optionally restricted to one kind.
    ///
    /// # Errors
    /// `ElementNotFound` if there is no such element.
    pub fn element(&self, kind: Option<ElementKind>, name: &str) -> Result<&SpatialElement> {
        let found = match kind {
            Some(k) => self.get_kind(k, name),
            None => self.get(name),
        };
        found.ok_or_else(|| SpatialDataError::ElementNotFound {
            kind,
            name: name.to_string(),
        })
    }

    fn element_mut(&mut self, kind: Option<ElementKind>, name: &str) -> Result<&mut SpatialElement> {
        let kind = match kind {
            Some(k) => k,
            None => self.find(name).first().map(|(k, _)| *k).ok_or_else(|| {
                SpatialDataError::ElementNotFound {
                    kind,
                    name: name.to_string(),
                }
            })?,
        };
        self.collection_mut(kind)
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
            .ok_or_else(|| SpatialDataError::ElementNotFound {
                kind: Some(kind),
                name: name.to_string(),
            })
    }

    /// Detaches and returns an element.
    pub fn remove(&mut self, kind: ElementKind, name: &str) -> Result<SpatialElement> {
        let collection = self.collection_mut(kind);
        let pos = collection
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| SpatialDataError::ElementNotFound {
                kind: Some(kind),
                name: name.to_string(),
            })?;
        debug!(kind = %kind, name, "removing element");
        Ok(collection.remove(pos).1)
    }

    /// Re-attaches `name` with new data, keeping its position. Adds it if
    /// absent. Returns the previous element.
    pub fn replace(&mut self, name: &str, element: impl Into<SpatialElement>) -> Result<Option<SpatialElement>> {
        let element = element.into();
        let kind = element.kind();
        match self
            .collection_mut(kind)
            .iter_mut()
            .find(|(n, _)| n == name)
        {
            Some((_, slot)) => Ok(Some(std::mem::replace(slot, element))),
            None => self.add(name, element).map(|_| None),
        }
    }

    /// Adds or replaces the transformation from element `name` to `target`.
    ///
    /// # Errors
    /// `ElementNotFound`, `NotSpatial` for tables, `AxisMismatch` if `t`
    /// cannot consume the element's native axes.
    pub fn set_transformation(&mut self, name: &str, target: &str, t: Transformation) -> Result<()> {
        let element = self.element_mut(None, name)?;
        element.add_transformation(name, target, t)?;
        debug!(name, target, "set transformation");
        Ok(())
    }

    /// Direct lookup of the transformation from element `name` to `target`.
    pub fn get_transformation(&self, name: &str, target: &str) -> Result<&Transformation> {
        self.element(None, name)?.get_transformation(name, target)
    }

    pub fn remove_transformation(&mut self, name: &str, target: &str) -> Result<Option<Transformation>> {
        Ok(self.element_mut(None, name)?.remove_transformation(target))
    }

    pub fn remove_all_transformations(&mut self, name: &str) -> Result<()> {
        self.element_mut(None, name)?.remove_all_transformations();
        Ok(())
    }

    /// Iterates every element in kind order, then insertion order.
    pub fn elements(&self) -> impl Iterator<Item = (ElementKind, &str, &SpatialElement)> {
        ElementKind::ALL.into_iter().flat_map(move |k| {
            self.collection(k)
                .iter()
                .map(move |(n, e)| (k, n.as_str(), e))
        })
    }

    /// Element names of one kind, in insertion order.
    pub fn names(&self, kind: ElementKind) -> Vec<&str> {
        self.collection(kind).iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn count(&self, kind: ElementKind) -> usize {
        self.collection(kind).len()
    }

    pub fn len(&self) -> usize {
        ElementKind::ALL.iter().map(|k| self.count(*k)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Declares a coordinate system with fixed axes.
    pub fn declare_coordinate_system(&mut self, cs: CoordinateSystem) -> Result<()> {
        if self.declared.iter().any(|d| d.name == cs.name) {
            return Err(SpatialDataError::invalid_element(
                cs.name.clone(),
                "coordinate system already declared",
            ));
        }
        self.declared.push(cs);
        Ok(())
    }

    pub fn declared_coordinate_systems(&self) -> &[CoordinateSystem] {
        &self.declared
    }

    /// Every known coordinate system: declared ones first, then those used
    /// as a native system or transformation target, with axes inferred
    /// from the elements mapped into them.
    pub fn coordinate_systems(&self) -> Vec<CoordinateSystem> {
        let mut systems = self.declared.clone();
        let n_declared = systems.len();
        let note = |systems: &mut Vec<CoordinateSystem>, name: &str, axes: &[String]| {
            match systems.iter().position(|cs| cs.name == name) {
                Some(i) if i < n_declared => {}
                Some(i) => {
                    if let Err(err) = systems[i].merge_axes(axes) {
                        warn!(system = name, error = %err, "keeping previously inferred axes");
                    }
                }
                None => {
                    let mut cs = CoordinateSystem {
                        name: name.to_string(),
                        axes: Vec::new(),
                    };
                    match cs.merge_axes(axes) {
                        Ok(()) => systems.push(cs),
                        Err(err) => warn!(system = name, error = %err, "skipping system with unusable axes"),
                    }
                }
            }
        };
        for (_, _, element) in self.elements() {
            let (Some(native), Some(axes), Some(map)) = (
                element.native_coordinate_system(),
                element.axes(),
                element.transformations(),
            ) else {
                continue;
            };
            note(&mut systems, native, axes);
            for (target, t) in map.iter() {
                if let Ok(out) = t.infer_output_axes(axes) {
                    note(&mut systems, target, &out);
                }
            }
        }
        systems
    }

    /// Validates every container invariant.
    ///
    /// # Errors
    /// `Validation` carrying the full report if any error is found (or any
    /// warning with `strict`).
    pub fn validate(&self, opts: &ValidateOptions) -> Result<ValidationReport> {
        let report = validate_container(self, opts);
        let failed = report.error_count() > 0 || (opts.strict && report.warning_count() > 0);
        if failed {
            return Err(SpatialDataError::Validation {
                error_count: report.error_count(),
                warning_count: report.warning_count(),
                report,
            });
        }
        Ok(report)
    }

    /// Elements with a direct or transitive path into `system`.
    ///
    /// Elements without a path are left out. Annotation tables keep only
    /// rows of retained regions; unannotated tables are kept as they are.
    pub fn filter_by_coordinate_system(&self, system: &str) -> Result<SpatialData> {
        let graph = TransformGraph::build(self);
        let mut out = SpatialData {
            declared: self.declared.clone(),
            name_policy: self.name_policy,
            ..SpatialData::default()
        };
        for (kind, name, element) in self.elements() {
            let Some(native) = element.native_coordinate_system() else {
                continue;
            };
            let reachable = element
                .transformations()
                .is_some_and(|m| m.contains(system))
                || graph.find_path(native, system).is_some();
            if reachable {
                out.collection_mut(kind).push((name.to_string(), element.clone()));
            }
        }
        let retained: BTreeSet<String> = out
            .elements()
            .filter(|(k, _, _)| k.is_annotatable())
            .map(|(_, n, _)| n.to_string())
            .collect();
        for (name, element) in &self.tables {
            if let SpatialElement::Table(table) = element {
                if let Some(kept) = restrict_table_regions(table, &retained)? {
                    out.tables.push((name.clone(), SpatialElement::Table(kept)));
                }
            }
        }
        Ok(out)
    }

    /// Moves all elements of `other` into `self`, failing before any change
    /// if a name would collide.
    pub(crate) fn absorb(&mut self, mut other: SpatialData) -> Result<()> {
        for (kind, name, _) in other.elements() {
            self.check_name_free(kind, name)?;
        }
        for kind in ElementKind::ALL {
            let taken = std::mem::take(other.collection_mut(kind));
            self.collection_mut(kind).extend(taken);
        }
        for cs in other.declared {
            if !self.declared.iter().any(|d| d.name == cs.name) {
                self.declared.push(cs);
            }
        }
        Ok(())
    }
}

/// Element names become group names in a store, so they must be a single
/// non-hidden path part.
pub(crate) fn check_element_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return Err(SpatialDataError::invalid_element(
            name,
            "element names must be non-empty, must not contain path separators and must not start with '.'",
        ));
    }
    Ok(())
}

/// Keeps an annotation table's rows for retained regions only. Returns
/// `None` if none of its regions survive; unannotated tables pass through.
pub(crate) fn restrict_table_regions(table: &Table, retained: &BTreeSet<String>) -> Result<Option<Table>> {
    let Some(target) = table.annotation() else {
        return Ok(Some(table.clone()));
    };
    let regions: Vec<String> = target
        .regions
        .iter()
        .filter(|r| retained.contains(*r))
        .cloned()
        .collect();
    if regions.is_empty() {
        return Ok(None);
    }
    if regions.len() == target.regions.len() {
        return Ok(Some(table.clone()));
    }
    let data = table.data()?;
    let rows: BTreeSet<usize> = match data.column(&target.region_key) {
        Some(col) => (0..data.n_rows())
            .filter(|&r| col.get_str(r).is_some_and(|v| regions.iter().any(|k| k == v)))
            .collect(),
        None => BTreeSet::new(),
    };
    let mut annotation = target.clone();
    annotation.regions = regions;
    Ok(Some(Table::annotating(data.filter_rows(&rows), annotation)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::{AnnotationTarget, Column, ColumnarTable, PointData, Points};
    use smallvec::smallvec;

    fn points(native: &str) -> Points {
        Points::new(native, &["x", "y"], PointData::new(vec![smallvec![1.0, 2.0]])).unwrap()
    }

    #[test]
    fn test_duplicate_name_leaves_container_unchanged() {
        let mut sd = SpatialData::new();
        sd.add("a", points("global")).unwrap();
        let err = sd.add("a", points("other")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateName);
        assert_eq!(sd.len(), 1);
        assert_eq!(
            sd.get("a").unwrap().native_coordinate_system(),
            Some("global")
        );
    }

    #[test]
    fn test_cross_kind_names_follow_policy() {
        let table = Table::new(ColumnarTable::new());
        let mut strict = SpatialData::new();
        strict.add("a", points("global")).unwrap();
        assert!(strict.add("a", table.clone()).is_err());

        let mut relaxed = SpatialData::with_name_policy(NamePolicy::AllowCrossKind);
        relaxed.add("a", points("global")).unwrap();
        relaxed.add("a", table).unwrap();
        assert_eq!(relaxed.find("a").len(), 2);
    }

    #[test]
    fn test_unstorable_names_are_rejected_on_add() {
        let mut sd = SpatialData::new();
        for name in ["", "a/b", "..", ".hidden", "a\\b"] {
            let err = sd.add(name, points("global")).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{:?}", name);
        }
        assert!(sd.is_empty());
        sd.add("a.b", points("global")).unwrap();
        assert!(sd.replace("x/y", points("global")).is_err());
        assert_eq!(sd.len(), 1);
    }

    #[test]
    fn test_annotation_target_prefers_annotatable_kinds() {
        let mut sd = SpatialData::with_name_policy(NamePolicy::AllowCrossKind);
        let table = Table::new(ColumnarTable::new());
        sd.add("cells", table).unwrap();
        assert_eq!(sd.annotation_target("cells").unwrap().0, ElementKind::Table);
        sd.add("cells", points("global")).unwrap();
        assert_eq!(sd.get("cells").unwrap().kind(), ElementKind::Points);
        assert_eq!(sd.annotation_target("cells").unwrap().0, ElementKind::Points);
        assert!(sd.annotation_target("ghost").is_none());
    }

    #[test]
    fn test_set_and_get_transformation() {
        let mut sd = SpatialData::new();
        sd.add("a", points("global")).unwrap();
        let t = Transformation::scale(&["x", "y"], &[2.0, 2.0]).unwrap();
        sd.set_transformation("a", "aligned", t.clone()).unwrap();
        assert_eq!(sd.get_transformation("a", "aligned").unwrap(), &t);
        assert_eq!(
            sd.get_transformation("a", "nowhere").unwrap_err().kind(),
            ErrorKind::TransformNotFound
        );
        assert_eq!(
            sd.set_transformation("missing", "x", Transformation::Identity)
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(sd.remove_transformation("a", "aligned").unwrap(), Some(t));
    }

    #[test]
    fn test_coordinate_systems_are_derived() {
        let mut sd = SpatialData::new();
        sd.add("a", points("global")).unwrap();
        sd.set_transformation(
            "a",
            "stack",
            Transformation::affine(
                vec![
                    vec![1.0, 0.0, 0.0],
                    vec![0.0, 1.0, 0.0],
                    vec![0.0, 0.0, 0.0],
                    vec![0.0, 0.0, 1.0],
                ],
                &["x", "y"],
                &["x", "y", "z"],
            )
            .unwrap(),
        )
        .unwrap();
        let systems = sd.coordinate_systems();
        assert_eq!(systems.len(), 2);
        assert_eq!(systems[0].name, "global");
        assert_eq!(systems[1].name, "stack");
        assert_eq!(systems[1].axis_names(), vec!["z", "y", "x"]);
    }

    #[test]
    fn test_coordinate_system_axes_are_merged_across_elements() {
        let mut sd = SpatialData::new();
        sd.add("flat", points("global")).unwrap();
        let deep = Points::new(
            "global",
            &["x", "y", "z"],
            PointData::new(vec![smallvec![1.0, 2.0, 3.0]]),
        )
        .unwrap();
        sd.add("deep", deep).unwrap();
        let systems = sd.coordinate_systems();
        assert_eq!(systems.len(), 1);
        assert_eq!(systems[0].axis_names(), vec!["z", "y", "x"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut sd = SpatialData::new();
        sd.add("a", points("global")).unwrap();
        sd.add("b", points("global")).unwrap();
        let old = sd.replace("a", points("moved")).unwrap();
        assert!(old.is_some());
        assert_eq!(sd.names(ElementKind::Points), vec!["a", "b"]);
        assert_eq!(sd.get("a").unwrap().native_coordinate_system(), Some("moved"));
    }

    #[test]
    fn test_filter_by_coordinate_system() {
        let mut sd = SpatialData::new();
        sd.add("a", points("global")).unwrap();
        sd.add("b", points("elsewhere")).unwrap();
        let rows = ColumnarTable::new()
            .with_column("region", Column::categorical(&["a", "b"]))
            .unwrap()
            .with_column("instance_id", Column::Int(vec![0, 0]))
            .unwrap();
        sd.add(
            "table",
            Table::annotating(rows, AnnotationTarget::new(&["a", "b"], "region", "instance_id")),
        )
        .unwrap();

        let filtered = sd.filter_by_coordinate_system("global").unwrap();
        assert_eq!(filtered.names(ElementKind::Points), vec!["a"]);
        let table = filtered.get_kind(ElementKind::Table, "table").unwrap().as_table().unwrap();
        assert_eq!(table.annotation().unwrap().regions, vec!["a".to_string()]);
        assert_eq!(table.data().unwrap().n_rows(), 1);
    }

    #[test]
    fn test_validate_aggregates() {
        let mut sd = SpatialData::new();
        let rows = ColumnarTable::new()
            .with_column("instance_id", Column::Int(vec![1]))
            .unwrap();
        sd.add(
            "table",
            Table::annotating(rows, AnnotationTarget::new(&["x", "y"], "region", "instance_id")),
        )
        .unwrap();
        match sd.validate(&ValidateOptions::default()) {
            Err(SpatialDataError::Validation { error_count, report, .. }) => {
                assert_eq!(error_count, 3, "{}", report);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
