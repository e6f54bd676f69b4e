//! Container validation.
//!
//! This module checks every cross-element invariant of a
//! [`SpatialData`] container and collects all violations into one report:
//! - Naming (empty names, ambiguous reuse across kinds)
//! - Coordinate systems (transformations consume native axes, declared
//!   systems match the axes produced)
//! - Multiscale consistency between pyramid levels
//! - Table annotation targets (existence, kind, key columns, cardinality)

mod report;

pub use report::{IssueCode, IssueContext, Severity, ValidationIssue, ValidationReport};

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::container::{NamePolicy, SpatialData};
use crate::model::{CardinalityPolicy, ColumnType, ElementKind, SpatialElement, Table};
use crate::transform::{spatial_axes, CoordinateSystem, DEFAULT_TOLERANCE};

/// How deep validation goes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ValidationScope {
    /// Metadata only. Never loads element data.
    Structural,
    /// Also loads tables and vector data to check keys and cardinality.
    #[default]
    Full,
}

/// Options for validation behavior.
#[derive(Clone, Debug)]
pub struct ValidateOptions {
    /// If true, treat warnings as errors.
    pub strict: bool,
    /// Rows-per-geometry rule for annotation tables.
    pub cardinality: CardinalityPolicy,
    /// Permit one name across several kinds even if the container does not.
    pub allow_cross_kind_names: bool,
    /// Absolute tolerance for multiscale consistency.
    pub tolerance: f64,
    pub scope: ValidationScope,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            strict: false,
            cardinality: CardinalityPolicy::default(),
            allow_cross_kind_names: false,
            tolerance: DEFAULT_TOLERANCE,
            scope: ValidationScope::default(),
        }
    }
}

impl ValidateOptions {
    /// Options for the metadata-only check run when a store is opened.
    pub fn structural() -> Self {
        Self {
            scope: ValidationScope::Structural,
            ..Self::default()
        }
    }
}

/// Validates a container and returns a report of all issues found.
///
/// Nothing short-circuits: every element is checked even after the first
/// error so callers can fix everything in one pass.
pub fn validate_container(sd: &SpatialData, opts: &ValidateOptions) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_names(sd, opts, &mut report);
    validate_coordinate_systems(sd, &mut report);
    validate_multiscale(sd, opts, &mut report);
    validate_tables(sd, opts, &mut report);
    if opts.scope == ValidationScope::Full {
        validate_element_data(sd, &mut report);
    }

    report
}

fn validate_names(sd: &SpatialData, opts: &ValidateOptions, report: &mut ValidationReport) {
    let allow_cross = opts.allow_cross_kind_names || sd.name_policy() == NamePolicy::AllowCrossKind;
    let mut seen: HashMap<&str, ElementKind> = HashMap::new();

    for (kind, name, _) in sd.elements() {
        if name.is_empty() {
            report.add(ValidationIssue::error(
                IssueCode::EmptyName,
                "Element name is empty",
                IssueContext::element(kind, name),
            ));
        }
        match seen.get(name) {
            Some(first) if !allow_cross => report.add(ValidationIssue::error(
                IssueCode::DuplicateName,
                format!("Name '{}' is also used by a {} element", name, first),
                IssueContext::element(kind, name),
            )),
            Some(_) => {}
            None => {
                seen.insert(name, kind);
            }
        }
    }
}

fn validate_coordinate_systems(sd: &SpatialData, report: &mut ValidationReport) {
    let declared: HashMap<&str, &CoordinateSystem> = sd
        .declared_coordinate_systems()
        .iter()
        .map(|cs| (cs.name.as_str(), cs))
        .collect();

    for (kind, name, element) in sd.elements() {
        let (Some(native), Some(axes), Some(transformations)) = (
            element.native_coordinate_system(),
            element.axes(),
            element.transformations(),
        ) else {
            continue;
        };
        let ctx = || IssueContext::element(kind, name);

        if let Some(cs) = declared.get(native) {
            let missing: Vec<&String> = axes.iter().filter(|a| !cs.has_axis(a)).collect();
            if !missing.is_empty() {
                report.add(ValidationIssue::error(
                    IssueCode::UnresolvedCoordinateSystem,
                    format!(
                        "Native axes {:?} are not all axes of declared system {}",
                        axes, cs
                    ),
                    ctx(),
                ));
            }
        }

        for (target, t) in transformations.iter() {
            if target.is_empty() {
                report.add(ValidationIssue::error(
                    IssueCode::EmptyName,
                    "Transformation targets an empty coordinate system name",
                    ctx(),
                ));
                continue;
            }
            if let Err(e) = t.check() {
                report.add(ValidationIssue::error(
                    IssueCode::InvalidTransformation,
                    format!("Transformation to '{}': {}", target, e),
                    ctx(),
                ));
                continue;
            }
            let produced = match t.infer_output_axes(axes) {
                Ok(p) => p,
                Err(e) => {
                    report.add(ValidationIssue::error(
                        IssueCode::AxisMismatch,
                        format!("Transformation to '{}' cannot be applied: {}", target, e),
                        ctx(),
                    ));
                    continue;
                }
            };
            if let Some(cs) = declared.get(target) {
                let extra: Vec<String> = spatial_axes(&produced)
                    .into_iter()
                    .filter(|a| !cs.has_axis(a))
                    .collect();
                if !extra.is_empty() {
                    report.add(ValidationIssue::error(
                        IssueCode::UnresolvedCoordinateSystem,
                        format!(
                            "Transformation to '{}' produces axes {:?} not in declared system {}",
                            target, extra, cs
                        ),
                        ctx(),
                    ));
                }
            }
        }
    }
}

fn validate_multiscale(sd: &SpatialData, opts: &ValidateOptions, report: &mut ValidationReport) {
    for (kind, name, element) in sd.elements() {
        let Some(raster) = element.as_raster() else {
            continue;
        };
        for problem in raster.multiscale_inconsistencies(opts.tolerance) {
            report.add(ValidationIssue::error(
                IssueCode::MultiscaleInconsistent,
                problem,
                IssueContext::element(kind, name),
            ));
        }
    }
}

fn validate_tables(sd: &SpatialData, opts: &ValidateOptions, report: &mut ValidationReport) {
    for (kind, name, element) in sd.elements() {
        let Some(table) = element.as_table() else {
            continue;
        };
        let Some(target) = table.annotation() else {
            continue;
        };
        let ctx = || IssueContext::element(kind, name);

        let mut annotated: Vec<(&str, &SpatialElement)> = Vec::new();
        for region in &target.regions {
            match sd.annotation_target(region) {
                None => report.add(ValidationIssue::error(
                    IssueCode::MissingAnnotationTarget,
                    format!("Annotation target '{}' does not exist", region),
                    ctx(),
                )),
                Some((k, _)) if !k.is_annotatable() => report.add(ValidationIssue::error(
                    IssueCode::IncompatibleAnnotationKind,
                    format!("Annotation target '{}' is a {} element", region, k),
                    ctx(),
                )),
                Some((_, el)) => annotated.push((region.as_str(), el)),
            }
        }

        if opts.scope == ValidationScope::Full {
            validate_table_rows(name, kind, table, &annotated, opts, report);
        }
    }
}

fn validate_table_rows(
    name: &str,
    kind: ElementKind,
    table: &Table,
    annotated: &[(&str, &SpatialElement)],
    opts: &ValidateOptions,
    report: &mut ValidationReport,
) {
    let ctx = || IssueContext::element(kind, name);
    let Some(target) = table.annotation() else {
        return;
    };
    let data = match table.data() {
        Ok(d) => d,
        Err(e) => {
            report.add(ValidationIssue::error(
                IssueCode::InvalidElementData,
                format!("Table data could not be loaded: {}", e),
                ctx(),
            ));
            return;
        }
    };

    let region_col = data.column(&target.region_key);
    let region_ok = matches!(
        region_col.map(|c| c.column_type()),
        Some(ColumnType::Str | ColumnType::Categorical)
    );
    if !region_ok {
        report.add(ValidationIssue::error(
            IssueCode::MissingRegionKey,
            format!("Region key column '{}' is missing or not a string column", target.region_key),
            ctx(),
        ));
    }
    let instance_col = data.column(&target.instance_key);
    if !matches!(instance_col.map(|c| c.column_type()), Some(ColumnType::Int)) {
        report.add(ValidationIssue::error(
            IssueCode::MissingInstanceKey,
            format!(
                "Instance key column '{}' is missing or not an integer column",
                target.instance_key
            ),
            ctx(),
        ));
    }
    let (Some(region_col), Some(instance_col)) = (region_col, instance_col) else {
        return;
    };
    if !region_ok {
        return;
    }

    let mut seen: HashMap<(&str, i64), usize> = HashMap::new();
    let mut unknown_regions: BTreeMap<&str, usize> = BTreeMap::new();
    for row in 0..data.n_rows() {
        let (Some(region), Some(id)) = (region_col.get_str(row), instance_col.get_i64(row)) else {
            continue;
        };
        if !target.annotates(region) {
            *unknown_regions.entry(region).or_default() += 1;
            continue;
        }
        if let Some(first) = seen.insert((region, id), row) {
            if opts.cardinality == CardinalityPolicy::OneToOne {
                report.add(ValidationIssue::error(
                    IssueCode::CardinalityViolation,
                    format!(
                        "Rows {} and {} both describe instance {} of '{}'",
                        first, row, id, region
                    ),
                    ctx(),
                ));
            }
        }
    }
    for (region, count) in unknown_regions {
        report.add(ValidationIssue::error(
            IssueCode::UnknownRegion,
            format!(
                "{} row(s) name region '{}' outside the annotation target",
                count, region
            ),
            ctx(),
        ));
    }

    for (region, element) in annotated {
        let ids = match element.vector_instance_ids() {
            Ok(Some(ids)) => ids,
            Ok(None) => continue,
            Err(e) => {
                report.add(ValidationIssue::error(
                    IssueCode::InvalidElementData,
                    format!("Data of '{}' could not be loaded: {}", region, e),
                    ctx(),
                ));
                continue;
            }
        };
        let mut known: HashSet<i64> = HashSet::with_capacity(ids.len());
        let mut ambiguous: Vec<i64> = Vec::new();
        for id in &ids {
            if !known.insert(id.as_i64()) && !ambiguous.contains(&id.as_i64()) {
                ambiguous.push(id.as_i64());
            }
        }
        for id in ambiguous {
            report.add(ValidationIssue::error(
                IssueCode::CardinalityViolation,
                format!(
                    "Instance id {} identifies several geometries of '{}', rows keyed by it are ambiguous",
                    id, region
                ),
                ctx(),
            ));
        }
        let unknown = seen
            .keys()
            .filter(|(r, id)| r == region && !known.contains(id))
            .count();
        if unknown > 0 {
            report.add(ValidationIssue::warning(
                IssueCode::UnknownInstance,
                format!("{} row(s) reference ids not present in '{}'", unknown, region),
                ctx(),
            ));
        }
    }
}

fn validate_element_data(sd: &SpatialData, report: &mut ValidationReport) {
    for (kind, name, element) in sd.elements() {
        let result = match element {
            SpatialElement::Points(p) => p.data().and_then(|d| d.check(p.axes().len())),
            SpatialElement::Shapes(s) => s.data().and_then(|d| d.check()),
            SpatialElement::Table(t) => t.data().map(|_| ()),
            SpatialElement::Image(_) | SpatialElement::Labels(_) => Ok(()),
        };
        if let Err(e) = result {
            report.add(ValidationIssue::error(
                IssueCode::InvalidElementData,
                e.to_string(),
                IssueContext::element(kind, name),
            ));
        }
    }
}
