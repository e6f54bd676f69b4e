//! Container inspection.
//!
//! Produces a structured summary of a [`SpatialData`] container: element
//! counts per kind, one line per element and the coordinate systems with
//! their member elements. Inspection never loads element payloads.

mod report;

pub use report::{CoordinateSystemSummary, ElementSummary, InspectReport, KindCount};

use crate::container::SpatialData;
use crate::model::{ElementKind, SpatialElement};

/// Options for container inspection.
#[derive(Clone, Debug)]
pub struct InspectOptions {
    /// List every transformation, not just its target system.
    pub show_transformations: bool,
    /// Width of the per-kind count bars (in characters).
    pub bar_width: usize,
}

impl Default for InspectOptions {
    fn default() -> Self {
        Self {
            show_transformations: false,
            bar_width: 20,
        }
    }
}

/// Inspect a container and produce a report.
pub fn inspect_container(sd: &SpatialData, opts: &InspectOptions) -> InspectReport {
    let counts = ElementKind::ALL
        .into_iter()
        .map(|kind| KindCount {
            kind,
            count: sd.count(kind),
        })
        .collect();

    let elements = sd
        .elements()
        .map(|(kind, name, element)| summarize_element(kind, name, element, opts))
        .collect();

    let coordinate_systems = sd
        .coordinate_systems()
        .into_iter()
        .map(|cs| {
            let members = sd
                .elements()
                .filter(|(_, _, el)| {
                    el.native_coordinate_system() == Some(cs.name.as_str())
                        || el.transformations().is_some_and(|m| m.contains(&cs.name))
                })
                .map(|(_, name, _)| name.to_string())
                .collect();
            CoordinateSystemSummary {
                axes: cs.axis_names(),
                name: cs.name,
                elements: members,
            }
        })
        .collect();

    InspectReport {
        counts,
        elements,
        coordinate_systems,
        bar_width: opts.bar_width,
    }
}

fn summarize_element(kind: ElementKind, name: &str, element: &SpatialElement, opts: &InspectOptions) -> ElementSummary {
    let mut summary = ElementSummary {
        kind,
        name: name.to_string(),
        native_coordinate_system: element.native_coordinate_system().map(String::from),
        axes: element.axes().map(<[String]>::to_vec).unwrap_or_default(),
        shape: None,
        dtype: None,
        levels: None,
        load_state: element.load_state().to_string(),
        targets: Vec::new(),
        transformations: Vec::new(),
        annotates: Vec::new(),
    };

    if let Some(map) = element.transformations() {
        summary.targets = map.targets().into_iter().map(String::from).collect();
        if opts.show_transformations {
            summary.transformations = map.iter().map(|(target, t)| (target.to_string(), t.to_string())).collect();
        }
    }
    if let Some(raster) = element.as_raster() {
        summary.shape = Some(raster.shape().to_vec());
        summary.dtype = Some(raster.dtype().to_string());
        summary.levels = Some(raster.levels().len());
    }
    if let Some(annotation) = element.as_table().and_then(|t| t.annotation()) {
        summary.annotates = annotation.regions.clone();
    }
    summary
}
