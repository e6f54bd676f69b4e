//! Inspect report types and terminal formatting.

use serde::Serialize;
use std::fmt;

use crate::model::ElementKind;

/// Inner width of the report boxes, in characters.
const BOX_WIDTH: usize = 59;

/// The result of inspecting a container.
#[derive(Clone, Debug, Serialize)]
pub struct InspectReport {
    /// Element counts, one entry per kind.
    pub counts: Vec<KindCount>,
    /// One entry per element, in container order.
    pub elements: Vec<ElementSummary>,
    /// Known coordinate systems and the elements living in or mapped into them.
    pub coordinate_systems: Vec<CoordinateSystemSummary>,
    #[serde(skip)]
    pub(crate) bar_width: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct KindCount {
    pub kind: ElementKind,
    pub count: usize,
}

/// Summary of one element.
#[derive(Clone, Debug, Serialize)]
pub struct ElementSummary {
    pub kind: ElementKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_coordinate_system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub axes: Vec<String>,
    /// Shape of the finest level, for rasters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<usize>,
    pub load_state: String,
    /// Transformation targets, in declaration order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
    /// `(target, transformation)` pairs, when requested.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transformations: Vec<(String, String)>,
    /// Regions annotated by a table.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotates: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CoordinateSystemSummary {
    pub name: String,
    pub axes: Vec<String>,
    pub elements: Vec<String>,
}

impl InspectReport {
    pub fn total_elements(&self) -> usize {
        self.counts.iter().map(|c| c.count).sum()
    }
}

impl fmt::Display for InspectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "╭─────────────────────────────────────────────────────────────╮")?;
        writeln!(f, "│              🧭  SpatialData Inspection Report               │")?;
        writeln!(f, "╰─────────────────────────────────────────────────────────────╯")?;
        writeln!(f)?;

        self.fmt_counts(f)?;
        writeln!(f)?;
        self.fmt_elements(f)?;
        writeln!(f)?;
        self.fmt_coordinate_systems(f)?;

        Ok(())
    }
}

impl InspectReport {
    fn fmt_counts(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        open_box(f, &format!("Summary ({} elements)", format_number(self.total_elements())))?;
        let max_count = self.counts.iter().map(|c| c.count).max().unwrap_or(0);
        for c in &self.counts {
            let bar = render_bar(c.count, max_count, self.bar_width);
            row(
                f,
                &format!("  {:<10} {:>7}  {}", c.kind.collection(), format_number(c.count), bar),
            )?;
        }
        close_box(f)
    }

    fn fmt_elements(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        open_box(f, "Elements")?;
        if self.elements.is_empty() {
            row(f, "  No elements.")?;
        }
        for e in &self.elements {
            row(f, &format!("  [{}] {}", e.kind, truncate_label(&e.name, 40)))?;
            if let Some(native) = &e.native_coordinate_system {
                row(f, &format!("      native: {} ({})", truncate_label(native, 24), e.axes.join(",")))?;
            }
            if let (Some(shape), Some(dtype)) = (&e.shape, &e.dtype) {
                let levels = e.levels.unwrap_or(1);
                row(f, &format!("      shape: {:?} {} ({} levels)", shape, dtype, levels))?;
            }
            if !e.annotates.is_empty() {
                row(f, &format!("      annotates: {}", e.annotates.join(", ")))?;
            }
            if e.transformations.is_empty() {
                if !e.targets.is_empty() {
                    row(f, &format!("      -> {}", e.targets.join(", ")))?;
                }
            } else {
                for (target, t) in &e.transformations {
                    row(f, &format!("      -> {}: {}", target, t))?;
                }
            }
            row(f, &format!("      data: {}", e.load_state))?;
        }
        close_box(f)
    }

    fn fmt_coordinate_systems(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        open_box(f, &format!("Coordinate Systems ({})", self.coordinate_systems.len()))?;
        if self.coordinate_systems.is_empty() {
            row(f, "  No coordinate systems.")?;
        }
        for cs in &self.coordinate_systems {
            row(f, &format!("  {} ({})", truncate_label(&cs.name, 32), cs.axes.join(",")))?;
            row(f, &format!("      {} element(s): {}", cs.elements.len(), cs.elements.join(", ")))?;
        }
        close_box(f)
    }
}

fn open_box(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
    let fill = BOX_WIDTH.saturating_sub(title.chars().count() + 3);
    writeln!(f, "┌─ {} {}┐", title, "─".repeat(fill))?;
    row(f, "")
}

fn close_box(f: &mut fmt::Formatter<'_>) -> fmt::Result {
    row(f, "")?;
    writeln!(f, "└{}┘", "─".repeat(BOX_WIDTH))
}

/// Writes one boxed line. Content wider than the box is not truncated.
fn row(f: &mut fmt::Formatter<'_>, content: &str) -> fmt::Result {
    let padding = BOX_WIDTH.saturating_sub(content.chars().count() + 1);
    writeln!(f, "│ {}{}│", content, " ".repeat(padding))
}

/// Format a number with thousands separators.
fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Render a horizontal bar using Unicode block characters.
fn render_bar(count: usize, max_count: usize, width: usize) -> String {
    if max_count == 0 || width == 0 {
        return "░".repeat(width);
    }
    let filled = ((count * width) / max_count).min(width);
    "█".repeat(filled) + &"░".repeat(width - filled)
}

/// Truncate a name to fit in the display column.
fn truncate_label(label: &str, max_len: usize) -> String {
    if label.chars().count() <= max_len {
        label.to_string()
    } else {
        let kept: String = label.chars().take(max_len - 1).collect();
        format!("{}…", kept)
    }
}
