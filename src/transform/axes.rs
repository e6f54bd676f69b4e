//! Axis semantics and named coordinate systems.
//!
//! Axis names are the currency of the transformation algebra: every
//! transformation declares which named axes it reads and writes, and raster
//! or vector data declares which named axes its dimensions correspond to.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SpatialDataError};

/// Canonical axis ordering used when a transformation has to infer the
/// output axes it produces.
pub const CANONICAL_ORDER: [&str; 5] = ["t", "c", "z", "y", "x"];

/// The semantic kind of an axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisKind {
    Space,
    Channel,
    Time,
}

impl AxisKind {
    /// Returns the kind for one of the standard axis names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "x" | "y" | "z" => Some(AxisKind::Space),
            "c" => Some(AxisKind::Channel),
            "t" => Some(AxisKind::Time),
            _ => None,
        }
    }
}

/// A named axis together with its semantic kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub kind: AxisKind,
}

impl Axis {
    /// Creates an axis from one of the standard names (`x`, `y`, `z`, `c`, `t`).
    pub fn parse(name: &str) -> Result<Self> {
        let kind = AxisKind::from_name(name).ok_or_else(|| {
            SpatialDataError::axis_mismatch(
                "axis name",
                &CANONICAL_ORDER.map(String::from),
                &[name.to_string()],
            )
        })?;
        Ok(Self {
            name: name.to_string(),
            kind,
        })
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A named coordinate frame and the axes it is expressed in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinateSystem {
    pub name: String,
    pub axes: Vec<Axis>,
}

impl CoordinateSystem {
    /// Creates a coordinate system from standard axis names.
    ///
    /// # Errors
    /// Fails with `AxisMismatch` for unknown or repeated axis names and with
    /// `InvalidElement` for an empty name.
    pub fn new(name: impl Into<String>, axes: &[&str]) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(SpatialDataError::invalid_element(
                "<coordinate system>",
                "coordinate system name must not be empty",
            ));
        }
        let names: Vec<String> = axes.iter().map(|a| a.to_string()).collect();
        validate_axis_names("coordinate system axes", &names)?;
        let axes = names
            .iter()
            .map(|a| Axis::parse(a))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { name, axes })
    }

    /// Returns the axis names in order.
    pub fn axis_names(&self) -> Vec<String> {
        self.axes.iter().map(|a| a.name.clone()).collect()
    }

    /// Returns true if the system has an axis with the given name.
    pub fn has_axis(&self, name: &str) -> bool {
        self.axes.iter().any(|a| a.name == name)
    }

    /// Number of spatial axes.
    pub fn spatial_ndim(&self) -> usize {
        self.axes
            .iter()
            .filter(|a| a.kind == AxisKind::Space)
            .count()
    }

    /// Adds any axes from `names` the system does not already have, keeping
    /// canonical order.
    pub(crate) fn merge_axes(&mut self, names: &[String]) -> Result<()> {
        let mut merged = self.axis_names();
        for n in names {
            if !merged.contains(n) {
                merged.push(n.clone());
            }
        }
        sort_canonical(&mut merged);
        self.axes = merged
            .iter()
            .map(|a| Axis::parse(a))
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }
}

impl fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.axis_names().join(", "))
    }
}

/// Checks that every name is a standard axis and that none repeats.
pub fn validate_axis_names(context: &str, names: &[String]) -> Result<()> {
    for (i, name) in names.iter().enumerate() {
        if AxisKind::from_name(name).is_none() || names[..i].contains(name) {
            return Err(SpatialDataError::axis_mismatch(
                context,
                &CANONICAL_ORDER.map(String::from),
                names,
            ));
        }
    }
    Ok(())
}

/// Sorts axis names into canonical `t, c, z, y, x` order.
pub fn sort_canonical(axes: &mut [String]) {
    axes.sort_by_key(|a| {
        CANONICAL_ORDER
            .iter()
            .position(|c| c == a)
            .unwrap_or(CANONICAL_ORDER.len())
    });
}

/// Returns only the spatial axes of `axes`, preserving order.
pub fn spatial_axes(axes: &[String]) -> Vec<String> {
    axes.iter()
        .filter(|a| AxisKind::from_name(a) == Some(AxisKind::Space))
        .cloned()
        .collect()
}

/// Converts a slice of `&str` into owned axis names.
pub fn axis_names(axes: &[&str]) -> Vec<String> {
    axes.iter().map(|a| a.to_string()).collect()
}
