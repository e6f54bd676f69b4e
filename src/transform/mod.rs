//! Coordinate transformation algebra.
//!
//! A [`Transformation`] maps coordinates expressed along named input axes to
//! coordinates along named output axes. Axes a transformation does not
//! mention pass through unchanged, so a 2D `Scale` over `(x, y)` can be
//! applied to a `(c, y, x)` raster without touching the channel axis.
//!
//! # Laws
//!
//! - `compose(Identity, t)` and `compose(t, Identity)` behave like `t`.
//! - `apply(invert(t), apply(t, p)) == p` for every invertible `t`.
//! - `compose` is associative up to floating-point tolerance.
//!
//! # Example
//!
//! ```
//! use spatialdata::transform::{compose, Transformation};
//!
//! let scale = Transformation::scale(&["x", "y"], &[2.0, 2.0]).unwrap();
//! let shift = Transformation::translation(&["x"], &[10.0]).unwrap();
//! let both = compose(&scale, &shift).unwrap();
//! let axes = vec!["x".to_string(), "y".to_string()];
//! let p = both.apply_point(&axes, &[1.0, 1.0]).unwrap();
//! assert_eq!(p.as_slice(), &[12.0, 2.0]);
//! ```

pub mod axes;
mod matrix;

pub use axes::{
    axis_names, sort_canonical, spatial_axes, validate_axis_names, Axis, AxisKind,
    CoordinateSystem, CANONICAL_ORDER,
};
pub use matrix::{AffineMatrix, Coords};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SpatialDataError};

/// Default absolute tolerance for numeric comparisons of transformations.
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

/// One `output <- input` entry of a [`Transformation::MapAxis`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisMapping {
    pub output: String,
    pub input: String,
}

/// A spatial transformation between named axis frames.
///
/// Serialized as `{"type": ..., "params": ...}` so the on-disk metadata
/// stays readable and forward compatible.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum Transformation {
    /// Leaves every coordinate unchanged.
    Identity,

    /// Routes input axes to output axes (`output <- input`). Axes neither
    /// read nor written pass through.
    MapAxis { map: Vec<AxisMapping> },

    /// Adds an offset per axis.
    Translation { axes: Vec<String>, vector: Vec<f64> },

    /// Multiplies each axis by a factor.
    Scale { axes: Vec<String>, vector: Vec<f64> },

    /// A homogeneous affine matrix from `input_axes` to `output_axes`.
    Affine {
        matrix: AffineMatrix,
        input_axes: Vec<String>,
        output_axes: Vec<String>,
    },

    /// Transformations applied in order.
    Sequence(Vec<Transformation>),

    /// Independent transformations over disjoint axis subsets.
    ByDimension(Vec<Transformation>),
}

impl Transformation {
    /// Creates a scale over the named axes.
    pub fn scale(axes: &[&str], factors: &[f64]) -> Result<Self> {
        let axes = axis_names(axes);
        check_vector("scale", &axes, factors)?;
        Ok(Transformation::Scale {
            axes,
            vector: factors.to_vec(),
        })
    }

    /// Creates a translation over the named axes.
    pub fn translation(axes: &[&str], offsets: &[f64]) -> Result<Self> {
        let axes = axis_names(axes);
        check_vector("translation", &axes, offsets)?;
        Ok(Transformation::Translation {
            axes,
            vector: offsets.to_vec(),
        })
    }

    /// Creates an affine transformation from homogeneous rows.
    ///
    /// `rows` must have `output_axes.len() + 1` rows of
    /// `input_axes.len() + 1` columns with a `[0, ..., 0, 1]` last row.
    pub fn affine(rows: Vec<Vec<f64>>, input_axes: &[&str], output_axes: &[&str]) -> Result<Self> {
        let input_axes = axis_names(input_axes);
        let output_axes = axis_names(output_axes);
        validate_axis_names("affine input axes", &input_axes)?;
        validate_axis_names("affine output axes", &output_axes)?;
        let found = vec![format!("{}x{}", rows.len(), rows.first().map_or(0, Vec::len))];
        let matrix = AffineMatrix::from_rows(rows)
            .filter(|m| m.n_in() == input_axes.len() && m.n_out() == output_axes.len())
            .ok_or_else(|| {
                SpatialDataError::axis_mismatch(
                    "affine matrix shape",
                    &[format!("{}x{}", output_axes.len() + 1, input_axes.len() + 1)],
                    &found,
                )
            })?;
        Ok(Transformation::Affine {
            matrix,
            input_axes,
            output_axes,
        })
    }

    /// Creates an axis map from `(output, input)` pairs.
    pub fn map_axis(pairs: &[(&str, &str)]) -> Result<Self> {
        let outputs: Vec<String> = pairs.iter().map(|(o, _)| o.to_string()).collect();
        validate_axis_names("map_axis outputs", &outputs)?;
        for (_, input) in pairs {
            if AxisKind::from_name(input).is_none() {
                return Err(SpatialDataError::axis_mismatch(
                    "map_axis inputs",
                    &CANONICAL_ORDER.map(String::from),
                    &[input.to_string()],
                ));
            }
        }
        Ok(Transformation::MapAxis {
            map: pairs
                .iter()
                .map(|(o, i)| AxisMapping {
                    output: o.to_string(),
                    input: i.to_string(),
                })
                .collect(),
        })
    }

    /// Creates a sequence, flattening nested sequences and dropping identities.
    pub fn sequence(parts: Vec<Transformation>) -> Self {
        let mut flat = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Transformation::Identity => {}
                Transformation::Sequence(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Transformation::Identity,
            1 => flat.remove(0),
            _ => Transformation::Sequence(flat),
        }
    }

    /// Creates a by-dimension transformation from parts over disjoint axes.
    pub fn by_dimension(parts: Vec<Transformation>) -> Result<Self> {
        let mut seen: Vec<String> = Vec::new();
        for part in &parts {
            let inputs = part.input_axes().ok_or_else(|| {
                SpatialDataError::axis_mismatch(
                    "by_dimension part",
                    &["explicit input axes".to_string()],
                    &[part.type_name().to_string()],
                )
            })?;
            if let Some(dup) = inputs.iter().find(|a| seen.contains(a)) {
                return Err(SpatialDataError::axis_mismatch(
                    "by_dimension parts must be disjoint",
                    &seen,
                    &[dup.clone()],
                ));
            }
            seen.extend(inputs);
        }
        Ok(Transformation::ByDimension(parts))
    }

    /// Checks internal consistency of a transformation built without the
    /// validating constructors, e.g. one read back from a store.
    pub fn check(&self) -> Result<()> {
        match self {
            Transformation::Identity => Ok(()),
            Transformation::MapAxis { map } => {
                let outputs: Vec<String> = map.iter().map(|m| m.output.clone()).collect();
                let inputs: Vec<String> = map.iter().map(|m| m.input.clone()).collect();
                validate_axis_names("map_axis outputs", &outputs)?;
                for input in &inputs {
                    if AxisKind::from_name(input).is_none() {
                        return Err(SpatialDataError::axis_mismatch(
                            "map_axis inputs",
                            &CANONICAL_ORDER.map(String::from),
                            &inputs,
                        ));
                    }
                }
                Ok(())
            }
            Transformation::Translation { axes, vector } => check_vector("translation", axes, vector),
            Transformation::Scale { axes, vector } => check_vector("scale", axes, vector),
            Transformation::Affine {
                matrix,
                input_axes,
                output_axes,
            } => {
                validate_axis_names("affine input axes", input_axes)?;
                validate_axis_names("affine output axes", output_axes)?;
                let rows = matrix.rows().to_vec();
                let shape_ok = AffineMatrix::from_rows(rows)
                    .is_some_and(|m| m.n_in() == input_axes.len() && m.n_out() == output_axes.len());
                if shape_ok {
                    Ok(())
                } else {
                    Err(SpatialDataError::axis_mismatch(
                        "affine matrix shape",
                        &[format!("{}x{}", output_axes.len() + 1, input_axes.len() + 1)],
                        &[format!("{} rows", matrix.rows().len())],
                    ))
                }
            }
            Transformation::Sequence(parts) => parts.iter().try_for_each(Transformation::check),
            Transformation::ByDimension(parts) => {
                parts.iter().try_for_each(Transformation::check)?;
                Transformation::by_dimension(parts.clone()).map(|_| ())
            }
        }
    }

    /// Stable lowercase name of the variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Transformation::Identity => "identity",
            Transformation::MapAxis { .. } => "map_axis",
            Transformation::Translation { .. } => "translation",
            Transformation::Scale { .. } => "scale",
            Transformation::Affine { .. } => "affine",
            Transformation::Sequence(_) => "sequence",
            Transformation::ByDimension(_) => "by_dimension",
        }
    }

    /// Declared input axes, or `None` if the transformation accepts any axes.
    pub fn input_axes(&self) -> Option<Vec<String>> {
        match self {
            Transformation::Identity => None,
            Transformation::MapAxis { map } => {
                let mut inputs: Vec<String> = Vec::new();
                for m in map {
                    if !inputs.contains(&m.input) {
                        inputs.push(m.input.clone());
                    }
                }
                Some(inputs)
            }
            Transformation::Translation { axes, .. } | Transformation::Scale { axes, .. } => {
                Some(axes.clone())
            }
            Transformation::Affine { input_axes, .. } => Some(input_axes.clone()),
            Transformation::Sequence(parts) => parts.iter().find_map(|p| p.input_axes()),
            Transformation::ByDimension(parts) => Some(
                parts
                    .iter()
                    .filter_map(|p| p.input_axes())
                    .flatten()
                    .collect(),
            ),
        }
    }

    /// Declared output axes, or `None` if the transformation produces
    /// whatever it is given.
    pub fn output_axes(&self) -> Option<Vec<String>> {
        match self {
            Transformation::Identity => None,
            Transformation::MapAxis { map } => Some(map.iter().map(|m| m.output.clone()).collect()),
            Transformation::Translation { axes, .. } | Transformation::Scale { axes, .. } => {
                Some(axes.clone())
            }
            Transformation::Affine { output_axes, .. } => Some(output_axes.clone()),
            Transformation::Sequence(parts) => parts.iter().rev().find_map(|p| p.output_axes()),
            Transformation::ByDimension(parts) => Some(
                parts
                    .iter()
                    .filter_map(|p| p.output_axes())
                    .flatten()
                    .collect(),
            ),
        }
    }

    /// Axes consumed without being written back. Data along them is lost.
    pub fn dropped_axes(&self) -> Vec<String> {
        match self {
            Transformation::Affine {
                input_axes,
                output_axes,
                ..
            } => input_axes
                .iter()
                .filter(|a| !output_axes.contains(a))
                .cloned()
                .collect(),
            Transformation::MapAxis { map } => {
                let mut dropped = Vec::new();
                for m in map {
                    if !map.iter().any(|o| o.output == m.input) && !dropped.contains(&m.input) {
                        dropped.push(m.input.clone());
                    }
                }
                dropped
            }
            Transformation::Sequence(parts) => {
                let mut dropped: Vec<String> = Vec::new();
                for part in parts {
                    if let Some(outputs) = part.output_axes() {
                        dropped.retain(|a| !outputs.contains(a));
                    }
                    for a in part.dropped_axes() {
                        if !dropped.contains(&a) {
                            dropped.push(a);
                        }
                    }
                }
                dropped
            }
            Transformation::ByDimension(parts) => {
                parts.iter().flat_map(|p| p.dropped_axes()).collect()
            }
            Transformation::Identity
            | Transformation::Translation { .. }
            | Transformation::Scale { .. } => Vec::new(),
        }
    }

    /// Infers the axes produced when applied to data along `input`.
    ///
    /// # Errors
    /// `AxisMismatch` if the transformation reads axes `input` lacks.
    pub fn infer_output_axes(&self, input: &[String]) -> Result<Vec<String>> {
        self.natural_matrix(input).map(|(_, axes)| axes)
    }

    /// Returns the homogeneous matrix mapping `input_axes` to `output_axes`.
    ///
    /// Output axes the transformation does not produce get zero rows; input
    /// axes it does not mention pass through.
    pub fn to_affine_matrix(&self, input_axes: &[String], output_axes: &[String]) -> Result<AffineMatrix> {
        let (natural, produced) = self.natural_matrix(input_axes)?;
        Ok(selection_matrix(&produced, output_axes).matmul(&natural))
    }

    /// Applies the transformation to a single point along `axes`.
    pub fn apply_point(&self, axes: &[String], point: &[f64]) -> Result<Coords> {
        if point.len() != axes.len() {
            return Err(SpatialDataError::axis_mismatch(
                "point dimensionality",
                axes,
                &[format!("{} coordinates", point.len())],
            ));
        }
        let (m, _) = self.natural_matrix(axes)?;
        Ok(m.apply(point))
    }

    /// Applies the transformation to many points along `axes`, returning the
    /// output axes and transformed points.
    pub fn apply(&self, axes: &[String], points: &[Coords]) -> Result<(Vec<String>, Vec<Coords>)> {
        let (m, out_axes) = self.natural_matrix(axes)?;
        let mut out = Vec::with_capacity(points.len());
        for p in points {
            if p.len() != axes.len() {
                return Err(SpatialDataError::axis_mismatch(
                    "point dimensionality",
                    axes,
                    &[format!("{} coordinates", p.len())],
                ));
            }
            out.push(m.apply(p));
        }
        Ok((out_axes, out))
    }

    /// Returns the inverse transformation.
    pub fn inverse(&self) -> Result<Transformation> {
        invert(self)
    }

    /// Returns true if [`invert`] would succeed.
    pub fn is_invertible(&self) -> bool {
        invert(self).is_ok()
    }

    /// Compares two transformations by their effect on `axes`.
    pub fn approx_eq_on(&self, other: &Transformation, axes: &[String], tolerance: f64) -> Result<bool> {
        let (a, a_axes) = self.natural_matrix(axes)?;
        let (b, b_axes) = other.natural_matrix(axes)?;
        let mut sa = a_axes.clone();
        let mut sb = b_axes.clone();
        sa.sort();
        sb.sort();
        if sa != sb {
            return Ok(false);
        }
        let b = selection_matrix(&b_axes, &a_axes).matmul(&b);
        Ok(a.approx_eq(&b, tolerance))
    }

    /// Computes the matrix from `input` to the axes this transformation
    /// naturally produces, together with those axes.
    fn natural_matrix(&self, input: &[String]) -> Result<(AffineMatrix, Vec<String>)> {
        let n = input.len();
        match self {
            Transformation::Identity => Ok((AffineMatrix::identity(n), input.to_vec())),
            Transformation::Scale { axes, vector } | Transformation::Translation { axes, vector } => {
                let is_scale = matches!(self, Transformation::Scale { .. });
                if !axes.is_empty() && !axes.iter().any(|a| input.contains(a)) {
                    return Err(SpatialDataError::axis_mismatch(
                        format!("{} input axes", self.type_name()),
                        axes,
                        input,
                    ));
                }
                let mut m = AffineMatrix::identity(n);
                for (axis, v) in axes.iter().zip(vector) {
                    if let Some(i) = position(input, axis) {
                        if is_scale {
                            m.set(i, i, *v);
                        } else {
                            m.set(i, n, *v);
                        }
                    }
                }
                Ok((m, input.to_vec()))
            }
            Transformation::MapAxis { map } => {
                let inputs = self.input_axes().unwrap_or_default();
                require_subset("map_axis input axes", &inputs, input)?;
                let mut produced: Vec<String> = input
                    .iter()
                    .filter(|a| {
                        !map.iter().any(|m| &m.output == *a) && !map.iter().any(|m| &m.input == *a)
                    })
                    .cloned()
                    .collect();
                produced.extend(map.iter().map(|m| m.output.clone()));
                sort_canonical(&mut produced);
                let mut m = AffineMatrix::zeros(produced.len(), n);
                for (row, axis) in produced.iter().enumerate() {
                    let source = map
                        .iter()
                        .find(|m| &m.output == axis)
                        .map_or(axis, |m| &m.input);
                    if let Some(col) = position(input, source) {
                        m.set(row, col, 1.0);
                    }
                }
                Ok((m, produced))
            }
            Transformation::Affine {
                matrix,
                input_axes,
                output_axes,
            } => {
                require_subset("affine input axes", input_axes, input)?;
                let mut produced: Vec<String> = input
                    .iter()
                    .filter(|a| !input_axes.contains(a) && !output_axes.contains(a))
                    .cloned()
                    .collect();
                produced.extend(output_axes.iter().cloned());
                sort_canonical(&mut produced);
                let k = input_axes.len();
                let mut m = AffineMatrix::zeros(produced.len(), n);
                for (row, axis) in produced.iter().enumerate() {
                    if let Some(r) = position(output_axes, axis) {
                        for (j, src) in input_axes.iter().enumerate() {
                            if let Some(col) = position(input, src) {
                                m.set(row, col, matrix.get(r, j));
                            }
                        }
                        m.set(row, n, matrix.get(r, k));
                    } else if let Some(col) = position(input, axis) {
                        m.set(row, col, 1.0);
                    }
                }
                Ok((m, produced))
            }
            Transformation::Sequence(parts) => {
                let mut current = input.to_vec();
                let mut acc = AffineMatrix::identity(n);
                for part in parts {
                    let (m, next) = part.natural_matrix(&current)?;
                    acc = m.matmul(&acc);
                    current = next;
                }
                Ok((acc, current))
            }
            Transformation::ByDimension(parts) => {
                let declared = self.input_axes().unwrap_or_default();
                require_subset("by_dimension input axes", &declared, input)?;
                let mut produced: Vec<String> = input
                    .iter()
                    .filter(|a| !declared.contains(a))
                    .cloned()
                    .collect();
                let mut part_results = Vec::with_capacity(parts.len());
                for part in parts {
                    let part_inputs = part.input_axes().unwrap_or_default();
                    let (pm, pout) = part.natural_matrix(&part_inputs)?;
                    for a in &pout {
                        if produced.contains(a) {
                            return Err(SpatialDataError::axis_mismatch(
                                "by_dimension outputs must be disjoint",
                                &produced,
                                &pout,
                            ));
                        }
                    }
                    produced.extend(pout.iter().cloned());
                    part_results.push((part_inputs, pm, pout));
                }
                sort_canonical(&mut produced);
                let mut m = AffineMatrix::zeros(produced.len(), n);
                for (row, axis) in produced.iter().enumerate() {
                    let owner = part_results.iter().find(|(_, _, pout)| pout.contains(axis));
                    match owner {
                        Some((part_inputs, pm, pout)) => {
                            let r = position(pout, axis).unwrap_or(0);
                            for (j, src) in part_inputs.iter().enumerate() {
                                if let Some(col) = position(input, src) {
                                    m.set(row, col, pm.get(r, j));
                                }
                            }
                            m.set(row, n, pm.get(r, part_inputs.len()));
                        }
                        None => {
                            if let Some(col) = position(input, axis) {
                                m.set(row, col, 1.0);
                            }
                        }
                    }
                }
                Ok((m, produced))
            }
        }
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transformation::Identity => write!(f, "Identity"),
            Transformation::MapAxis { map } => {
                let pairs: Vec<String> = map.iter().map(|m| format!("{}<-{}", m.output, m.input)).collect();
                write!(f, "MapAxis({})", pairs.join(", "))
            }
            Transformation::Translation { axes, vector } => {
                write!(f, "Translation({})", describe_vector(axes, vector))
            }
            Transformation::Scale { axes, vector } => {
                write!(f, "Scale({})", describe_vector(axes, vector))
            }
            Transformation::Affine {
                input_axes,
                output_axes,
                ..
            } => write!(f, "Affine({} -> {})", input_axes.join(","), output_axes.join(",")),
            Transformation::Sequence(parts) => {
                let inner: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "Sequence[{}]", inner.join(", "))
            }
            Transformation::ByDimension(parts) => {
                let inner: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "ByDimension[{}]", inner.join(", "))
            }
        }
    }
}

/// Composes `a` followed by `b`.
///
/// # Errors
/// `AxisMismatch` if `b` reads an axis that `a` drops.
pub fn compose(a: &Transformation, b: &Transformation) -> Result<Transformation> {
    if let Some(b_inputs) = b.input_axes() {
        let dropped = a.dropped_axes();
        let missing: Vec<String> = b_inputs
            .iter()
            .filter(|x| dropped.contains(x))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(SpatialDataError::axis_mismatch(
                format!("composing {} with {}", a.type_name(), b.type_name()),
                &b_inputs,
                &a.output_axes().unwrap_or_default(),
            ));
        }
    }

    let composed = match (a, b) {
        (Transformation::Identity, other) | (other, Transformation::Identity) => other.clone(),
        (
            Transformation::Scale { axes: ax, vector: va },
            Transformation::Scale { axes: bx, vector: vb },
        ) if ax == bx => Transformation::Scale {
            axes: ax.clone(),
            vector: va.iter().zip(vb).map(|(x, y)| x * y).collect(),
        },
        (
            Transformation::Translation { axes: ax, vector: va },
            Transformation::Translation { axes: bx, vector: vb },
        ) if ax == bx => Transformation::Translation {
            axes: ax.clone(),
            vector: va.iter().zip(vb).map(|(x, y)| x + y).collect(),
        },
        (
            Transformation::Affine {
                matrix: ma,
                input_axes: a_in,
                output_axes: a_out,
            },
            Transformation::Affine {
                input_axes: b_in,
                output_axes: b_out,
                ..
            },
        ) if same_set(a_out, b_in) => {
            let mb = b.to_affine_matrix(a_out, b_out)?;
            Transformation::Affine {
                matrix: mb.matmul(ma),
                input_axes: a_in.clone(),
                output_axes: b_out.clone(),
            }
        }
        _ => Transformation::sequence(vec![a.clone(), b.clone()]),
    };
    Ok(composed)
}

/// Returns the inverse of `t`.
///
/// # Errors
/// `NotInvertible` for zero scale factors, singular or non-square affine
/// matrices, and maps that drop or duplicate axes.
pub fn invert(t: &Transformation) -> Result<Transformation> {
    let not_invertible = |reason: &str| SpatialDataError::NotInvertible {
        transformation: t.to_string(),
        reason: reason.to_string(),
    };
    match t {
        Transformation::Identity => Ok(Transformation::Identity),
        Transformation::MapAxis { map } => {
            let mut outputs: Vec<&str> = map.iter().map(|m| m.output.as_str()).collect();
            let mut inputs: Vec<&str> = map.iter().map(|m| m.input.as_str()).collect();
            outputs.sort_unstable();
            inputs.sort_unstable();
            let unique = inputs.windows(2).all(|w| w[0] != w[1]);
            if !unique || outputs != inputs {
                return Err(not_invertible("axis map drops or duplicates axes"));
            }
            Ok(Transformation::MapAxis {
                map: map
                    .iter()
                    .map(|m| AxisMapping {
                        output: m.input.clone(),
                        input: m.output.clone(),
                    })
                    .collect(),
            })
        }
        Transformation::Translation { axes, vector } => Ok(Transformation::Translation {
            axes: axes.clone(),
            vector: vector.iter().map(|v| -v).collect(),
        }),
        Transformation::Scale { axes, vector } => {
            if vector.iter().any(|v| *v == 0.0 || !v.is_finite()) {
                return Err(not_invertible("zero or non-finite scale factor"));
            }
            Ok(Transformation::Scale {
                axes: axes.clone(),
                vector: vector.iter().map(|v| 1.0 / v).collect(),
            })
        }
        Transformation::Affine {
            input_axes,
            output_axes,
            ..
        } => {
            if !same_set(input_axes, output_axes) {
                return Err(not_invertible("affine drops or introduces axes"));
            }
            let square = t.to_affine_matrix(input_axes, input_axes)?;
            let inv = square
                .inverse()
                .ok_or_else(|| not_invertible("singular affine matrix"))?;
            Ok(Transformation::Affine {
                matrix: inv,
                input_axes: input_axes.clone(),
                output_axes: input_axes.clone(),
            })
        }
        Transformation::Sequence(parts) => {
            let inverted = parts
                .iter()
                .rev()
                .map(invert)
                .collect::<Result<Vec<_>>>()?;
            Ok(Transformation::Sequence(inverted))
        }
        Transformation::ByDimension(parts) => {
            let inverted = parts.iter().map(invert).collect::<Result<Vec<_>>>()?;
            Ok(Transformation::ByDimension(inverted))
        }
    }
}

/// Builds a matrix that reorders `from` axes into `to` axes, zeroing rows
/// for axes missing from `from`.
fn selection_matrix(from: &[String], to: &[String]) -> AffineMatrix {
    let mut m = AffineMatrix::zeros(to.len(), from.len());
    for (row, axis) in to.iter().enumerate() {
        if let Some(col) = position(from, axis) {
            m.set(row, col, 1.0);
        }
    }
    m
}

fn position(axes: &[String], axis: &str) -> Option<usize> {
    axes.iter().position(|a| a == axis)
}

fn same_set(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x))
}

fn require_subset(context: &str, required: &[String], available: &[String]) -> Result<()> {
    if required.iter().all(|a| available.contains(a)) {
        Ok(())
    } else {
        Err(SpatialDataError::axis_mismatch(context, required, available))
    }
}

fn check_vector(kind: &str, axes: &[String], values: &[f64]) -> Result<()> {
    validate_axis_names(&format!("{} axes", kind), axes)?;
    if axes.len() != values.len() {
        return Err(SpatialDataError::axis_mismatch(
            format!("{} vector length", kind),
            axes,
            &[format!("{} values", values.len())],
        ));
    }
    Ok(())
}

fn describe_vector(axes: &[String], vector: &[f64]) -> String {
    axes.iter()
        .zip(vector)
        .map(|(a, v)| format!("{}={}", a, v))
        .collect::<Vec<_>>()
        .join(", ")
}
