//! Axis-aligned query boxes over named axes.

use geo::{Coord, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SpatialDataError};
use crate::transform::{axis_names, validate_axis_names};

/// An axis-aligned box with one `[min, max]` interval per named axis.
///
/// Boxes with `min == max` along some axis are allowed; they are
/// degenerate and select nothing.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub axes: Vec<String>,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl BoundingBox {
    /// Creates a box, checking axis names, lengths, finiteness and order.
    pub fn new(axes: &[&str], min: &[f64], max: &[f64]) -> Result<Self> {
        let axes = axis_names(axes);
        validate_axis_names("bounding box axes", &axes)?;
        if min.len() != axes.len() || max.len() != axes.len() {
            return Err(SpatialDataError::axis_mismatch(
                "bounding box bounds",
                &axes,
                &[format!("{} mins, {} maxs", min.len(), max.len())],
            ));
        }
        let bad = min
            .iter()
            .zip(max)
            .any(|(lo, hi)| !lo.is_finite() || !hi.is_finite() || lo > hi);
        if bad {
            return Err(SpatialDataError::InvalidQuery {
                reason: format!("bounding box min {:?} / max {:?} is not finite and ordered", min, max),
            });
        }
        Ok(Self {
            axes,
            min: min.to_vec(),
            max: max.to_vec(),
        })
    }

    /// A 2D box over `(x, y)`.
    pub fn xy(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Result<Self> {
        Self::new(&["x", "y"], &[xmin, ymin], &[xmax, ymax])
    }

    /// Returns true if some extent is zero.
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.min.iter().zip(&self.max).any(|(lo, hi)| hi <= lo)
    }

    /// Interval of `axis`, if the box constrains it.
    pub fn interval(&self, axis: &str) -> Option<(f64, f64)> {
        let i = self.axes.iter().position(|a| a == axis)?;
        Some((self.min[i], self.max[i]))
    }

    /// The `(x, y)` footprint as a geo rectangle.
    pub fn rect_xy(&self) -> Option<Rect<f64>> {
        let (xmin, xmax) = self.interval("x")?;
        let (ymin, ymax) = self.interval("y")?;
        Some(Rect::new(Coord { x: xmin, y: ymin }, Coord { x: xmax, y: ymax }))
    }

    /// Returns true if the point (given along `point_axes`) lies inside
    /// on every constrained axis it has. Bounds are inclusive.
    pub fn contains(&self, point_axes: &[String], point: &[f64]) -> bool {
        self.axes.iter().enumerate().all(|(i, axis)| {
            match point_axes.iter().position(|a| a == axis) {
                Some(j) => point[j] >= self.min[i] && point[j] <= self.max[i],
                None => true,
            }
        })
    }

    /// Returns true if `[lo, hi]` intervals per axis overlap those of the
    /// box, for the axes both mention.
    pub fn overlaps(&self, axes: &[String], lo: &[f64], hi: &[f64]) -> bool {
        self.axes.iter().enumerate().all(|(i, axis)| {
            match axes.iter().position(|a| a == axis) {
                Some(j) => lo[j] <= self.max[i] && hi[j] >= self.min[i],
                None => true,
            }
        })
    }
}

impl fmt::Debug for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundingBox(")?;
        for (i, axis) in self.axes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: [{}, {}]", axis, self.min[i], self.max[i])?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates() {
        assert!(BoundingBox::xy(0.0, 0.0, 1.0, 1.0).is_ok());
        assert!(BoundingBox::xy(1.0, 0.0, 0.0, 1.0).is_err());
        assert!(BoundingBox::xy(f64::NAN, 0.0, 1.0, 1.0).is_err());
        assert!(BoundingBox::new(&["x", "y"], &[0.0], &[1.0, 1.0]).is_err());
        assert!(BoundingBox::new(&["x", "q"], &[0.0, 0.0], &[1.0, 1.0]).is_err());
    }

    #[test]
    fn test_degenerate() {
        assert!(BoundingBox::xy(0.0, 0.0, 0.0, 10.0).unwrap().is_degenerate());
        assert!(!BoundingBox::xy(0.0, 0.0, 1.0, 10.0).unwrap().is_degenerate());
    }

    #[test]
    fn test_contains_ignores_unconstrained_axes() {
        let b = BoundingBox::xy(0.0, 0.0, 10.0, 10.0).unwrap();
        let axes = axis_names(&["z", "y", "x"]);
        assert!(b.contains(&axes, &[100.0, 5.0, 5.0]));
        assert!(!b.contains(&axes, &[0.0, 5.0, 11.0]));
    }

    #[test]
    fn test_rect_xy() {
        let b = BoundingBox::new(&["y", "x"], &[1.0, 2.0], &[3.0, 4.0]).unwrap();
        let r = b.rect_xy().unwrap();
        assert_eq!(r.min(), Coord { x: 2.0, y: 1.0 });
        assert_eq!(r.max(), Coord { x: 4.0, y: 3.0 });
    }

    #[test]
    fn test_debug_format() {
        let b = BoundingBox::xy(0.0, 1.0, 2.0, 3.0).unwrap();
        assert_eq!(format!("{:?}", b), "BoundingBox(x: [0, 2], y: [1, 3])");
    }
}
