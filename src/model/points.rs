//! Point clouds.

use std::sync::Arc;

use super::ids::{sequential_ids, InstanceId};
use super::lazy::{Lazy, LoadState};
use super::table::ColumnarTable;
use super::TransformationMap;
use crate::error::{Result, SpatialDataError};
use crate::transform::{axis_names, spatial_axes, validate_axis_names, Coords, Transformation};

/// Coordinates, ids and per-point attributes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointData {
    /// One row per point, one column per element axis.
    pub coords: Vec<Coords>,
    pub instance_ids: Vec<InstanceId>,
    pub attributes: Option<ColumnarTable>,
}

impl PointData {
    /// Points with sequential ids and no attributes.
    pub fn new(coords: Vec<Coords>) -> Self {
        let instance_ids = sequential_ids(coords.len());
        Self {
            coords,
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
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Checks every row has `ndim` coordinates and ids and attributes line up.
    pub fn check(&self, ndim: usize) -> Result<()> {
        if let Some(bad) = self.coords.iter().position(|c| c.len() != ndim) {
            return Err(SpatialDataError::invalid_element(
                "<points>",
                format!(
                    "point {} has {} coordinates, expected {}",
                    bad,
                    self.coords[bad].len(),
                    ndim
                ),
            ));
        }
        if self.instance_ids.len() != self.coords.len() {
            return Err(SpatialDataError::invalid_element(
                "<points>",
                format!(
                    "{} instance ids for {} points",
                    self.instance_ids.len(),
                    self.coords.len()
                ),
            ));
        }
        if let Some(attrs) = &self.attributes {
            if attrs.n_columns() > 0 && attrs.n_rows() != self.coords.len() {
                return Err(SpatialDataError::invalid_element(
                    "<points>",
                    format!("{} attribute rows for {} points", attrs.n_rows(), self.coords.len()),
                ));
            }
        }
        Ok(())
    }

    /// Keeps the points at `rows`, in order.
    pub fn take(&self, rows: &[usize]) -> PointData {
        PointData {
            coords: rows.iter().map(|&r| self.coords[r].clone()).collect(),
            instance_ids: rows.iter().map(|&r| self.instance_ids[r]).collect(),
            attributes: self
                .attributes
                .as_ref()
                .map(|a| a.filter_rows(&rows.iter().copied().collect())),
        }
    }
}

/// A point cloud element. Axes are a subset of `z, y, x`.
#[derive(Clone, Debug)]
pub struct Points {
    native_coordinate_system: String,
    axes: Vec<String>,
    transformations: TransformationMap,
    data: Lazy<PointData>,
}

impl Points {
    pub fn new(native_coordinate_system: &str, axes: &[&str], data: PointData) -> Result<Self> {
        let axes = axis_names(axes);
        check_vector_axes(native_coordinate_system, &axes)?;
        data.check(axes.len())?;
        Ok(Self {
            native_coordinate_system: native_coordinate_system.to_string(),
            axes,
            transformations: TransformationMap::new(),
            data: Lazy::loaded(data),
        })
    }

    /// Points whose data is loaded on first access.
    pub fn lazy(
        native_coordinate_system: &str,
        axes: Vec<String>,
        transformations: TransformationMap,
        data: Lazy<PointData>,
    ) -> Result<Self> {
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

    pub fn data(&self) -> Result<Arc<PointData>> {
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

    /// Same metadata, new data.
    pub(crate) fn with_data(&self, data: PointData) -> Self {
        Self {
            native_coordinate_system: self.native_coordinate_system.clone(),
            axes: self.axes.clone(),
            transformations: self.transformations.clone(),
            data: Lazy::loaded(data),
        }
    }

    /// New data in another frame, carrying `transformations`.
    pub(crate) fn reframed(
        native_coordinate_system: &str,
        axes: Vec<String>,
        transformations: TransformationMap,
        data: PointData,
    ) -> Self {
        Self {
            native_coordinate_system: native_coordinate_system.to_string(),
            axes,
            transformations,
            data: Lazy::loaded(data),
        }
    }
}

pub(crate) fn check_vector_axes(native_coordinate_system: &str, axes: &[String]) -> Result<()> {
    if native_coordinate_system.is_empty() {
        return Err(SpatialDataError::invalid_element(
            "<vector element>",
            "native coordinate system name must not be empty",
        ));
    }
    validate_axis_names("vector element axes", axes)?;
    if axes.is_empty() || spatial_axes(axes).len() != axes.len() {
        return Err(SpatialDataError::axis_mismatch(
            "vector element axes",
            &axis_names(&["z", "y", "x"]),
            axes,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_points_dimensionality_checked() {
        let data = PointData::new(vec![smallvec![1.0, 2.0], smallvec![3.0]]);
        assert!(Points::new("global", &["x", "y"], data).is_err());
        let ok = PointData::new(vec![smallvec![1.0, 2.0]]);
        assert!(Points::new("global", &["x", "y"], ok).is_ok());
    }

    #[test]
    fn test_points_reject_channel_axis() {
        let data = PointData::new(vec![smallvec![1.0, 2.0]]);
        assert!(Points::new("global", &["c", "x"], data).is_err());
    }

    #[test]
    fn test_take_keeps_ids() {
        let data = PointData::new(vec![smallvec![0.0, 0.0], smallvec![1.0, 1.0], smallvec![2.0, 2.0]]);
        let picked = data.take(&[2, 0]);
        assert_eq!(picked.instance_ids, vec![InstanceId(2), InstanceId(0)]);
        assert_eq!(picked.coords[0].as_slice(), &[2.0, 2.0]);
    }

    #[test]
    fn test_add_transformation_checks_axes() {
        let mut points = Points::new(
            "global",
            &["x", "y"],
            PointData::new(vec![smallvec![1.0, 2.0]]),
        )
        .unwrap();
        let z_only = Transformation::translation(&["z"], &[1.0]).unwrap();
        assert!(points.add_transformation("other", z_only).is_err());
        let xy = Transformation::translation(&["x", "y", "z"], &[1.0, 1.0, 1.0]).unwrap();
        assert!(points.add_transformation("other", xy).is_ok());
    }
}
