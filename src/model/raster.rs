//! Image and label rasters, optionally multiscale.

use std::fmt;
use std::sync::Arc;

use super::TransformationMap;
use crate::array::{ChunkedArray, DType};
use crate::error::{Result, SpatialDataError};
use crate::model::LoadState;
use crate::transform::{axis_names, compose, validate_axis_names, AxisKind, Transformation, CANONICAL_ORDER};

/// Whether a raster holds intensities or integer segmentation labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RasterKind {
    Image,
    Labels,
}

/// One resolution level of a raster pyramid.
#[derive(Clone)]
pub struct RasterLevel {
    data: Arc<dyn ChunkedArray>,
    transformations: TransformationMap,
}

impl RasterLevel {
    pub fn new(data: Arc<dyn ChunkedArray>) -> Self {
        Self {
            data,
            transformations: TransformationMap::new(),
        }
    }

    pub fn with_transformations(data: Arc<dyn ChunkedArray>, transformations: TransformationMap) -> Self {
        Self {
            data,
            transformations,
        }
    }

    pub fn data(&self) -> &Arc<dyn ChunkedArray> {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn transformations(&self) -> &TransformationMap {
        &self.transformations
    }
}

impl fmt::Debug for RasterLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterLevel")
            .field("shape", &self.data.shape())
            .field("dtype", &self.data.dtype())
            .field("transformations", &self.transformations)
            .finish()
    }
}

/// A chunked raster in its native pixel frame.
///
/// Level 0 is the finest resolution; each following level is a downsampled
/// copy of the same content. Every level carries its own transformations,
/// which must agree with level 0 once the level scale factor is applied.
#[derive(Clone, Debug)]
pub struct Raster {
    kind: RasterKind,
    native_coordinate_system: String,
    axes: Vec<String>,
    levels: Vec<RasterLevel>,
}

impl Raster {
    /// A single-level image. Axes must be `[c,] [z,] y, x`.
    pub fn image(
        native_coordinate_system: &str,
        axes: &[&str],
        data: impl ChunkedArray + 'static,
    ) -> Result<Self> {
        Self::from_levels(
            RasterKind::Image,
            native_coordinate_system,
            axis_names(axes),
            vec![RasterLevel::new(Arc::new(data))],
        )
    }

    /// A single-level label raster. Axes must be `[z,] y, x` and the dtype
    /// must be integer.
    pub fn labels(
        native_coordinate_system: &str,
        axes: &[&str],
        data: impl ChunkedArray + 'static,
    ) -> Result<Self> {
        Self::from_levels(
            RasterKind::Labels,
            native_coordinate_system,
            axis_names(axes),
            vec![RasterLevel::new(Arc::new(data))],
        )
    }

    /// A multiscale raster built from arrays ordered finest first.
    pub fn multiscale(
        kind: RasterKind,
        native_coordinate_system: &str,
        axes: &[&str],
        levels: Vec<Arc<dyn ChunkedArray>>,
    ) -> Result<Self> {
        Self::from_levels(
            kind,
            native_coordinate_system,
            axis_names(axes),
            levels.into_iter().map(RasterLevel::new).collect(),
        )
    }

    /// Builds a raster from fully specified levels, checking axes, ranks,
    /// dtypes and that coarser levels do not grow.
    pub fn from_levels(
        kind: RasterKind,
        native_coordinate_system: &str,
        axes: Vec<String>,
        levels: Vec<RasterLevel>,
    ) -> Result<Self> {
        if native_coordinate_system.is_empty() {
            return Err(SpatialDataError::invalid_element(
                "<raster>",
                "native coordinate system name must not be empty",
            ));
        }
        check_raster_axes(kind, &axes)?;
        let Some(first) = levels.first() else {
            return Err(SpatialDataError::invalid_element("<raster>", "raster has no levels"));
        };
        let base_shape = first.shape().to_vec();
        let dtype = first.data.dtype();
        for (i, level) in levels.iter().enumerate() {
            let shape = level.shape();
            if shape.len() != axes.len() {
                return Err(SpatialDataError::axis_mismatch(
                    format!("raster level {} rank", i),
                    &axes,
                    &shape.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                ));
            }
            if level.data.dtype() != dtype {
                return Err(SpatialDataError::invalid_element(
                    "<raster>",
                    format!("level {} has dtype {}, level 0 has {}", i, level.data.dtype(), dtype),
                ));
            }
            for (d, axis) in axes.iter().enumerate() {
                let spatial = AxisKind::from_name(axis) == Some(AxisKind::Space);
                let ok = if spatial {
                    shape[d] <= base_shape[d] && shape[d] > 0
                } else {
                    shape[d] == base_shape[d]
                };
                if !ok {
                    return Err(SpatialDataError::invalid_element(
                        "<raster>",
                        format!(
                            "level {} shape {:?} is not a downsampling of {:?}",
                            i, shape, base_shape
                        ),
                    ));
                }
            }
        }
        if kind == RasterKind::Labels && !dtype.is_integer() {
            return Err(SpatialDataError::invalid_element(
                "<labels>",
                format!("label rasters need an integer dtype, got {}", dtype),
            ));
        }
        Ok(Self {
            kind,
            native_coordinate_system: native_coordinate_system.to_string(),
            axes,
            levels,
        })
    }

    pub fn kind(&self) -> RasterKind {
        self.kind
    }

    pub fn native_coordinate_system(&self) -> &str {
        &self.native_coordinate_system
    }

    pub fn axes(&self) -> &[String] {
        &self.axes
    }

    pub fn levels(&self) -> &[RasterLevel] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&RasterLevel> {
        self.levels.get(index)
    }

    pub fn is_multiscale(&self) -> bool {
        self.levels.len() > 1
    }

    pub fn shape(&self) -> &[usize] {
        self.levels[0].shape()
    }

    pub fn dtype(&self) -> DType {
        self.levels[0].data.dtype()
    }

    /// Load state of the finest level.
    pub fn load_state(&self) -> LoadState {
        self.levels[0].data.load_state()
    }

    /// The element-level transformations (those of level 0).
    pub fn transformations(&self) -> &TransformationMap {
        &self.levels[0].transformations
    }

    /// Scale from the pixel frame of level `index` to the pixel frame of
    /// level 0, over the spatial axes.
    pub fn level_scale(&self, index: usize) -> Result<Transformation> {
        let level = self.levels.get(index).ok_or_else(|| {
            SpatialDataError::invalid_element("<raster>", format!("no level {}", index))
        })?;
        if index == 0 {
            return Ok(Transformation::Identity);
        }
        let base = self.shape();
        let mut axes = Vec::new();
        let mut factors = Vec::new();
        for (d, axis) in self.axes.iter().enumerate() {
            if AxisKind::from_name(axis) == Some(AxisKind::Space) {
                axes.push(axis.as_str());
                factors.push(base[d] as f64 / level.shape()[d] as f64);
            }
        }
        Transformation::scale(&axes, &factors)
    }

    /// Adds or replaces the transformation to `target` on every level,
    /// composing the level scale factor in front of it.
    pub fn add_transformation(&mut self, target: &str, t: Transformation) -> Result<()> {
        t.check()?;
        t.infer_output_axes(&self.axes)?;
        let mut per_level = Vec::with_capacity(self.levels.len());
        for i in 0..self.levels.len() {
            per_level.push(compose(&self.level_scale(i)?, &t)?);
        }
        for (level, t) in self.levels.iter_mut().zip(per_level) {
            level.transformations.insert(target, t);
        }
        Ok(())
    }

    /// Sets the transformation of one level only.
    pub fn set_level_transformation(&mut self, index: usize, target: &str, t: Transformation) -> Result<()> {
        t.check()?;
        t.infer_output_axes(&self.axes)?;
        let level = self.levels.get_mut(index).ok_or_else(|| {
            SpatialDataError::invalid_element("<raster>", format!("no level {}", index))
        })?;
        level.transformations.insert(target, t);
        Ok(())
    }

    pub fn remove_transformation(&mut self, target: &str) -> Option<Transformation> {
        let mut removed = None;
        for (i, level) in self.levels.iter_mut().enumerate() {
            let t = level.transformations.remove(target);
            if i == 0 {
                removed = t;
            }
        }
        removed
    }

    pub fn remove_all_transformations(&mut self) {
        for level in &mut self.levels {
            level.transformations.clear();
        }
    }

    /// Returns a description of every level whose transformations disagree
    /// with level 0 composed with the level scale.
    pub fn multiscale_inconsistencies(&self, tolerance: f64) -> Vec<String> {
        let mut problems = Vec::new();
        for (i, level) in self.levels.iter().enumerate().skip(1) {
            let scale = match self.level_scale(i) {
                Ok(s) => s,
                Err(e) => {
                    problems.push(format!("level {}: {}", i, e));
                    continue;
                }
            };
            for (target, t0) in self.transformations().iter() {
                let Some(ti) = level.transformations.get(target) else {
                    problems.push(format!("level {} has no transformation to '{}'", i, target));
                    continue;
                };
                let agrees = compose(&scale, t0)
                    .and_then(|expected| expected.approx_eq_on(ti, &self.axes, tolerance));
                match agrees {
                    Ok(true) => {}
                    Ok(false) => problems.push(format!(
                        "level {} transformation to '{}' disagrees with level 0 by more than {}",
                        i, target, tolerance
                    )),
                    Err(e) => problems.push(format!("level {} to '{}': {}", i, target, e)),
                }
            }
            for (target, _) in level.transformations.iter() {
                if self.transformations().get(target).is_none() {
                    problems.push(format!(
                        "level {} maps to '{}' but level 0 does not",
                        i, target
                    ));
                }
            }
        }
        problems
    }

    /// Same metadata, new pixel data.
    pub(crate) fn with_levels(&self, levels: Vec<RasterLevel>) -> Result<Self> {
        Self::from_levels(self.kind, &self.native_coordinate_system, self.axes.clone(), levels)
    }
}

fn check_raster_axes(kind: RasterKind, axes: &[String]) -> Result<()> {
    validate_axis_names("raster axes", axes)?;
    let allowed: &[&str] = match kind {
        RasterKind::Image => &["c", "z", "y", "x"],
        RasterKind::Labels => &["z", "y", "x"],
    };
    let in_order = axes
        .windows(2)
        .all(|w| canonical_rank(&w[0]) < canonical_rank(&w[1]));
    let ends_yx = axes.len() >= 2 && axes[axes.len() - 2] == "y" && axes[axes.len() - 1] == "x";
    if !in_order || !ends_yx || axes.iter().any(|a| !allowed.contains(&a.as_str())) {
        return Err(SpatialDataError::axis_mismatch(
            match kind {
                RasterKind::Image => "image axes",
                RasterKind::Labels => "labels axes",
            },
            &axis_names(allowed),
            axes,
        ));
    }
    Ok(())
}

fn canonical_rank(axis: &str) -> usize {
    CANONICAL_ORDER
        .iter()
        .position(|c| *c == axis)
        .unwrap_or(CANONICAL_ORDER.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{ArrayBuffer, InMemoryArray, NdArray};

    fn array(shape: Vec<usize>, dtype: DType) -> Arc<dyn ChunkedArray> {
        Arc::new(InMemoryArray::new(NdArray::zeros(shape, dtype)))
    }

    fn pyramid() -> Raster {
        Raster::multiscale(
            RasterKind::Image,
            "pixels",
            &["c", "y", "x"],
            vec![
                array(vec![3, 64, 64], DType::U8),
                array(vec![3, 32, 32], DType::U8),
                array(vec![3, 16, 16], DType::U8),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_axes_and_rank_validated() {
        let data = InMemoryArray::new(NdArray::zeros(vec![4, 4], DType::U8));
        assert!(Raster::image("pixels", &["y", "x"], data.clone()).is_ok());
        assert!(Raster::image("pixels", &["x", "y"], data.clone()).is_err());
        assert!(Raster::image("pixels", &["c", "y", "x"], data.clone()).is_err());
        assert!(Raster::labels("pixels", &["c", "y"], data).is_err());
    }

    #[test]
    fn test_labels_need_integer_dtype() {
        let data = InMemoryArray::new(
            NdArray::new(vec![1, 2], ArrayBuffer::F32(vec![0.0, 1.0])).unwrap(),
        );
        assert!(Raster::labels("pixels", &["y", "x"], data).is_err());
    }

    #[test]
    fn test_levels_must_shrink() {
        let result = Raster::multiscale(
            RasterKind::Image,
            "pixels",
            &["y", "x"],
            vec![array(vec![8, 8], DType::U8), array(vec![16, 4], DType::U8)],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_add_transformation_propagates_level_scale() {
        let mut raster = pyramid();
        raster
            .add_transformation("global", Transformation::scale(&["x", "y"], &[0.5, 0.5]).unwrap())
            .unwrap();
        let axes = raster.axes().to_vec();
        let level2 = raster.level(2).unwrap().transformations().get("global").unwrap();
        let p = level2.apply_point(&axes, &[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(p.as_slice(), &[1.0, 2.0, 2.0]);
        assert!(raster.multiscale_inconsistencies(1e-9).is_empty());
    }

    #[test]
    fn test_inconsistent_level_is_reported() {
        let mut raster = pyramid();
        let t = Transformation::scale(&["x", "y"], &[0.5, 0.5]).unwrap();
        raster.add_transformation("global", t.clone()).unwrap();
        raster.set_level_transformation(1, "global", t).unwrap();
        let problems = raster.multiscale_inconsistencies(1e-9);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("level 1"));
    }

    #[test]
    fn test_add_transformation_rejects_unknown_axes() {
        let mut raster = pyramid();
        let t = Transformation::affine(
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            &["z"],
            &["z"],
        )
        .unwrap();
        assert!(raster.add_transformation("global", t).is_err());
        assert!(raster.transformations().is_empty());
    }

    #[test]
    fn test_remove_transformation_clears_all_levels() {
        let mut raster = pyramid();
        raster.add_transformation("global", Transformation::Identity).unwrap();
        assert!(raster.remove_transformation("global").is_some());
        assert!(raster.levels().iter().all(|l| l.transformations().is_empty()));
    }
}
