//! Raster resampling and unpadding.

use std::sync::Arc;
use tracing::debug;

use crate::array::{InMemoryArray, NdArray, Region};
use crate::error::{Result, SpatialDataError};
use crate::model::{Raster, RasterLevel, TransformationMap};
use crate::transform::{compose, AxisKind, Transformation};

/// Resamples the finest level of `raster` into an axis-aligned grid in
/// `target`, by nearest neighbour on pixel centres.
///
/// The result has a single level, is native to `"<target>_pixels"` and
/// carries a translation to `target` placing its origin. Samples that fall
/// outside the source are zero.
///
/// # Errors
/// `AxisMismatch` if `t` changes the raster's axis set, `NotInvertible` if
/// it cannot be inverted.
pub fn resample_raster(raster: &Raster, t: &Transformation, target: &str) -> Result<Raster> {
    let axes = raster.axes().to_vec();
    let mut produced = t.infer_output_axes(&axes)?;
    let mut expected = axes.clone();
    produced.sort();
    expected.sort();
    if produced != expected {
        return Err(SpatialDataError::axis_mismatch(
            "resampled raster axes",
            &axes,
            &t.infer_output_axes(&axes)?,
        ));
    }
    let m = t.to_affine_matrix(&axes, &axes)?;
    let inv = m.inverse().ok_or_else(|| SpatialDataError::NotInvertible {
        transformation: t.to_string(),
        reason: "raster resampling needs an invertible transformation".to_string(),
    })?;

    let src = raster.levels()[0].data().read_all()?;
    let shape = src.shape().to_vec();
    let n = shape.len();
    let spatial: Vec<usize> = (0..n).filter(|&d| is_spatial(&axes[d])).collect();

    let mut lo = vec![0.0; n];
    let mut hi = vec![0.0; n];
    for &d in &spatial {
        lo[d] = f64::INFINITY;
        hi[d] = f64::NEG_INFINITY;
    }
    for mask in 0..(1usize << spatial.len()) {
        let mut corner = vec![0.0; n];
        for (bit, &d) in spatial.iter().enumerate() {
            if (mask >> bit) & 1 == 1 {
                corner[d] = shape[d] as f64;
            }
        }
        let q = m.apply(&corner);
        for &d in &spatial {
            lo[d] = lo[d].min(q[d]);
            hi[d] = hi[d].max(q[d]);
        }
    }

    let mut origin = vec![0.0; n];
    let mut out_shape = shape.clone();
    for &d in &spatial {
        origin[d] = lo[d].floor();
        out_shape[d] = ((hi[d].ceil() - origin[d]) as usize).max(1);
    }

    let src_strides = crate::array::strides(&shape);
    let mut dst_idx = Vec::new();
    let mut src_idx = Vec::new();
    let mut pos = vec![0.0; n];
    let mut flat = 0usize;
    visit(&out_shape, |index| {
        for d in 0..n {
            pos[d] = if spatial.contains(&d) {
                origin[d] + index[d] as f64 + 0.5
            } else {
                index[d] as f64
            };
        }
        let s = inv.apply(&pos);
        let mut offset = 0usize;
        let mut inside = true;
        for d in 0..n {
            let v = if spatial.contains(&d) { s[d].floor() } else { s[d].round() };
            if v < 0.0 || v >= shape[d] as f64 {
                inside = false;
                break;
            }
            offset += v as usize * src_strides[d];
        }
        if inside {
            dst_idx.push(flat);
            src_idx.push(offset);
        }
        flat += 1;
    });

    let mut out = NdArray::zeros(out_shape.clone(), src.dtype());
    out.data_mut().scatter_from(&dst_idx, src.data(), &src_idx)?;
    debug!(from = ?shape, to = ?out_shape, target, "resampled raster");

    let native = format!("{}_pixels", target);
    let level = RasterLevel::new(Arc::new(InMemoryArray::new(out)));
    let mut resampled = Raster::from_levels(raster.kind(), &native, axes.clone(), vec![level])?;
    resampled.add_transformation(target, origin_translation(&axes, &spatial, &origin)?)?;
    Ok(resampled)
}

/// Crops away the all-zero border of a raster's finest level.
///
/// The crop offset is folded into every transformation, so cropped pixels
/// land where they did before. Multiscale rasters are reduced to the
/// cropped finest level. An all-zero raster is returned unchanged.
pub fn unpad_raster(raster: &Raster) -> Result<Raster> {
    let axes = raster.axes().to_vec();
    let src = raster.levels()[0].data().read_all()?;
    let shape = src.shape().to_vec();
    let n = shape.len();

    let mut lo = shape.clone();
    let mut hi = vec![0usize; n];
    let mut flat = 0usize;
    let mut any = false;
    visit(&shape, |index| {
        if src.data().get_f64(flat) != 0.0 {
            any = true;
            for d in 0..n {
                lo[d] = lo[d].min(index[d]);
                hi[d] = hi[d].max(index[d] + 1);
            }
        }
        flat += 1;
    });
    if !any {
        return Ok(raster.clone());
    }

    let spatial: Vec<usize> = (0..n).filter(|&d| is_spatial(&axes[d])).collect();
    let region = Region::new(
        (0..n)
            .map(|d| if spatial.contains(&d) { lo[d]..hi[d] } else { 0..shape[d] })
            .collect(),
    );
    let cropped = src.crop(&region)?;
    let origin: Vec<f64> = region.ranges.iter().map(|r| r.start as f64).collect();
    let shift = origin_translation(&axes, &spatial, &origin)?;

    let mut transformations = TransformationMap::new();
    for (target, t) in raster.transformations().iter() {
        transformations.insert(target, compose(&shift, t)?);
    }
    let level = RasterLevel::with_transformations(Arc::new(InMemoryArray::new(cropped)), transformations);
    raster.with_levels(vec![level])
}

pub(super) fn origin_translation(axes: &[String], spatial: &[usize], origin: &[f64]) -> Result<Transformation> {
    let names: Vec<&str> = spatial.iter().map(|&d| axes[d].as_str()).collect();
    let offsets: Vec<f64> = spatial.iter().map(|&d| origin[d]).collect();
    if offsets.iter().all(|o| *o == 0.0) {
        return Ok(Transformation::Identity);
    }
    Transformation::translation(&names, &offsets)
}

pub(super) fn is_spatial(axis: &str) -> bool {
    AxisKind::from_name(axis) == Some(AxisKind::Space)
}

/// Calls `f` with every multi-index of `shape` in C order.
fn visit(shape: &[usize], mut f: impl FnMut(&[usize])) {
    if shape.iter().any(|&s| s == 0) {
        return;
    }
    let mut index = vec![0usize; shape.len()];
    loop {
        f(&index);
        let mut d = shape.len();
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            index[d] += 1;
            if index[d] < shape[d] {
                break;
            }
            index[d] = 0;
        }
    }
}
