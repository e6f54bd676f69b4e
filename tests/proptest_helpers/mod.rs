#![allow(dead_code)]

use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

use spatialdata::transform::{axis_names, Coords, Transformation};

/// Tolerance for comparing coordinates after several transformations.
pub const EPS: f64 = 1e-6;

/// Axes every generated transformation acts on.
pub const AXES: [&str; 2] = ["y", "x"];

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

fn factor() -> impl Strategy<Value = f64> {
    prop_oneof![0.1f64..10.0, -10.0f64..-0.1]
}

fn offset() -> impl Strategy<Value = f64> {
    -100.0f64..100.0
}

pub fn arb_scale() -> BoxedStrategy<Transformation> {
    (factor(), factor())
        .prop_map(|(sy, sx)| Transformation::scale(&AXES, &[sy, sx]).expect("valid scale"))
        .boxed()
}

pub fn arb_translation() -> BoxedStrategy<Transformation> {
    (offset(), offset())
        .prop_map(|(ty, tx)| Transformation::translation(&AXES, &[ty, tx]).expect("valid translation"))
        .boxed()
}

/// Affine maps with determinant bounded away from zero.
pub fn arb_affine() -> BoxedStrategy<Transformation> {
    (-5.0f64..5.0, -5.0f64..5.0, -5.0f64..5.0, -5.0f64..5.0, offset(), offset())
        .prop_filter("well-conditioned", |(a, b, c, d, _, _)| (a * d - b * c).abs() > 0.25)
        .prop_map(|(a, b, c, d, ty, tx)| {
            Transformation::affine(
                vec![vec![a, b, ty], vec![c, d, tx], vec![0.0, 0.0, 1.0]],
                &AXES,
                &AXES,
            )
            .expect("valid affine")
        })
        .boxed()
}

/// Any invertible transformation on [`AXES`], including short sequences.
pub fn arb_invertible() -> BoxedStrategy<Transformation> {
    let leaf = prop_oneof![
        Just(Transformation::Identity),
        arb_scale(),
        arb_translation(),
        arb_affine(),
        Just(Transformation::map_axis(&[("y", "x"), ("x", "y")]).expect("valid swap")),
    ];
    prop_oneof![
        3 => leaf.clone(),
        1 => proptest::collection::vec(leaf, 2..=3).prop_map(Transformation::sequence),
    ]
    .boxed()
}

pub fn arb_points(max: usize) -> BoxedStrategy<Vec<Coords>> {
    proptest::collection::vec((offset(), offset()), 1..=max)
        .prop_map(|rows| rows.into_iter().map(|(y, x)| Coords::from_slice(&[y, x])).collect())
        .boxed()
}

/// Applies `t` to points on [`AXES`] and returns them reordered to [`AXES`].
pub fn apply_on_axes(t: &Transformation, points: &[Coords]) -> Result<Vec<Coords>, String> {
    let axes = axis_names(&AXES);
    let (out_axes, out) = t.apply(&axes, points).map_err(|e| e.to_string())?;
    let order: Vec<usize> = axes
        .iter()
        .map(|a| {
            out_axes
                .iter()
                .position(|o| o == a)
                .ok_or_else(|| format!("axis {} missing from output {:?}", a, out_axes))
        })
        .collect::<Result<_, _>>()?;
    Ok(out
        .into_iter()
        .map(|p| order.iter().map(|&i| p[i]).collect())
        .collect())
}

/// Compares point sets with a tolerance scaled by magnitude.
pub fn assert_points_close(left: &[Coords], right: &[Coords], eps: f64) -> Result<(), String> {
    if left.len() != right.len() {
        return Err(format!("point count mismatch: left={} right={}", left.len(), right.len()));
    }
    for (i, (a, b)) in left.iter().zip(right).enumerate() {
        if a.len() != b.len() {
            return Err(format!("point {} dimensionality mismatch", i));
        }
        for (x, y) in a.iter().zip(b.iter()) {
            let scale = 1.0 + x.abs().max(y.abs());
            if (x - y).abs() > eps * scale {
                return Err(format!("point {} differs: {:?} vs {:?} (eps={})", i, a, b, eps));
            }
        }
    }
    Ok(())
}
