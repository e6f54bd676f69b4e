use proptest::prelude::*;
use spatialdata::transform::{axis_names, compose, invert, Transformation};

mod proptest_helpers;

use proptest_helpers::{apply_on_axes, arb_invertible, arb_points, assert_points_close, AXES, EPS};

proptest! {
    #![proptest_config(proptest_helpers::proptest_config())]

    #[test]
    fn identity_is_neutral_on_both_sides(t in arb_invertible(), points in arb_points(8)) {
        let expected = apply_on_axes(&t, &points).map_err(TestCaseError::fail)?;
        let left = compose(&Transformation::Identity, &t).expect("compose identity first");
        let right = compose(&t, &Transformation::Identity).expect("compose identity last");

        let via_left = apply_on_axes(&left, &points).map_err(TestCaseError::fail)?;
        let via_right = apply_on_axes(&right, &points).map_err(TestCaseError::fail)?;
        assert_points_close(&expected, &via_left, EPS).map_err(TestCaseError::fail)?;
        assert_points_close(&expected, &via_right, EPS).map_err(TestCaseError::fail)?;
    }

    #[test]
    fn inverse_round_trips_points(t in arb_invertible(), points in arb_points(8)) {
        let inverse = invert(&t).expect("generated transformations are invertible");
        let forward = apply_on_axes(&t, &points).map_err(TestCaseError::fail)?;
        let back = apply_on_axes(&inverse, &forward).map_err(TestCaseError::fail)?;
        assert_points_close(&points, &back, EPS).map_err(TestCaseError::fail)?;
    }

    #[test]
    fn composition_is_associative(
        a in arb_invertible(),
        b in arb_invertible(),
        c in arb_invertible(),
        points in arb_points(6),
    ) {
        let left = compose(&compose(&a, &b).expect("a then b"), &c).expect("(a then b) then c");
        let right = compose(&a, &compose(&b, &c).expect("b then c")).expect("a then (b then c)");

        let via_left = apply_on_axes(&left, &points).map_err(TestCaseError::fail)?;
        let via_right = apply_on_axes(&right, &points).map_err(TestCaseError::fail)?;
        assert_points_close(&via_left, &via_right, EPS).map_err(TestCaseError::fail)?;
    }

    #[test]
    fn composition_matches_sequential_application(
        a in arb_invertible(),
        b in arb_invertible(),
        points in arb_points(6),
    ) {
        let composed = compose(&a, &b).expect("compose");
        let stepwise = apply_on_axes(&b, &apply_on_axes(&a, &points).map_err(TestCaseError::fail)?)
            .map_err(TestCaseError::fail)?;
        let direct = apply_on_axes(&composed, &points).map_err(TestCaseError::fail)?;
        assert_points_close(&stepwise, &direct, EPS).map_err(TestCaseError::fail)?;
    }

    #[test]
    fn transformation_json_preserves_behavior(t in arb_invertible()) {
        let json = serde_json::to_string(&t).expect("serialize transformation");
        let restored: Transformation = serde_json::from_str(&json).expect("parse transformation");
        let axes = axis_names(&AXES);
        prop_assert!(t.approx_eq_on(&restored, &axes, EPS).expect("comparable"));
    }
}

#[test]
fn axis_duplicating_map_is_not_invertible() {
    let drop = Transformation::map_axis(&[("x", "y"), ("y", "y")]).unwrap();
    let err = invert(&drop).unwrap_err();
    assert_eq!(err.kind(), spatialdata::error::ErrorKind::NotInvertible);
}

#[test]
fn zero_scale_is_not_invertible() {
    let t = Transformation::scale(&["x", "y"], &[0.0, 1.0]).unwrap();
    assert!(invert(&t).is_err());
}
