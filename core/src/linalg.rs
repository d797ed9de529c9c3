//! Vector and quaternion primitives shared by the mergers
//!
//! ```text
//!     pub fn weighted_average<T>(values: &[T], weights: &[f64]) -> Option<T>
//!     pub fn vector_from_slice(values: &[f64], field: &'static str) -> Result<Vector3<f64>>
//!     pub fn quaternion_from_slice(values: &[f64], field: &'static str) -> Result<UnitQuaternion<f64>>
//!     pub fn normalize_quaternion(q: Quaternion<f64>, field: &'static str) -> Result<UnitQuaternion<f64>>
//!     pub fn small_angle_quaternion(delta_theta: &Vector3<f64>) -> UnitQuaternion<f64>
//!     pub fn blend_quaternions(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>, weight_a: f64, weight_b: f64) -> Result<UnitQuaternion<f64>>
//! ```
//!
//! Quaternions cross the crate boundary as scalar-first arrays `[w, x, y, z]`. Internally they are
//! nalgebra [`UnitQuaternion`]s, which keeps the unit-norm invariant in the type.
use std::ops::{Add, Mul};

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::errors::{NavError, Result};

/// Smallest quaternion norm that is still accepted for normalization
pub const QUATERNION_NORM_EPSILON: f64 = 1e-9;
/// Tolerance used when checking that an already-built unit quaternion is still unit length
pub const UNIT_NORM_TOLERANCE: f64 = 1e-6;

/// Weighted arithmetic mean of a set of values.
///
/// Works for anything that can be scaled by an `f64` and summed, which covers both scalars and
/// `nalgebra` vectors. Weights are normalized by their sum, so `[1.0, 1.0]` is the plain mean.
///
/// Returns `None` when the slices are empty, have different lengths, or the weights sum to zero
/// or to a non-finite value.
///
/// # Example
/// ```rust
/// use navmerge::linalg::weighted_average;
/// let z = weighted_average(&[10.0, 20.0], &[1.0, 1.0]).unwrap();
/// assert_eq!(z, 15.0);
/// ```
pub fn weighted_average<T>(values: &[T], weights: &[f64]) -> Option<T>
where
    T: Copy + Add<Output = T> + Mul<f64, Output = T>,
{
    if values.is_empty() || values.len() != weights.len() {
        return None;
    }
    let total: f64 = weights.iter().sum();
    if total == 0.0 || !total.is_finite() {
        return None;
    }
    let mut scaled = values
        .iter()
        .zip(weights.iter())
        .map(|(value, weight)| *value * (*weight / total));
    let first = scaled.next()?;
    Some(scaled.fold(first, |acc, term| acc + term))
}

/// Build a three-vector from a loosely typed slice, rejecting wrong lengths and non-finite values
pub fn vector_from_slice(values: &[f64], field: &'static str) -> Result<Vector3<f64>> {
    if values.len() != 3 {
        return Err(NavError::malformed(
            field,
            format!("expected 3 components, got {}", values.len()),
        ));
    }
    let v = Vector3::new(values[0], values[1], values[2]);
    check_finite(&v, field)?;
    Ok(v)
}

/// Build a unit quaternion from a scalar-first slice `[w, x, y, z]`, normalizing it
pub fn quaternion_from_slice(values: &[f64], field: &'static str) -> Result<UnitQuaternion<f64>> {
    if values.len() != 4 {
        return Err(NavError::malformed(
            field,
            format!("expected 4 components, got {}", values.len()),
        ));
    }
    normalize_quaternion(
        Quaternion::new(values[0], values[1], values[2], values[3]),
        field,
    )
}

/// Scalar-first `[w, x, y, z]` components of a unit quaternion
pub fn quaternion_to_array(q: &UnitQuaternion<f64>) -> [f64; 4] {
    [q.w, q.i, q.j, q.k]
}

/// Normalize a quaternion to unit length.
///
/// Fails with [`NavError::MalformedVector`] when any component is non-finite or the norm is
/// below [`QUATERNION_NORM_EPSILON`].
pub fn normalize_quaternion(q: Quaternion<f64>, field: &'static str) -> Result<UnitQuaternion<f64>> {
    if q.coords.iter().any(|c| !c.is_finite()) {
        return Err(NavError::malformed(field, "quaternion has non-finite components"));
    }
    UnitQuaternion::try_new(q, QUATERNION_NORM_EPSILON).ok_or_else(|| {
        NavError::malformed(
            field,
            format!("quaternion norm {:e} is too small to normalize", q.norm()),
        )
    })
}

/// Check that a unit quaternion really is unit length and finite
pub fn check_unit(q: &UnitQuaternion<f64>, field: &'static str) -> Result<()> {
    let norm = q.as_ref().norm();
    if !norm.is_finite() || (norm - 1.0).abs() > UNIT_NORM_TOLERANCE {
        return Err(NavError::malformed(
            field,
            format!("quaternion is not unit length (norm = {norm})"),
        ));
    }
    Ok(())
}

/// Check that every component of a vector is finite
pub fn check_finite(v: &Vector3<f64>, field: &'static str) -> Result<()> {
    if v.iter().all(|c| c.is_finite()) {
        Ok(())
    } else {
        Err(NavError::malformed(field, "vector has non-finite components"))
    }
}

/// Small-angle rotation quaternion built directly from an integrated angular rate.
///
/// $$
/// \delta q \approx \frac{[1, \tfrac{1}{2}\delta\theta_x, \tfrac{1}{2}\delta\theta_y, \tfrac{1}{2}\delta\theta_z]}{\|\cdot\|}
/// $$
///
/// The scalar part is always one before normalization, so this cannot fail.
pub fn small_angle_quaternion(delta_theta: &Vector3<f64>) -> UnitQuaternion<f64> {
    let half = 0.5 * delta_theta;
    UnitQuaternion::new_normalize(Quaternion::new(1.0, half.x, half.y, half.z))
}

/// Weighted blend of two unit quaternions followed by renormalization.
///
/// `b` is flipped onto the same hemisphere as `a` first (`q` and `-q` are the same rotation), so
/// the sum of two unit quaternions with non-negative weights never collapses towards zero.
pub fn blend_quaternions(
    a: &UnitQuaternion<f64>,
    b: &UnitQuaternion<f64>,
    weight_a: f64,
    weight_b: f64,
) -> Result<UnitQuaternion<f64>> {
    let qa = a.into_inner();
    let mut qb = b.into_inner();
    if qa.dot(&qb) < 0.0 {
        qb = -qb;
    }
    let blended = weighted_average(&[qa.coords, qb.coords], &[weight_a, weight_b])
        .ok_or_else(|| NavError::Configuration("quaternion blend weights sum to zero".into()))?;
    normalize_quaternion(Quaternion::from_vector(blended), "attitude")
}
