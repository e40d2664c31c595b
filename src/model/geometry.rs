//! Geometry aliases and the small vector helpers shared by the field algebra.
//!
//! All field computations run in `f32`. Surfel-local coordinates put the
//! surface normal on the local +Y axis, so a local tangent always has `y == 0`.

use nalgebra::Rotation3;

use crate::{Error, Result};

/// 3-component position / direction.
pub type Vector3 = nalgebra::Vector3<f32>;

/// 2-component tangent-plane coordinate (lattice offsets, in units of ρ).
pub type Vector2 = nalgebra::Vector2<f32>;

/// 3×3 frame transform.
pub type Matrix3 = nalgebra::Matrix3<f32>;

/// Integer lattice displacement in units of the local tangent basis.
pub type LatticeCoord = nalgebra::Vector2<i32>;

/// How far a normal's length may stray from 1 before it is rejected.
pub const UNIT_TOLERANCE: f32 = 1e-3;

/// Vectors shorter than this are treated as zero.
pub const ZERO_TOLERANCE: f32 = 1e-6;

/// Surface normal expressed in surfel-local coordinates.
#[inline]
pub fn local_normal() -> Vector3 {
    Vector3::y()
}

/// Fail with `InvalidArgument` unless `v` has unit length.
pub fn check_unit(v: &Vector3, what: &str) -> Result<()> {
    let norm = v.norm();
    if !norm.is_finite() || (norm - 1.0).abs() > UNIT_TOLERANCE {
        return Err(Error::InvalidArgument(format!(
            "{what} must be unit length, got |{what}| = {norm}"
        )));
    }
    Ok(())
}

/// Fail with `InvalidArgument` if `v` is (numerically) zero.
pub fn check_non_zero(v: &Vector3, what: &str) -> Result<()> {
    let norm = v.norm();
    if !norm.is_finite() || norm < ZERO_TOLERANCE {
        return Err(Error::InvalidArgument(format!(
            "{what} must be non-zero, got |{what}| = {norm}"
        )));
    }
    Ok(())
}

/// Fail with `InvalidArgument` unless the lattice spacing is positive.
pub fn check_spacing(rho: f32) -> Result<()> {
    if !(rho.is_finite() && rho > 0.0) {
        return Err(Error::InvalidArgument(format!(
            "lattice spacing must be > 0, got {rho}"
        )));
    }
    Ok(())
}

/// Remove the component of `v` along the unit normal `n`.
#[inline]
pub fn project_vector_to_plane(v: &Vector3, n: &Vector3) -> Vector3 {
    v - n * n.dot(v)
}

/// Rotate `v` by `k` quarter turns about the unit normal `n`.
///
/// `k` is taken mod 4: 0 is the identity, 1 is `n × v`, 2 is `-v`, 3 is `-(n × v)`.
/// `v` is assumed to lie in the plane of `n`.
pub fn vector_by_rotating_around_n(v: &Vector3, n: &Vector3, k: u32) -> Vector3 {
    match k % 4 {
        0 => *v,
        1 => n.cross(v),
        2 => -v,
        _ => -n.cross(v),
    }
}

/// Unsigned angle between two non-zero vectors, in radians.
pub fn angle_between(a: &Vector3, b: &Vector3) -> f32 {
    let denom = a.norm() * b.norm();
    if denom < ZERO_TOLERANCE {
        return 0.0;
    }
    (a.dot(b) / denom).clamp(-1.0, 1.0).acos()
}

/// Rotation taking surfel-local +Y onto the unit normal `n`.
pub fn rotation_to_normal(n: &Vector3) -> Matrix3 {
    match Rotation3::rotation_between(&local_normal(), n) {
        Some(rotation) => rotation.into_inner(),
        // Antiparallel: any half-turn about an axis orthogonal to Y will do.
        None => Rotation3::from_axis_angle(&Vector3::x_axis(), std::f32::consts::PI).into_inner(),
    }
}

/// Integer part of a tangent-plane coordinate, ties away from zero.
#[inline]
pub fn round_coord(x: f32) -> i32 {
    x.round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f32 = 1e-5;

    fn unit(x: f32, y: f32, z: f32) -> Vector3 {
        Vector3::new(x, y, z).normalize()
    }

    #[test]
    fn test_check_unit_rejects_long_normal() {
        assert!(check_unit(&Vector3::new(0.0, 2.0, 0.0), "normal").is_err());
        assert!(check_unit(&Vector3::new(0.0, 1.0, 0.0), "normal").is_ok());
    }

    #[test]
    fn test_check_non_zero() {
        assert!(check_non_zero(&Vector3::zeros(), "tangent").is_err());
        assert!(check_non_zero(&Vector3::new(1e-3, 0.0, 0.0), "tangent").is_ok());
    }

    #[test]
    fn test_rotation_quarter_turns() {
        let n = Vector3::z();
        let v = Vector3::x();

        assert_eq!(vector_by_rotating_around_n(&v, &n, 0), v);
        let expected = [0.0_f32, 90.0, 180.0, 90.0];
        for (k, degrees) in expected.iter().enumerate() {
            let r = vector_by_rotating_around_n(&v, &n, k as u32);
            assert!((angle_between(&v, &r).to_degrees() - degrees).abs() < 1e-3, "k={k}");
        }
        assert!((vector_by_rotating_around_n(&v, &n, 4) - v).norm() < EPS);
    }

    #[test]
    fn test_rotation_to_normal_maps_local_y() {
        for n in [Vector3::z(), -Vector3::y(), Vector3::y(), unit(1.0, 2.0, -0.5)] {
            let r = rotation_to_normal(&n);
            assert!((r * local_normal() - n).norm() < EPS, "normal {n:?}");
            assert!((r.transpose() * r - Matrix3::identity()).norm() < EPS);
        }
    }

    #[test]
    fn test_round_coord_symmetric() {
        assert_eq!(round_coord(0.5), 1);
        assert_eq!(round_coord(-0.5), -1);
        assert_eq!(round_coord(-1.49), -1);
        assert_eq!(round_coord(2.51), 3);
    }

    proptest! {
        #[test]
        fn prop_projection_is_idempotent(
            nx in -1.0f32..1.0, ny in -1.0f32..1.0, nz in 0.1f32..1.0,
            vx in -10.0f32..10.0, vy in -10.0f32..10.0, vz in -10.0f32..10.0,
        ) {
            let n = unit(nx, ny, nz);
            let v = Vector3::new(vx, vy, vz);
            let once = project_vector_to_plane(&v, &n);
            let twice = project_vector_to_plane(&once, &n);
            prop_assert!((once - twice).norm() <= 1e-4 * (1.0 + v.norm()));
            prop_assert!(once.dot(&n).abs() <= 1e-4 * (1.0 + v.norm()));
        }
    }
}
