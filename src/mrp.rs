//! Small-rotation utilities built around Modified Rodrigues Parameters (MRP).
//!
//! The filter estimates its attitude error as an MRP vector
//! $p = e \tan(\theta / 4)$, where $e$ is the rotation axis and $\theta$ the
//! rotation angle. This three-parameter representation is minimal, has no
//! norm constraint during the linear Kalman correction, and is only
//! singular at $\theta = 2\pi$.
//!
//! The quaternion corresponding to $p$ is obtained through the stereographic
//! projection
//! $$q = \left(\frac{1 - |p|^2}{1 + |p|^2}, \frac{2p}{1 + |p|^2}\right)$$

use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};

/// Step used by [`rotation_jacobian_numerical`].
const FINITE_DIFFERENCE_STEP: f32 = 1e-3;

/// Convert an MRP attitude error into the unit quaternion it represents.
///
/// # Example
///
/// ```
/// use mekf::mrp::mrp_to_quaternion;
/// use nalgebra::{UnitQuaternion, Vector3};
///
/// // a quarter turn about z corresponds to tan(pi / 8) along z
/// let p = Vector3::new(0.0, 0.0, (std::f32::consts::PI / 8.0).tan());
/// let q = mrp_to_quaternion(&p);
///
/// let expected = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f32::consts::FRAC_PI_2);
/// assert!(q.angle_to(&expected) < 1e-2);
/// ```
#[must_use]
pub fn mrp_to_quaternion(p: &Vector3<f32>) -> UnitQuaternion<f32> {
    let squared_norm = p.norm_squared();
    let denominator = 1.0 + squared_norm;
    let vector = p * (2.0 / denominator);

    UnitQuaternion::from_quaternion(Quaternion::new(
        (1.0 - squared_norm) / denominator,
        vector.x,
        vector.y,
        vector.z,
    ))
}

/// The cross-product matrix $[v]_\times$, such that `skew(v) * w == v.cross(w)`.
#[must_use]
pub fn skew(v: &Vector3<f32>) -> Matrix3<f32> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Analytic Jacobian of the rotated vector `mrp_to_quaternion(p) * v` with
/// respect to the MRP `p`.
///
/// At `p = 0` this reduces to $-4 [v]_\times$.
#[must_use]
pub fn rotation_jacobian(p: &Vector3<f32>, v: &Vector3<f32>) -> Matrix3<f32> {
    let squared_norm = p.norm_squared();
    let denominator = 1.0 + squared_norm;

    let w = (1.0 - squared_norm) / denominator;
    let u = p * (2.0 / denominator);

    // partials of v + 2w (u x v) + 2 u x (u x v) with respect to the
    // quaternion scalar and vector parts
    let d_scalar = u.cross(v) * 2.0;
    let d_vector = skew(v) * (-2.0 * w)
        + (Matrix3::identity() * u.dot(v) + u * v.transpose() - v * u.transpose() * 2.0) * 2.0;

    // partials of the stereographic projection
    let scalar_d_p = p.transpose() * (-4.0 / denominator.powi(2));
    let vector_d_p =
        Matrix3::identity() * (2.0 / denominator) - p * p.transpose() * (4.0 / denominator.powi(2));

    d_scalar * scalar_d_p + d_vector * vector_d_p
}

/// Central-difference approximation of [`rotation_jacobian`].
///
/// Only intended for validating the analytic form, the filter itself uses
/// [`rotation_jacobian`].
#[must_use]
pub fn rotation_jacobian_numerical(p: &Vector3<f32>, v: &Vector3<f32>) -> Matrix3<f32> {
    let mut jacobian = Matrix3::zeros();

    for axis in 0..3 {
        let mut step = Vector3::zeros();
        step[axis] = FINITE_DIFFERENCE_STEP;

        let forward = mrp_to_quaternion(&(p + step)) * v;
        let backward = mrp_to_quaternion(&(p - step)) * v;

        jacobian.set_column(axis, &((forward - backward) / (2.0 * FINITE_DIFFERENCE_STEP)));
    }

    jacobian
}

/// Jacobian of `q * v` with respect to the target vector `v`, which is the
/// rotation matrix of `q`.
#[must_use]
pub fn target_jacobian(q: &UnitQuaternion<f32>) -> Matrix3<f32> {
    q.to_rotation_matrix().into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zero_mrp_is_identity() {
        let q = mrp_to_quaternion(&Vector3::zeros());
        assert_relative_eq!(q.angle(), 0.0);
    }

    #[test]
    fn mrp_angle_is_four_times_arctangent() {
        let p = Vector3::new(0.1, -0.2, 0.25);
        let q = mrp_to_quaternion(&p);

        assert_relative_eq!(q.angle(), 4.0 * p.norm().atan(), epsilon = 1e-5);
        let axis = q.axis().expect("rotation has an axis");
        assert_relative_eq!(axis.into_inner(), p.normalize(), epsilon = 1e-5);
    }

    #[test]
    fn skew_matches_cross_product() {
        let a = Vector3::new(0.3, -1.2, 2.0);
        let b = Vector3::new(-0.7, 0.4, 0.1);
        assert_relative_eq!(skew(&a) * b, a.cross(&b), epsilon = 1e-6);
    }

    #[test]
    fn jacobian_at_zero_error_is_scaled_skew() {
        let v = Vector3::new(0.3, 0.5, -0.8);
        assert_relative_eq!(
            rotation_jacobian(&Vector3::zeros(), &v),
            skew(&v) * -4.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn analytic_jacobian_matches_finite_differences() {
        let v = Vector3::new(0.3, 0.5, -0.8);

        for p in [
            Vector3::zeros(),
            Vector3::new(0.1, -0.2, 0.3),
            Vector3::new(-0.05, 0.01, 0.02),
            Vector3::new(0.4, 0.3, -0.2),
        ] {
            let analytic = rotation_jacobian(&p, &v);
            let numerical = rotation_jacobian_numerical(&p, &v);
            assert_relative_eq!(analytic, numerical, epsilon = 2e-3);
        }
    }

    #[test]
    fn target_jacobian_rotates_vectors() {
        let q = UnitQuaternion::from_euler_angles(0.2, -0.4, 1.1);
        let v = Vector3::new(1.0, 2.0, -0.5);
        assert_relative_eq!(target_jacobian(&q) * v, q * v, epsilon = 1e-5);
    }
}
