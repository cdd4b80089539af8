//! The multiplicative extended Kalman filter (MEKF).
//!
//! The filter carries the full orientation in a unit quaternion and only
//! estimates a small attitude error linearly, as a Modified Rodrigues
//! Parameter vector (see [`crate::mrp`]). After every correction the
//! attitude error is folded into the quaternion and reset to zero.
//!
//! # State
//!
//! | indices | component                                                 |
//! |---------|-----------------------------------------------------------|
//! | `0..3`  | attitude error (MRP)                                      |
//! | `3..6`  | angular velocity in the reference frame, in rad/s         |
//! | `6..9`  | gyroscope bias in the body frame, in rad/s                |
//!
//! # Covariance
//!
//! Only the diagonal of the 9x9 error covariance is tracked, both during
//! prediction and after each correction. This is cheaper than the full
//! covariance propagation, at the cost of ignoring cross-correlations. In
//! particular angular velocity and gyroscope bias are only separated by their
//! relative variances, as a gyroscope measurement observes their sum.

use std::time::Duration;

use log::warn;
use nalgebra::{Matrix3, SMatrix, SVector, Unit, UnitQuaternion, Vector3};

use crate::{
    error::FilterError,
    mrp::{mrp_to_quaternion, rotation_jacobian, target_jacobian},
};

/// Number of scalar components in the filter state.
pub const NUM_STATES: usize = 9;
/// Index of the first attitude error component.
pub const ATTITUDE_ERROR_INDEX: usize = 0;
/// Index of the first angular velocity component.
pub const ANGULAR_VELOCITY_INDEX: usize = 3;
/// Index of the first gyroscope bias component.
pub const GYRO_BIAS_INDEX: usize = 6;

/// Upper bound for every variance, applied during prediction.
///
/// Without measurements constraining them, the angular velocity variances
/// grow geometrically and would otherwise overflow. Saturating keeps the
/// covariance finite, so the filter recovers as soon as measurements
/// arrive again.
pub const MAX_VARIANCE: f32 = 1e6;

/// Angular speeds at or below this value (rad/s) do not rotate the
/// orientation during prediction.
const ANGULAR_SPEED_EPSILON: f32 = 1e-8;

/// A vector holding one value per state component.
pub type StateVector = SVector<f32, NUM_STATES>;

/// Observation matrix of a three-dimensional measurement.
type ObservationMatrix = SMatrix<f32, 3, NUM_STATES>;

/// Parameters for the [`Mekf`].
///
/// All values are variances, the noise parameters are fixed for the lifetime
/// of a filter. Every value must be finite and non-negative, and the initial
/// variances must not exceed [`MAX_VARIANCE`], see [`MekfParameters::validate`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MekfParameters {
    /// Initial variance of each attitude error component.
    ///
    /// The default of $(\pi / 4)^2$ expresses no real prior on the initial
    /// orientation.
    pub attitude_error_variance: f32,
    /// Initial variance of each angular velocity component, in (rad/s)^2.
    pub angular_velocity_variance: f32,
    /// Initial variance of each gyroscope bias component, in (rad/s)^2.
    pub gyro_bias_variance: f32,
    /// Growth of the attitude error variance per second.
    pub attitude_error_process_noise: f32,
    /// Growth of the angular velocity variance per second.
    ///
    /// The angular velocity variance additionally grows with the square of
    /// the prediction interval, see [`Mekf::predict`].
    pub angular_velocity_process_noise: f32,
    /// Growth of the gyroscope bias variance per second.
    pub gyro_bias_process_noise: f32,
    /// Accelerometer measurement noise, per axis.
    pub accelerometer_noise: f32,
    /// Magnetometer measurement noise, per axis.
    pub magnetometer_noise: f32,
    /// Gyroscope measurement noise, per axis.
    pub gyroscope_noise: f32,
}

impl Default for MekfParameters {
    fn default() -> Self {
        Self {
            attitude_error_variance: 0.616_850_3,
            angular_velocity_variance: 4.0,
            gyro_bias_variance: 1.0,
            attitude_error_process_noise: 1e-5,
            angular_velocity_process_noise: 3e-3,
            gyro_bias_process_noise: 1e-5,
            accelerometer_noise: 1e-3,
            magnetometer_noise: 1e-3,
            gyroscope_noise: 1e-5,
        }
    }
}

impl MekfParameters {
    /// Check that every parameter is finite and non-negative, and that no
    /// initial variance exceeds [`MAX_VARIANCE`].
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidParameter`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), FilterError> {
        let variances = [
            ("attitude_error_variance", self.attitude_error_variance),
            ("angular_velocity_variance", self.angular_velocity_variance),
            ("gyro_bias_variance", self.gyro_bias_variance),
        ];
        let noise = [
            ("attitude_error_process_noise", self.attitude_error_process_noise),
            ("angular_velocity_process_noise", self.angular_velocity_process_noise),
            ("gyro_bias_process_noise", self.gyro_bias_process_noise),
            ("accelerometer_noise", self.accelerometer_noise),
            ("magnetometer_noise", self.magnetometer_noise),
            ("gyroscope_noise", self.gyroscope_noise),
        ];

        let invalid = variances
            .iter()
            .find(|(_, value)| !(0.0..=MAX_VARIANCE).contains(value))
            .or_else(|| {
                noise
                    .iter()
                    .find(|(_, value)| !value.is_finite() || *value < 0.0)
            });

        match invalid {
            Some((name, value)) => {
                warn!("rejecting filter parameter {name} = {value}");
                Err(FilterError::InvalidParameter { name: *name })
            }
            None => Ok(()),
        }
    }

    fn initial_covariance(&self) -> StateVector {
        per_block(
            self.attitude_error_variance,
            self.angular_velocity_variance,
            self.gyro_bias_variance,
        )
    }

    fn process_noise(&self) -> StateVector {
        per_block(
            self.attitude_error_process_noise,
            self.angular_velocity_process_noise,
            self.gyro_bias_process_noise,
        )
    }
}

fn per_block(attitude_error: f32, angular_velocity: f32, gyro_bias: f32) -> StateVector {
    let mut values = StateVector::zeros();
    values
        .fixed_rows_mut::<3>(ATTITUDE_ERROR_INDEX)
        .fill(attitude_error);
    values
        .fixed_rows_mut::<3>(ANGULAR_VELOCITY_INDEX)
        .fill(angular_velocity);
    values.fixed_rows_mut::<3>(GYRO_BIAS_INDEX).fill(gyro_bias);
    values
}

/// A snapshot of the estimated vehicle state.
///
/// Position, velocity, acceleration and altitude are not estimated by the
/// attitude filter and are always zero.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StateEstimate {
    /// Rotation from the reference frame into the body frame.
    pub orientation: UnitQuaternion<f32>,
    /// Angular velocity in the reference frame, in rad/s.
    pub angular_velocity: Vector3<f32>,
    /// Position, reserved.
    pub position: Vector3<f32>,
    /// Velocity, reserved.
    pub velocity: Vector3<f32>,
    /// Acceleration, reserved.
    pub acceleration: Vector3<f32>,
    /// Altitude, reserved.
    pub altitude: f32,
}

impl StateEstimate {
    /// Roll, pitch and yaw of the body with respect to the reference frame,
    /// in radians.
    #[must_use]
    pub fn euler_angles(&self) -> (f32, f32, f32) {
        self.orientation.inverse().euler_angles()
    }
}

/// Multiplicative extended Kalman filter fusing gyroscope, accelerometer and
/// magnetometer measurements.
///
/// Each new sample should be preceded by a call to [`Mekf::predict`] with the
/// time elapsed since the previous one.
///
/// # Example
///
/// ```
/// use mekf::Mekf;
/// use nalgebra::{UnitQuaternion, Vector3};
/// use std::time::Duration;
///
/// let gravity = Vector3::new(0.0, 0.0, 1.0);
/// let field = Vector3::new(0.5, 0.0, -0.866);
/// let mut filter = Mekf::new(gravity, field, UnitQuaternion::identity());
///
/// filter.predict(Duration::from_millis(1));
/// filter.update_accelerometer(Vector3::new(0.0, 0.01, 1.0)).unwrap();
///
/// let state = filter.state();
/// assert!(state.orientation.angle() < 0.05);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mekf {
    /// Error state, see the module documentation for the layout.
    state: StateVector,
    /// The reference orientation, rotating reference vectors into the body
    /// frame.
    attitude: UnitQuaternion<f32>,
    /// Diagonal of the error covariance.
    covariance: StateVector,
    /// Diagonal of the process noise.
    process_noise: StateVector,
    accelerometer_noise: Matrix3<f32>,
    magnetometer_noise: Matrix3<f32>,
    gyroscope_noise: Matrix3<f32>,
    /// Expected accelerometer reading in the reference frame.
    accelerometer_reference: Vector3<f32>,
    /// Expected magnetometer reading in the reference frame.
    magnetometer_reference: Vector3<f32>,
}

impl Mekf {
    /// Create a filter with the default [`MekfParameters`].
    ///
    /// `initial_orientation` rotates the reference frame into the body frame,
    /// as returned by [`crate::quest::estimate`].
    #[must_use]
    pub fn new(
        accelerometer_reference: Vector3<f32>,
        magnetometer_reference: Vector3<f32>,
        initial_orientation: UnitQuaternion<f32>,
    ) -> Self {
        Self::from_parameters(
            accelerometer_reference,
            magnetometer_reference,
            initial_orientation,
            &MekfParameters::default(),
        )
    }

    /// Create a filter with the given parameters.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidParameter`] if the parameters fail
    /// [`MekfParameters::validate`].
    pub fn with_parameters(
        accelerometer_reference: Vector3<f32>,
        magnetometer_reference: Vector3<f32>,
        initial_orientation: UnitQuaternion<f32>,
        params: &MekfParameters,
    ) -> Result<Self, FilterError> {
        params.validate()?;

        Ok(Self::from_parameters(
            accelerometer_reference,
            magnetometer_reference,
            initial_orientation,
            params,
        ))
    }

    fn from_parameters(
        accelerometer_reference: Vector3<f32>,
        magnetometer_reference: Vector3<f32>,
        initial_orientation: UnitQuaternion<f32>,
        params: &MekfParameters,
    ) -> Self {
        Self {
            state: StateVector::zeros(),
            attitude: initial_orientation,
            covariance: params.initial_covariance(),
            process_noise: params.process_noise(),
            accelerometer_noise: Matrix3::from_diagonal_element(params.accelerometer_noise),
            magnetometer_noise: Matrix3::from_diagonal_element(params.magnetometer_noise),
            gyroscope_noise: Matrix3::from_diagonal_element(params.gyroscope_noise),
            accelerometer_reference,
            magnetometer_reference,
        }
    }

    /// Time update over an interval of `dt`.
    ///
    /// Rotates the orientation by the current angular velocity estimate and
    /// inflates the covariance: every variance grows by `dt * Q`, and the
    /// angular velocity variances additionally by `dt^2 * P`. Variances
    /// saturate at [`MAX_VARIANCE`].
    ///
    /// Intervals need not be regular, and a zero interval leaves the filter
    /// unchanged.
    pub fn predict(&mut self, dt: Duration) {
        let dt = dt.as_secs_f32();

        self.predict_attitude(dt);

        self.covariance += self.process_noise * dt;
        self.covariance
            .fixed_rows_mut::<3>(ANGULAR_VELOCITY_INDEX)
            .scale_mut(1.0 + dt * dt);
        self.covariance
            .apply(|variance| *variance = variance.min(MAX_VARIANCE));
    }

    fn predict_attitude(&mut self, dt: f32) {
        // The orientation rotates reference vectors into the body frame, and
        // those vectors appear to rotate opposite to the body.
        if let Some((axis, speed)) =
            Unit::try_new_and_get(self.angular_velocity(), ANGULAR_SPEED_EPSILON)
        {
            self.attitude *= UnitQuaternion::from_axis_angle(&axis, -speed * dt);
            self.attitude.renormalize();
        }
    }

    /// Correct the state with an accelerometer measurement, which is
    /// expected to be the accelerometer reference rotated into the body
    /// frame.
    ///
    /// # Errors
    ///
    /// See [`FilterError`]. The filter is left unchanged on error.
    pub fn update_accelerometer(&mut self, accel: Vector3<f32>) -> Result<(), FilterError> {
        let reference = self.accelerometer_reference;
        let noise = self.accelerometer_noise;
        self.update_reference_vector(&accel, &reference, &noise)
    }

    /// Correct the state with a magnetometer measurement, which is expected
    /// to be the magnetometer reference rotated into the body frame.
    ///
    /// # Errors
    ///
    /// See [`FilterError`]. The filter is left unchanged on error.
    pub fn update_magnetometer(&mut self, magno: Vector3<f32>) -> Result<(), FilterError> {
        let reference = self.magnetometer_reference;
        let noise = self.magnetometer_noise;
        self.update_reference_vector(&magno, &reference, &noise)
    }

    /// Correct the state with a gyroscope measurement in rad/s, which is
    /// expected to be the angular velocity rotated into the body frame plus
    /// the gyroscope bias.
    ///
    /// # Errors
    ///
    /// See [`FilterError`]. The filter is left unchanged on error.
    pub fn update_gyro(&mut self, gyro: Vector3<f32>) -> Result<(), FilterError> {
        check_finite(&gyro)?;

        let attitude_error = self.attitude_error();
        let correction = mrp_to_quaternion(&attitude_error);

        let body_rate = self.attitude * self.angular_velocity();
        let predicted = correction * body_rate + self.gyro_bias();

        let mut h = ObservationMatrix::zeros();
        h.fixed_view_mut::<3, 3>(0, ATTITUDE_ERROR_INDEX)
            .copy_from(&rotation_jacobian(&attitude_error, &body_rate));
        h.fixed_view_mut::<3, 3>(0, ANGULAR_VELOCITY_INDEX)
            .copy_from(&target_jacobian(&(correction * self.attitude)));
        h.fixed_view_mut::<3, 3>(0, GYRO_BIAS_INDEX)
            .fill_with_identity();

        let noise = self.gyroscope_noise;
        self.correct(&(gyro - predicted), &h, &noise)
    }

    fn update_reference_vector(
        &mut self,
        measurement: &Vector3<f32>,
        reference: &Vector3<f32>,
        noise: &Matrix3<f32>,
    ) -> Result<(), FilterError> {
        check_finite(measurement)?;

        let attitude_error = self.attitude_error();
        let expected = self.attitude * reference;
        let predicted = mrp_to_quaternion(&attitude_error) * expected;

        let mut h = ObservationMatrix::zeros();
        h.fixed_view_mut::<3, 3>(0, ATTITUDE_ERROR_INDEX)
            .copy_from(&rotation_jacobian(&attitude_error, &expected));

        self.correct(&(measurement - predicted), &h, noise)
    }

    /// Kalman correction shared by all measurement updates.
    ///
    /// The new state and covariance are validated before being committed, so
    /// a rejected update has no effect.
    ///
    /// The variances are reduced by `diag(K H P)`, evaluated through the
    /// diagonal of the Joseph form for f32 stability. With the sensor
    /// magnitudes of real accelerometers and magnetometers `K H` comes within
    /// rounding of one, where the direct subtraction could turn negative. As
    /// a consequence [`FilterError::NegativeVariance`] is only reported when
    /// the measurement noise is negative, which [`MekfParameters::validate`]
    /// rules out.
    fn correct(
        &mut self,
        residual: &Vector3<f32>,
        h: &ObservationMatrix,
        noise: &Matrix3<f32>,
    ) -> Result<(), FilterError> {
        // P H^T, with P diagonal
        let p_h_t = SMatrix::<f32, NUM_STATES, 3>::from_fn(|i, j| self.covariance[i] * h[(j, i)]);

        let innovation_covariance = h * p_h_t + noise;
        let Some(inverse) = innovation_covariance
            .try_inverse()
            .filter(|inverse| inverse.iter().all(|value| value.is_finite()))
        else {
            warn!("rejecting update, innovation covariance {innovation_covariance} is singular");
            return Err(FilterError::SingularInnovation);
        };

        let gain = p_h_t * inverse;
        let state = self.state + gain * residual;

        // Diagonal of the Joseph form (I - K H) P (I - K H)^T + K R K^T. This
        // equals P - diag(K H) P, but cannot round below zero for valid noise.
        let reduction = SMatrix::<f32, NUM_STATES, NUM_STATES>::identity() - gain * h;
        let covariance = reduction.component_mul(&reduction) * self.covariance
            + (gain * noise).component_mul(&gain).column_sum();

        if let Some(index) = covariance.iter().position(|variance| *variance < 0.0) {
            warn!(
                "rejecting update, variance {index} would become {}",
                covariance[index]
            );
            return Err(FilterError::NegativeVariance { index });
        }

        if !state.iter().chain(covariance.iter()).all(|value| value.is_finite()) {
            warn!("rejecting update, corrected state is not finite");
            return Err(FilterError::NonFiniteState);
        }

        self.state = state;
        self.covariance = covariance;
        self.reset_attitude_error();

        Ok(())
    }

    /// Fold the attitude error into the orientation and zero it.
    ///
    /// This runs after every correction, whichever sensor produced it.
    fn reset_attitude_error(&mut self) {
        self.attitude = mrp_to_quaternion(&self.attitude_error()) * self.attitude;
        self.attitude.renormalize();

        self.state
            .fixed_rows_mut::<3>(ATTITUDE_ERROR_INDEX)
            .fill(0.0);
    }

    fn attitude_error(&self) -> Vector3<f32> {
        self.state
            .fixed_rows::<3>(ATTITUDE_ERROR_INDEX)
            .into_owned()
    }

    /// The estimated orientation, rotating the reference frame into the body
    /// frame.
    #[must_use]
    pub fn orientation(&self) -> UnitQuaternion<f32> {
        self.attitude
    }

    /// The estimated angular velocity in the reference frame, in rad/s.
    #[must_use]
    pub fn angular_velocity(&self) -> Vector3<f32> {
        self.state
            .fixed_rows::<3>(ANGULAR_VELOCITY_INDEX)
            .into_owned()
    }

    /// The estimated gyroscope bias, in rad/s.
    #[must_use]
    pub fn gyro_bias(&self) -> Vector3<f32> {
        self.state.fixed_rows::<3>(GYRO_BIAS_INDEX).into_owned()
    }

    /// A snapshot of the current estimate.
    #[must_use]
    pub fn state(&self) -> StateEstimate {
        StateEstimate {
            orientation: self.attitude,
            angular_velocity: self.angular_velocity(),
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            acceleration: Vector3::zeros(),
            altitude: 0.0,
        }
    }

    /// The variances of all state components, see the module documentation
    /// for the layout.
    #[must_use]
    pub fn covariance(&self) -> StateVector {
        self.covariance
    }
}

fn check_finite(measurement: &Vector3<f32>) -> Result<(), FilterError> {
    if measurement.iter().all(|value| value.is_finite()) {
        Ok(())
    } else {
        warn!("rejecting non-finite measurement {measurement:?}");
        Err(FilterError::NonFiniteMeasurement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn gravity() -> Vector3<f32> {
        Vector3::new(0.0, 0.0, 1.0)
    }

    fn field() -> Vector3<f32> {
        Vector3::new(0.5, 0.0, -0.866)
    }

    fn filter() -> Mekf {
        Mekf::new(gravity(), field(), UnitQuaternion::identity())
    }

    /// Angle between two rotations, accurate for small angles.
    fn angle_between(a: &UnitQuaternion<f32>, b: &UnitQuaternion<f32>) -> f32 {
        2.0 * (a.inverse() * b).imag().norm().asin()
    }

    /// A filter that trusts its bias prior, so gyroscope readings are
    /// attributed to the angular velocity.
    fn rate_tracking_filter() -> Mekf {
        let params = MekfParameters {
            gyro_bias_variance: 1e-8,
            ..Default::default()
        };
        Mekf::with_parameters(gravity(), field(), UnitQuaternion::identity(), &params).unwrap()
    }

    #[test]
    fn new_filter_uses_initial_variances() {
        let filter = filter();
        let covariance = filter.covariance();

        for i in 0..3 {
            assert_relative_eq!(covariance[ATTITUDE_ERROR_INDEX + i], 0.616_850_3);
            assert_relative_eq!(covariance[ANGULAR_VELOCITY_INDEX + i], 4.0);
            assert_relative_eq!(covariance[GYRO_BIAS_INDEX + i], 1.0);
        }

        assert_eq!(filter.angular_velocity(), Vector3::zeros());
        assert_eq!(filter.gyro_bias(), Vector3::zeros());
    }

    #[test]
    fn predict_inflates_covariance() {
        let mut filter = filter();
        filter.predict(Duration::from_millis(10));

        let covariance = filter.covariance();
        assert_relative_eq!(covariance[0], 0.616_850_3 + 1e-7, epsilon = 1e-7);
        assert_relative_eq!(covariance[3], (4.0 + 3e-5) * (1.0 + 1e-4), epsilon = 1e-5);
        assert_relative_eq!(covariance[6], 1.0 + 1e-7, epsilon = 1e-7);
    }

    #[test]
    fn zero_interval_predict_changes_nothing() {
        let mut filter = rate_tracking_filter();
        filter.update_gyro(Vector3::new(0.1, -0.2, 0.3)).unwrap();
        let before = filter.clone();

        filter.predict(Duration::ZERO);

        assert_relative_eq!(
            filter.orientation().coords,
            before.orientation().coords,
            epsilon = 1e-6
        );
        assert_eq!(filter.angular_velocity(), before.angular_velocity());
        assert_eq!(filter.gyro_bias(), before.gyro_bias());
        assert_eq!(filter.covariance(), before.covariance());
    }

    #[test]
    fn predict_without_rotation_keeps_orientation() {
        let initial = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let mut filter = Mekf::new(gravity(), field(), initial);

        for _ in 0..100 {
            filter.predict(Duration::from_millis(10));
        }

        assert_eq!(filter.orientation(), initial);
    }

    #[test]
    fn dead_reckoning_rotates_opposite_to_body() {
        let mut filter = rate_tracking_filter();
        filter.update_gyro(Vector3::new(0.0, 0.0, 0.5)).unwrap();
        assert_relative_eq!(filter.angular_velocity().z, 0.5, epsilon = 1e-4);

        for _ in 0..100 {
            filter.predict(Duration::from_millis(10));
        }

        // the body turned by +0.5 rad about z over one second, so reference
        // vectors appear turned by -0.5 rad in the body frame
        let expected = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -0.5);
        assert!(angle_between(&filter.orientation(), &expected) < 1e-4);

        let (roll, pitch, yaw) = filter.state().euler_angles();
        assert_abs_diff_eq!(roll, 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(pitch, 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(yaw, 0.5, epsilon = 1e-3);
    }

    #[test]
    fn dead_reckoning_tolerates_irregular_intervals() {
        let mut regular = rate_tracking_filter();
        regular
            .update_gyro(Vector3::new(0.2, -0.1, 0.4))
            .unwrap();
        let mut jittery = regular.clone();

        for _ in 0..50 {
            regular.predict(Duration::from_millis(4));
        }
        for step in [3, 5, 2, 6, 4, 4, 1, 7, 3, 5] {
            for _ in 0..5 {
                jittery.predict(Duration::from_millis(step));
            }
        }

        assert!(angle_between(&regular.orientation(), &jittery.orientation()) < 1e-4);
    }

    #[test]
    fn accelerometer_update_corrects_tilt() {
        let truth = UnitQuaternion::from_euler_angles(0.2, -0.1, 0.0);
        let mut filter = filter();

        let before = filter.orientation().angle_to(&truth);
        filter.predict(Duration::from_millis(1));
        filter.update_accelerometer(truth * gravity()).unwrap();

        let covariance = filter.covariance();
        assert!(filter.orientation().angle_to(&truth) < before);
        assert!(covariance[0] < 0.1);
        assert!(covariance[1] < 0.1);
        // rotation about gravity is unobservable from the accelerometer
        assert_relative_eq!(covariance[2], 0.616_850_3 + 1e-8, epsilon = 1e-6);
    }

    #[test]
    fn every_update_resets_attitude_error() {
        let mut filter = filter();
        let truth = UnitQuaternion::from_euler_angles(0.3, 0.2, -0.4);

        filter.update_accelerometer(truth * gravity()).unwrap();
        assert_eq!(filter.attitude_error(), Vector3::zeros());

        filter.update_magnetometer(truth * field()).unwrap();
        assert_eq!(filter.attitude_error(), Vector3::zeros());

        filter.update_gyro(Vector3::new(0.01, 0.02, 0.0)).unwrap();
        assert_eq!(filter.attitude_error(), Vector3::zeros());
    }

    #[test]
    fn gyro_update_constrains_rate_and_bias() {
        let mut filter = filter();
        filter.update_gyro(Vector3::new(0.1, 0.0, 0.0)).unwrap();

        let covariance = filter.covariance();
        for i in 0..3 {
            assert!(covariance[ANGULAR_VELOCITY_INDEX + i] < 4.0);
            assert!(covariance[GYRO_BIAS_INDEX + i] < 1.0);
        }

        // the measurement is split according to the prior variances
        let sum = filter.angular_velocity() + filter.gyro_bias();
        assert_relative_eq!(sum, Vector3::new(0.1, 0.0, 0.0), epsilon = 1e-5);
        assert!(filter.angular_velocity().x > filter.gyro_bias().x);
    }

    #[test]
    fn stationary_gyro_offset_is_learned_as_bias() {
        let params = MekfParameters {
            angular_velocity_variance: 1e-6,
            angular_velocity_process_noise: 1e-8,
            gyro_bias_variance: 1e-2,
            ..Default::default()
        };
        let mut filter =
            Mekf::with_parameters(gravity(), field(), UnitQuaternion::identity(), &params).unwrap();
        let offset = Vector3::new(0.02, -0.01, 0.015);

        for _ in 0..500 {
            filter.predict(Duration::from_millis(1));
            filter.update_gyro(offset).unwrap();
            filter.update_accelerometer(gravity()).unwrap();
            filter.update_magnetometer(field()).unwrap();
        }

        assert_relative_eq!(filter.gyro_bias(), offset, epsilon = 1e-4);
        assert_abs_diff_eq!(filter.angular_velocity(), Vector3::zeros(), epsilon = 1e-4);
        assert!(filter.orientation().angle() < 1e-2);
    }

    #[test]
    fn non_finite_measurement_is_rejected() {
        let mut filter = filter();
        let before = filter.clone();

        assert_eq!(
            filter.update_accelerometer(Vector3::new(f32::NAN, 0.0, 1.0)),
            Err(FilterError::NonFiniteMeasurement)
        );
        assert_eq!(
            filter.update_gyro(Vector3::new(0.0, f32::INFINITY, 0.0)),
            Err(FilterError::NonFiniteMeasurement)
        );
        assert_eq!(filter, before);
    }

    #[test]
    fn singular_innovation_is_rejected() {
        let params = MekfParameters {
            attitude_error_variance: 0.0,
            accelerometer_noise: 0.0,
            ..Default::default()
        };
        let mut filter =
            Mekf::with_parameters(gravity(), field(), UnitQuaternion::identity(), &params).unwrap();
        let before = filter.clone();

        assert_eq!(
            filter.update_accelerometer(Vector3::new(0.1, 0.0, 1.0)),
            Err(FilterError::SingularInnovation)
        );
        assert_eq!(filter, before);
    }

    #[test]
    fn negative_variance_is_rejected() {
        let mut filter = filter();
        // unreachable through validated parameters
        filter.accelerometer_noise = Matrix3::from_diagonal_element(-1e-3);
        let before = filter.clone();

        assert_eq!(
            filter.update_accelerometer(Vector3::new(0.1, 0.0, 1.0)),
            Err(FilterError::NegativeVariance { index: 0 })
        );
        assert_eq!(filter, before);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let cases = [
            (
                MekfParameters {
                    accelerometer_noise: -1e-3,
                    ..Default::default()
                },
                "accelerometer_noise",
            ),
            (
                MekfParameters {
                    angular_velocity_variance: f32::INFINITY,
                    ..Default::default()
                },
                "angular_velocity_variance",
            ),
            (
                MekfParameters {
                    gyro_bias_variance: 2.0 * MAX_VARIANCE,
                    ..Default::default()
                },
                "gyro_bias_variance",
            ),
            (
                MekfParameters {
                    gyro_bias_process_noise: f32::NAN,
                    ..Default::default()
                },
                "gyro_bias_process_noise",
            ),
        ];

        for (params, name) in cases {
            assert_eq!(
                Mekf::with_parameters(gravity(), field(), UnitQuaternion::identity(), &params),
                Err(FilterError::InvalidParameter { name })
            );
        }

        assert_eq!(MekfParameters::default().validate(), Ok(()));
    }

    #[test]
    fn variances_saturate_without_gyroscope() {
        let mut filter = filter();

        for _ in 0..1000 {
            filter.predict(Duration::from_secs(1));
            filter.update_accelerometer(gravity()).unwrap();
            filter.update_magnetometer(field()).unwrap();
        }

        let covariance = filter.covariance();
        assert!(covariance.iter().all(|variance| variance.is_finite()));
        for i in 0..3 {
            assert_relative_eq!(covariance[ANGULAR_VELOCITY_INDEX + i], MAX_VARIANCE);
        }

        // a gyroscope reading constrains the angular velocity again, down to
        // about the bias variance it cannot be told apart from
        filter.predict(Duration::from_millis(10));
        filter.update_gyro(Vector3::new(0.0, 0.0, 0.2)).unwrap();
        filter.update_accelerometer(gravity()).unwrap();

        let covariance = filter.covariance();
        for i in 0..3 {
            assert!(covariance[ANGULAR_VELOCITY_INDEX + i] < 2.0);
        }
        assert_abs_diff_eq!(filter.angular_velocity().z, 0.2, epsilon = 1e-2);
    }

    #[test]
    fn state_snapshot_reports_reserved_fields_as_zero() {
        let filter = filter();
        let state = filter.state();

        assert_eq!(state.orientation, filter.orientation());
        assert_eq!(state.position, Vector3::zeros());
        assert_eq!(state.velocity, Vector3::zeros());
        assert_eq!(state.acceleration, Vector3::zeros());
        assert_eq!(state.altitude, 0.0);
    }
}
