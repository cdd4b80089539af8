//! A multiplicative extended Kalman filter (MEKF) for attitude estimation
//! from accelerometer, magnetometer and gyroscope samples.
//!
//! The crate consists of three layers:
//!
//! - [`quest`] determines an initial orientation from a single pair of
//!   accelerometer and magnetometer observations.
//! - [`Mekf`] tracks orientation, angular velocity and gyroscope bias,
//!   estimating the attitude error as Modified Rodrigues Parameters
//!   ([`mrp`]).
//! - [`AttitudeEstimator`] ties both together: it averages start-up samples,
//!   initializes the filter and runs a time update followed by a measurement
//!   update for every sample, timed by a free-running hardware counter.
//!
//! # Conventions
//!
//! Orientations rotate reference-frame vectors into the body frame, so a
//! stationary accelerometer reads `orientation * accelerometer_reference`.
//! Angular velocity is expressed in the reference frame.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use mekf::{quest, Mekf};
//! use nalgebra::{UnitQuaternion, Vector3};
//!
//! let gravity = Vector3::new(0.0, 0.0, 9.81);
//! let field = Vector3::new(20.0, 0.0, -40.0);
//!
//! let truth = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
//! let accel = truth * gravity;
//! let magno = truth * field;
//!
//! let initial = quest::estimate(&[accel, magno], &[gravity, field], [1.0, 1.0]).unwrap();
//! let mut filter = Mekf::new(gravity, field, initial);
//!
//! for _ in 0..10 {
//!     filter.predict(Duration::from_millis(10));
//!     filter.update_gyro(Vector3::zeros()).unwrap();
//!     filter.update_accelerometer(accel).unwrap();
//!     filter.update_magnetometer(magno).unwrap();
//! }
//!
//! assert!(filter.orientation().angle_to(&truth) < 1e-2);
//! ```

pub mod bootstrap;
pub mod clock;
pub mod error;
pub mod estimator;
pub mod mekf;
pub mod mrp;
pub mod quest;

pub use bootstrap::Bootstrap;
pub use clock::CounterClock;
pub use error::{EstimatorError, FilterError, QuestError};
pub use estimator::{AttitudeEstimator, EstimatorConfig, Measurement};
pub use mekf::{Mekf, MekfParameters, StateEstimate, StateVector};
