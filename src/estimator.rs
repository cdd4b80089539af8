//! Wiring of the initializer and the filter into a single sample-driven
//! estimator.
//!
//! The [`AttitudeEstimator`] starts out collecting accelerometer and
//! magnetometer samples. Once enough have been averaged, the initial
//! orientation is determined with [QUEST](crate::quest) and the
//! [`Mekf`] takes over. From then on, every sample runs a time update over
//! the interval since the previous sample, followed by the matching
//! measurement update.

use std::num::NonZeroU32;

use log::{debug, info, trace, warn};
use nalgebra::Vector3;

use crate::{
    bootstrap::Bootstrap,
    clock::CounterClock,
    error::EstimatorError,
    mekf::{Mekf, MekfParameters, StateEstimate, StateVector},
    quest,
};

/// A calibrated sensor sample.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Measurement {
    /// Specific force, in the units of the accelerometer reference.
    Accelerometer(Vector3<f32>),
    /// Magnetic field, in the units of the magnetometer reference.
    Magnetometer(Vector3<f32>),
    /// Angular rate in rad/s.
    Gyroscope(Vector3<f32>),
}

/// Configuration of the [`AttitudeEstimator`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EstimatorConfig {
    /// Expected accelerometer reading when the body is aligned with the
    /// reference frame.
    pub accelerometer_reference: Vector3<f32>,
    /// Expected magnetometer reading when the body is aligned with the
    /// reference frame.
    pub magnetometer_reference: Vector3<f32>,
    /// Relative trust in the accelerometer and magnetometer directions for
    /// the initial orientation.
    pub quest_weights: [f32; 2],
    /// Number of samples per sensor averaged for the initial orientation.
    pub bootstrap_samples: u32,
    /// Frequency of the counter passed to [`AttitudeEstimator::process`], in
    /// Hz.
    pub counter_frequency: NonZeroU32,
    /// Filter parameters.
    pub filter: MekfParameters,
}

impl EstimatorConfig {
    /// Create a configuration for the given reference vectors, with a 1 MHz
    /// counter and default values otherwise.
    #[must_use]
    pub fn new(
        accelerometer_reference: Vector3<f32>,
        magnetometer_reference: Vector3<f32>,
    ) -> Self {
        Self {
            accelerometer_reference,
            magnetometer_reference,
            quest_weights: [1.0, 1.0],
            bootstrap_samples: 100,
            counter_frequency: NonZeroU32::MIN.saturating_add(999_999),
            filter: MekfParameters::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Bootstrapping(Bootstrap),
    Running(Mekf),
}

/// Attitude estimator driven by timestamped sensor samples.
///
/// # Example
///
/// ```
/// use mekf::{AttitudeEstimator, EstimatorConfig, Measurement};
/// use nalgebra::Vector3;
///
/// let gravity = Vector3::new(0.0, 0.0, 9.81);
/// let field = Vector3::new(20.0, 0.0, -40.0);
///
/// let mut config = EstimatorConfig::new(gravity, field);
/// config.bootstrap_samples = 1;
/// let mut estimator = AttitudeEstimator::new(config);
///
/// estimator.process(0, Measurement::Accelerometer(gravity)).unwrap();
/// estimator.process(1000, Measurement::Magnetometer(field)).unwrap();
/// assert!(estimator.is_initialized());
///
/// estimator.process(2000, Measurement::Gyroscope(Vector3::zeros())).unwrap();
/// let state = estimator.state().unwrap();
/// assert!(state.orientation.angle() < 1e-2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AttitudeEstimator {
    config: EstimatorConfig,
    clock: CounterClock,
    phase: Phase,
}

impl AttitudeEstimator {
    /// Create an estimator that starts by collecting bootstrap samples.
    #[must_use]
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            clock: CounterClock::new(config.counter_frequency),
            phase: Phase::Bootstrapping(Bootstrap::new(config.bootstrap_samples)),
            config,
        }
    }

    /// Process a sample taken at the given counter value.
    ///
    /// # Errors
    ///
    /// Returns [`EstimatorError::Initialization`] if the bootstrap samples
    /// did not determine an orientation, in which case collection starts
    /// over, and [`EstimatorError::Filter`] if the filter rejected the
    /// measurement or the configured [`MekfParameters`] are invalid.
    pub fn process(&mut self, counter: u32, measurement: Measurement) -> Result<(), EstimatorError> {
        let dt = self.clock.tick(counter);

        let filter = match &mut self.phase {
            Phase::Bootstrapping(bootstrap) => {
                match measurement {
                    Measurement::Accelerometer(accel) => bootstrap.push_accelerometer(accel),
                    Measurement::Magnetometer(magno) => bootstrap.push_magnetometer(magno),
                    Measurement::Gyroscope(_) => {
                        trace!("ignoring gyroscope sample during bootstrap");
                    }
                }

                if let Some(filter) = Self::try_initialize(&self.config, bootstrap)? {
                    self.phase = Phase::Running(filter);
                }
                return Ok(());
            }
            Phase::Running(filter) => filter,
        };

        filter.predict(dt);
        match measurement {
            Measurement::Accelerometer(accel) => filter.update_accelerometer(accel)?,
            Measurement::Magnetometer(magno) => filter.update_magnetometer(magno)?,
            Measurement::Gyroscope(gyro) => filter.update_gyro(gyro)?,
        }

        Ok(())
    }

    fn try_initialize(
        config: &EstimatorConfig,
        bootstrap: &mut Bootstrap,
    ) -> Result<Option<Mekf>, EstimatorError> {
        let Some(observations) = bootstrap.observations() else {
            return Ok(None);
        };

        let references = [config.accelerometer_reference, config.magnetometer_reference];
        match quest::estimate(&observations, &references, config.quest_weights) {
            Ok(orientation) => {
                info!("initial orientation determined: {orientation}");
                debug!("bootstrap observations: {observations:?}");
                let filter = Mekf::with_parameters(
                    config.accelerometer_reference,
                    config.magnetometer_reference,
                    orientation,
                    &config.filter,
                )?;
                Ok(Some(filter))
            }
            Err(error) => {
                warn!("failed to determine initial orientation ({error}), restarting bootstrap");
                bootstrap.reset();
                Err(error.into())
            }
        }
    }

    /// Whether the initial orientation has been determined and the filter is
    /// running.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        matches!(self.phase, Phase::Running(_))
    }

    /// The running filter, if initialized.
    #[must_use]
    pub fn filter(&self) -> Option<&Mekf> {
        match &self.phase {
            Phase::Running(filter) => Some(filter),
            Phase::Bootstrapping(_) => None,
        }
    }

    /// A snapshot of the current estimate, if initialized.
    #[must_use]
    pub fn state(&self) -> Option<StateEstimate> {
        self.filter().map(Mekf::state)
    }

    /// The variances of all filter states, if initialized.
    #[must_use]
    pub fn covariance(&self) -> Option<StateVector> {
        self.filter().map(Mekf::covariance)
    }

    /// The configuration this estimator was created with.
    #[must_use]
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }
}
