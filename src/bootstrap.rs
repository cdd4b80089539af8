//! Collection of start-up samples for the initial orientation estimate.
//!
//! Before the filter can run, the orientation is determined once from the
//! accelerometer and magnetometer. Single samples are noisy, so the
//! [`Bootstrap`] averages a number of samples of each sensor first.

use log::warn;
use nalgebra::{SVector, Vector3};

/// Arithmetic mean of an N-dimensional signal.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunningMean<const N: usize> {
    /// The number of samples accumulated so far.
    sample_count: u32,
    /// The sum of all samples accumulated so far.
    sum: SVector<f32, N>,
}

impl<const N: usize> Default for RunningMean<N> {
    fn default() -> Self {
        Self {
            sample_count: 0,
            sum: SVector::zeros(),
        }
    }
}

impl<const N: usize> RunningMean<N> {
    /// Add a sample.
    pub fn push(&mut self, x: SVector<f32, N>) {
        self.sample_count += 1;
        self.sum += x;
    }

    /// The number of samples accumulated so far.
    #[must_use]
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// The arithmetic mean of all samples, `None` if there are none.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> Option<SVector<f32, N>> {
        (self.sample_count > 0).then(|| self.sum / self.sample_count as f32)
    }

    /// Discard all samples.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Averages accelerometer and magnetometer samples until enough of each have
/// been collected to estimate the initial orientation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bootstrap {
    /// Number of samples required from each sensor.
    required_samples: u32,
    accelerometer: RunningMean<3>,
    magnetometer: RunningMean<3>,
}

impl Bootstrap {
    /// Create a bootstrap requiring `required_samples` samples per sensor.
    ///
    /// At least one sample per sensor is always required.
    #[must_use]
    pub fn new(required_samples: u32) -> Self {
        Self {
            required_samples: required_samples.max(1),
            accelerometer: RunningMean::default(),
            magnetometer: RunningMean::default(),
        }
    }

    /// Add an accelerometer sample. Non-finite samples are discarded, as are
    /// samples beyond the required count.
    pub fn push_accelerometer(&mut self, accel: Vector3<f32>) {
        if !is_finite(&accel) {
            warn!("discarding non-finite accelerometer sample {accel:?}");
        } else if self.accelerometer.sample_count() < self.required_samples {
            self.accelerometer.push(accel);
        }
    }

    /// Add a magnetometer sample. Non-finite samples are discarded, as are
    /// samples beyond the required count.
    pub fn push_magnetometer(&mut self, magno: Vector3<f32>) {
        if !is_finite(&magno) {
            warn!("discarding non-finite magnetometer sample {magno:?}");
        } else if self.magnetometer.sample_count() < self.required_samples {
            self.magnetometer.push(magno);
        }
    }

    /// Whether enough samples of both sensors have been collected.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.accelerometer.sample_count() >= self.required_samples
            && self.magnetometer.sample_count() >= self.required_samples
    }

    /// The averaged `[accelerometer, magnetometer]` observations, once
    /// complete.
    #[must_use]
    pub fn observations(&self) -> Option<[Vector3<f32>; 2]> {
        if !self.is_complete() {
            return None;
        }

        Some([self.accelerometer.mean()?, self.magnetometer.mean()?])
    }

    /// Discard all collected samples.
    pub fn reset(&mut self) {
        self.accelerometer.reset();
        self.magnetometer.reset();
    }
}

fn is_finite(sample: &Vector3<f32>) -> bool {
    sample.iter().all(|value| value.is_finite())
}
