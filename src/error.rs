//! Error types returned by the initializer, the filter and the estimator.

use thiserror::Error;

/// Errors produced by the [QUEST](crate::quest) attitude initializer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestError {
    /// One of the observation or reference vectors has (near) zero length.
    #[error("observation or reference vector has zero length")]
    ZeroLengthVector,
    /// The solve was near-singular in the unrotated frame and in all three
    /// 180° rotated frames, typically because the two vectors of a pair are
    /// parallel or anti-parallel.
    #[error("reference geometry is degenerate in every rotated frame")]
    DegenerateGeometry,
}

/// Errors produced by a measurement update of the [`Mekf`](crate::Mekf).
///
/// A failed update leaves the filter exactly as it was before the call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterError {
    /// The measurement contains a NaN or infinite component.
    #[error("measurement contains non-finite values")]
    NonFiniteMeasurement,
    /// The innovation covariance `H P H^T + R` could not be inverted.
    #[error("innovation covariance is singular")]
    SingularInnovation,
    /// The corrected variance of a state component dropped below zero.
    #[error("variance of state component {index} became negative")]
    NegativeVariance {
        /// Index of the offending state component.
        index: usize,
    },
    /// The corrected state or covariance contains NaN or infinite values.
    #[error("corrected state contains non-finite values")]
    NonFiniteState,
    /// A [`MekfParameters`](crate::MekfParameters) field is negative,
    /// non-finite or out of range.
    #[error("filter parameter `{name}` is out of range")]
    InvalidParameter {
        /// Name of the offending field.
        name: &'static str,
    },
}

/// Errors produced by the [`AttitudeEstimator`](crate::AttitudeEstimator).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorError {
    /// The initial orientation could not be determined from the bootstrap
    /// samples.
    #[error("failed to initialize orientation: {0}")]
    Initialization(#[from] QuestError),
    /// A filter update was rejected.
    #[error("filter update rejected: {0}")]
    Filter(#[from] FilterError),
}
