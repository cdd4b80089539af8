//! QUEST attitude initializer for exactly two vector pairs.
//!
//! Given two directions known in the reference frame (e.g. gravity and the
//! local magnetic field) and the same two directions as observed in the body
//! frame, [`estimate`] returns the orientation that best aligns them in the
//! weighted least-squares sense (Wahba's problem), using the closed-form
//! optimal eigenvalue available for two observations.
//!
//! The returned quaternion `q` rotates reference-frame vectors into the body
//! frame, i.e. `observation ≈ q * reference`, which is the convention used by
//! [`Mekf`](crate::Mekf) for its orientation.
//!
//! The underlying linear solve degenerates when the sought rotation is close
//! to 180°. When that happens the observations are rotated by 180° about the
//! x, y and z body axes in turn, the problem is solved in that frame and the
//! result is rotated back.

use log::debug;
use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};

use crate::error::QuestError;

/// Default lower bound for the conditioning measure `det(M) / λ_max^3` of a
/// single solve. For unit weights this corresponds to `det(M) < 0.1`.
pub const SINGULARITY_THRESHOLD: f32 = 0.0125;

/// The frame in which a solve is attempted, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Body,
    FlippedX,
    FlippedY,
    FlippedZ,
}

impl Frame {
    const ALL: [Frame; 4] = [Frame::Body, Frame::FlippedX, Frame::FlippedY, Frame::FlippedZ];

    /// The 180° rotation applied to the observations in this frame.
    fn flip(self) -> UnitQuaternion<f32> {
        let (x, y, z) = match self {
            Frame::Body => return UnitQuaternion::identity(),
            Frame::FlippedX => (1.0, 0.0, 0.0),
            Frame::FlippedY => (0.0, 1.0, 0.0),
            Frame::FlippedZ => (0.0, 0.0, 1.0),
        };

        UnitQuaternion::new_unchecked(Quaternion::new(0.0, x, y, z))
    }
}

/// Estimate the orientation from two observation/reference pairs, using the
/// default [`SINGULARITY_THRESHOLD`].
///
/// `weights` expresses the relative trust in each pair. Input vectors do not
/// need to be normalized.
///
/// # Errors
///
/// Returns [`QuestError::ZeroLengthVector`] if any input has zero length, and
/// [`QuestError::DegenerateGeometry`] if no frame yields a well-conditioned
/// solve, which happens when the two vectors of a pair are (anti-)parallel.
///
/// # Example
///
/// ```
/// use mekf::quest;
/// use nalgebra::{UnitQuaternion, Vector3};
///
/// let truth = UnitQuaternion::from_euler_angles(0.1, -0.3, 2.0);
/// let references = [Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.5, 0.0, -0.866)];
/// let observations = [truth * references[0], truth * references[1]];
///
/// let q = quest::estimate(&observations, &references, [1.0, 1.0]).unwrap();
/// assert!(q.angle_to(&truth) < 1e-2);
/// ```
pub fn estimate(
    observations: &[Vector3<f32>; 2],
    references: &[Vector3<f32>; 2],
    weights: [f32; 2],
) -> Result<UnitQuaternion<f32>, QuestError> {
    estimate_with_threshold(observations, references, weights, SINGULARITY_THRESHOLD)
}

/// Same as [`estimate`], with an explicit conditioning threshold.
///
/// # Errors
///
/// See [`estimate`].
pub fn estimate_with_threshold(
    observations: &[Vector3<f32>; 2],
    references: &[Vector3<f32>; 2],
    weights: [f32; 2],
    threshold: f32,
) -> Result<UnitQuaternion<f32>, QuestError> {
    let observations = normalized(observations)?;
    let references = normalized(references)?;

    for frame in Frame::ALL {
        if let Some(q) = solve_in_frame(frame, &observations, &references, weights, threshold) {
            if frame != Frame::Body {
                debug!("QUEST solve was ill-conditioned, recovered in {frame:?} frame");
            }
            return Ok(q);
        }
    }

    Err(QuestError::DegenerateGeometry)
}

fn normalized(vectors: &[Vector3<f32>; 2]) -> Result<[Vector3<f32>; 2], QuestError> {
    let first = vectors[0]
        .try_normalize(f32::EPSILON)
        .ok_or(QuestError::ZeroLengthVector)?;
    let second = vectors[1]
        .try_normalize(f32::EPSILON)
        .ok_or(QuestError::ZeroLengthVector)?;
    Ok([first, second])
}

/// Solve with the observations rotated by the frame's flip `F`.
///
/// The solve yields `F * q`, so the orientation is recovered as
/// `q = F^-1 * (F * q)`.
fn solve_in_frame(
    frame: Frame,
    observations: &[Vector3<f32>; 2],
    references: &[Vector3<f32>; 2],
    weights: [f32; 2],
    threshold: f32,
) -> Option<UnitQuaternion<f32>> {
    let flip = frame.flip();
    let flipped = [flip * observations[0], flip * observations[1]];

    solve(&flipped, references, weights, threshold).map(|q| flip.inverse() * q)
}

/// A single closed-form solve, returning `None` when ill-conditioned.
fn solve(
    observations: &[Vector3<f32>; 2],
    references: &[Vector3<f32>; 2],
    weights: [f32; 2],
    threshold: f32,
) -> Option<UnitQuaternion<f32>> {
    let [w1, w2] = observations;
    let [v1, v2] = references;
    let [a0, a1] = weights;

    // closed-form largest eigenvalue of Davenport's K matrix for two pairs
    let cos = v1.dot(v2) * w1.dot(w2) + v1.cross(v2).norm() * w1.cross(w2).norm();
    let lambda_max = (a0 * a0 + 2.0 * a0 * a1 * cos + a1 * a1).sqrt();

    // attitude profile matrix
    let b = w1 * v1.transpose() * a0 + w2 * v2.transpose() * a1;
    let s = b + b.transpose();
    let z = Vector3::new(
        b[(2, 1)] - b[(1, 2)],
        b[(0, 2)] - b[(2, 0)],
        b[(1, 0)] - b[(0, 1)],
    );
    let sigma = b.trace();

    let m = Matrix3::identity() * (lambda_max + sigma) - s;
    let conditioning = m.determinant() / lambda_max.powi(3);
    if conditioning.is_nan() || conditioning < threshold {
        return None;
    }

    // Gibbs vector of the rotation
    let y = m.try_inverse()? * z;

    let scale = 1.0 / (1.0 + y.norm_squared()).sqrt();
    Some(UnitQuaternion::from_quaternion(Quaternion::new(
        scale,
        y.x * scale,
        y.y * scale,
        y.z * scale,
    )))
}
