use nalgebra::UnitQuaternion;

use crate::types::Timestamp;

use super::sample::{ImuBias, ImuSample};

const NANOSECONDS_PER_SECOND: f64 = 1e9;

/// Integrates the gyro component of a stamped sample window into the
/// relative rotation between the window's first and last timestamps.
///
/// Midpoint integration with bias subtraction. Only the rotation is
/// summarized: the result serves as a prior for feature tracking, not as a
/// motion estimate.
pub fn preintegrate_gyro(
    stamps: &[Timestamp],
    samples: &[ImuSample],
    bias: &ImuBias,
) -> UnitQuaternion<f64> {
    assert_eq!(
        stamps.len(),
        samples.len(),
        "gyro preintegration: {} stamps but {} samples",
        stamps.len(),
        samples.len()
    );

    let mut delta_rot = UnitQuaternion::identity();
    for i in 1..samples.len() {
        let dt = (stamps[i] - stamps[i - 1]) as f64 / NANOSECONDS_PER_SECOND;
        if dt <= 0.0 {
            continue;
        }
        let gyro_prev = samples[i - 1].gyro - bias.gyro;
        let gyro_curr = samples[i].gyro - bias.gyro;
        let omega = 0.5 * (gyro_prev + gyro_curr);
        delta_rot *= UnitQuaternion::from_scaled_axis(omega * dt);
    }
    delta_rot
}
