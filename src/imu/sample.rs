use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// IMU biases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImuBias {
    pub gyro: Vector3<f64>,
    pub accel: Vector3<f64>,
}

impl ImuBias {
    pub fn zero() -> Self {
        Self {
            gyro: Vector3::zeros(),
            accel: Vector3::zeros(),
        }
    }
}

/// Single IMU measurement: linear acceleration and angular velocity.
///
/// Timestamps are carried separately, aligned 1:1 with the samples they
/// stamp (see [`crate::frontend::StereoImuSyncPacket`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    pub accel: Vector3<f64>,
    pub gyro: Vector3<f64>,
}

impl ImuSample {
    pub fn new(accel: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        Self { accel, gyro }
    }

    pub fn zero() -> Self {
        Self {
            accel: Vector3::zeros(),
            gyro: Vector3::zeros(),
        }
    }
}
