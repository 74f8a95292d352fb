//! Inertial data types, the between-keyframe accumulation window, and
//! gyro preintegration used as a tracking prior.

pub mod accumulation;
pub mod preintegration;
pub mod sample;

pub use accumulation::ImuAccumulationBuffer;
pub use preintegration::preintegrate_gyro;
pub use sample::{ImuBias, ImuSample};
