//! State-estimation backend seam.
//!
//! The optimization mathematics lives behind the [`VioBackend`] capability
//! trait; the pipeline depends only on preintegration, the per-keyframe
//! processing entry, and the pose/landmark/covariance queries. The set of
//! implementations is closed and chosen exactly once at construction.

pub mod regular;
pub mod vanilla;

use std::sync::Arc;

use nalgebra::{DMatrix, Isometry3, Point3, UnitQuaternion};
use parking_lot::RwLock;
use tracing::info;

use crate::config::{BackendSelector, StereoCalibration};
use crate::imu::ImuSample;
use crate::pipeline::payloads::{BackendInput, BackendOutput};
use crate::pipeline::queue::ThreadsafeQueue;
use crate::types::{LandmarkTypeMap, NavState, PointsWithIdMap, Timestamp};

pub use regular::RegularBackend;
pub use vanilla::VanillaBackend;

/// Initial conditions handed to the backend at pipeline initialization.
pub struct BackendSeed {
    pub timestamp: Timestamp,
    /// First inertial sample, taken with the rig assumed static.
    pub imu_sample: ImuSample,
    pub ground_truth: Option<NavState>,
}

/// Capability interface of a state-estimation backend.
pub trait VioBackend: Send + Sync {
    /// Seed the navigation state from the first frame's data.
    fn initialize(&mut self, seed: BackendSeed);

    /// Summarize a stamped gyro window into the relative rotation used as a
    /// tracking prior.
    fn preintegrate_gyro(
        &self,
        stamps: &[Timestamp],
        samples: &[ImuSample],
    ) -> UnitQuaternion<f64>;

    /// Optimize one keyframe.
    fn process_keyframe(&mut self, input: BackendInput) -> BackendOutput;

    /// Body pose in world frame at the last processed keyframe.
    fn w_pose_b_lkf(&self) -> Isometry3<f64>;

    /// Landmarks inside the optimization time horizon, restricted to those
    /// with at least `min_observations` observations; optionally annotated
    /// with a per-landmark classification.
    fn landmarks_in_time_horizon(
        &self,
        min_observations: usize,
        with_types: bool,
    ) -> (PointsWithIdMap, Option<LandmarkTypeMap>);

    /// Every landmark position, re-reported on each call.
    fn points_3d(&self) -> Vec<Point3<f64>>;

    /// Marginal covariance of the current state.
    fn state_covariance(&self) -> DMatrix<f64>;

    fn shutdown(&mut self);
}

/// Construct the configured backend variant. The selector is a closed set;
/// it is never re-decided after this call.
pub fn build(selector: BackendSelector, calibration: StereoCalibration) -> Box<dyn VioBackend> {
    match selector {
        BackendSelector::Vanilla => {
            info!("using vanilla VIO backend");
            Box::new(VanillaBackend::new(calibration))
        }
        BackendSelector::Regular(modality) => {
            info!(?modality, "using regular VIO backend");
            Box::new(RegularBackend::new(calibration, modality))
        }
    }
}

/// Backend worker loop: pop a keyframe payload, optimize under the write
/// lock, push the result. Exits when the input queue is shut down.
pub fn spin(
    backend: Arc<RwLock<Box<dyn VioBackend>>>,
    input: Arc<ThreadsafeQueue<BackendInput>>,
    output: Arc<ThreadsafeQueue<BackendOutput>>,
) {
    info!("backend worker started");
    while let Some(payload) = input.blocking_pop() {
        let result = backend.write().process_keyframe(payload);
        output.push(result);
    }
    info!("backend worker exiting");
}
