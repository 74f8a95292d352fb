//! Feature-tracking frontend interface and per-frame tracking products.
//!
//! The tracking algorithm itself (feature extraction, stereo matching,
//! RANSAC) lives behind the [`StereoFrontend`] trait; the pipeline only
//! depends on the per-frame [`TrackingResult`] and on access to the last two
//! processed frames for mesh and visualization queries.

pub mod stereo_frame;
pub mod tracking_frontend;

use nalgebra::{Isometry3, UnitQuaternion};

use crate::types::LandmarkId;

pub use stereo_frame::{StereoFrame, StereoImuSyncPacket, StereoKeypoint};
pub use tracking_frontend::TrackingFrontend;

/// Aggregate health of tracking for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStatus {
    Valid,
    LowDisparity,
    FewMatches,
    Invalid,
    Disabled,
}

/// Sparse per-landmark stereo observation without an explicit 3D value;
/// triangulation is deferred to the optimizer.
#[derive(Debug, Clone, Copy)]
pub struct StereoMeasurement {
    pub landmark_id: LandmarkId,
    pub u_left: f64,
    pub u_right: f64,
    pub v: f64,
}

/// What tracking produced for a single frame.
///
/// Consumed by the pipeline within one step; the orchestrator holds at most
/// the previous frame's result, which realizes the one-frame keyframe lag.
#[derive(Debug, Clone)]
pub struct TrackingResult {
    pub status: TrackingStatus,
    pub measurements: Vec<StereoMeasurement>,
    pub is_keyframe: bool,
}

/// Per-frame stereo tracking seam.
pub trait StereoFrontend: Send {
    /// Cold start on the very first frame; no tracking is performed.
    fn process_first_frame(&mut self, frame: StereoFrame);

    /// Track the given frame against internal state, using the preintegrated
    /// rotation from the last keyframe as a prior.
    fn process_frame(
        &mut self,
        frame: StereoFrame,
        prior_rotation: &UnitQuaternion<f64>,
    ) -> TrackingResult;

    /// The last frame declared a keyframe.
    fn last_keyframe(&self) -> &StereoFrame;

    /// The most recently processed frame.
    fn previous_frame(&self) -> &StereoFrame;

    /// Relative body pose between the last keyframe and the latest frame,
    /// as estimated by the tracking stage.
    fn relative_pose_body_stereo(&self) -> Isometry3<f64>;
}
