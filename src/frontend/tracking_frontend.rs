//! Reference frontend: landmark-id bookkeeping with a time/track-count
//! keyframe policy.
//!
//! Feature extraction and stereo matching are assumed to have happened
//! upstream (keypoints arrive with persistent landmark ids), so tracking
//! reduces to overlap counting against the previous frame. The relative pose
//! estimate carries the gyro prior's rotation with zero translation;
//! translation recovery belongs to the optimization stage.

use std::collections::HashSet;

use nalgebra::{Isometry3, Translation3, UnitQuaternion};
use tracing::debug;

use crate::types::Timestamp;

use super::stereo_frame::StereoFrame;
use super::{StereoFrontend, StereoMeasurement, TrackingResult, TrackingStatus};

/// Keyframe policy and health thresholds.
#[derive(Debug, Clone, Copy)]
pub struct FrontendParams {
    /// Declare a keyframe once this much time has passed since the last one.
    pub intra_keyframe_time_ns: Timestamp,
    /// Declare a keyframe (and report `FewMatches`) below this track count.
    pub min_tracked_features: usize,
    /// Report `LowDisparity` below this many right-valid keypoints.
    pub min_stereo_features: usize,
}

impl Default for FrontendParams {
    fn default() -> Self {
        Self {
            intra_keyframe_time_ns: 200_000_000,
            min_tracked_features: 20,
            min_stereo_features: 10,
        }
    }
}

/// Reference [`StereoFrontend`] implementation.
pub struct TrackingFrontend {
    params: FrontendParams,
    previous_frame: Option<StereoFrame>,
    last_keyframe: Option<StereoFrame>,
    relative_pose: Isometry3<f64>,
}

impl TrackingFrontend {
    pub fn new(params: FrontendParams) -> Self {
        Self {
            params,
            previous_frame: None,
            last_keyframe: None,
            relative_pose: Isometry3::identity(),
        }
    }

    fn measurements_of(frame: &StereoFrame) -> Vec<StereoMeasurement> {
        frame
            .keypoints
            .iter()
            .filter_map(|kp| {
                kp.right.map(|right| StereoMeasurement {
                    landmark_id: kp.landmark_id,
                    u_left: kp.left.x,
                    u_right: right.x,
                    v: kp.left.y,
                })
            })
            .collect()
    }
}

impl StereoFrontend for TrackingFrontend {
    fn process_first_frame(&mut self, frame: StereoFrame) {
        debug!(frame_id = frame.frame_id, "frontend cold start");
        self.last_keyframe = Some(frame.clone());
        self.previous_frame = Some(frame);
    }

    fn process_frame(
        &mut self,
        frame: StereoFrame,
        prior_rotation: &UnitQuaternion<f64>,
    ) -> TrackingResult {
        let previous = self
            .previous_frame
            .as_ref()
            .expect("process_frame called before process_first_frame");

        let previous_ids: HashSet<_> = previous.keypoints.iter().map(|kp| kp.landmark_id).collect();
        let tracked = frame
            .keypoints
            .iter()
            .filter(|kp| previous_ids.contains(&kp.landmark_id))
            .count();

        let measurements = Self::measurements_of(&frame);
        let status = if measurements.len() < self.params.min_stereo_features {
            TrackingStatus::LowDisparity
        } else if tracked < self.params.min_tracked_features {
            TrackingStatus::FewMatches
        } else {
            TrackingStatus::Valid
        };

        let last_kf = self
            .last_keyframe
            .as_ref()
            .expect("process_frame called before process_first_frame");
        let elapsed = frame.timestamp.saturating_sub(last_kf.timestamp);
        let is_keyframe = elapsed >= self.params.intra_keyframe_time_ns
            || tracked < self.params.min_tracked_features;

        debug!(
            frame_id = frame.frame_id,
            tracked,
            stereo = measurements.len(),
            ?status,
            is_keyframe,
            "frontend processed frame"
        );

        self.relative_pose =
            Isometry3::from_parts(Translation3::identity(), *prior_rotation);
        if is_keyframe {
            self.last_keyframe = Some(frame.clone());
        }
        self.previous_frame = Some(frame);

        TrackingResult {
            status,
            measurements,
            is_keyframe,
        }
    }

    fn last_keyframe(&self) -> &StereoFrame {
        self.last_keyframe
            .as_ref()
            .expect("frontend not initialized")
    }

    fn previous_frame(&self) -> &StereoFrame {
        self.previous_frame
            .as_ref()
            .expect("frontend not initialized")
    }

    fn relative_pose_body_stereo(&self) -> Isometry3<f64> {
        self.relative_pose
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::StereoKeypoint;
    use nalgebra::Point2;

    fn frame(id: u64, timestamp: Timestamp, first_lmk: u64, n: usize) -> StereoFrame {
        StereoFrame {
            frame_id: id,
            timestamp,
            keypoints: (0..n as u64)
                .map(|i| StereoKeypoint {
                    landmark_id: first_lmk + i,
                    left: Point2::new(i as f64, 2.0),
                    right: Some(Point2::new(i as f64 - 3.0, 2.0)),
                })
                .collect(),
        }
    }

    fn frontend() -> TrackingFrontend {
        TrackingFrontend::new(FrontendParams {
            intra_keyframe_time_ns: 100,
            min_tracked_features: 5,
            min_stereo_features: 3,
        })
    }

    #[test]
    fn test_keyframe_after_intra_keyframe_time() {
        let mut fe = frontend();
        fe.process_first_frame(frame(0, 0, 0, 10));
        let prior = UnitQuaternion::identity();

        let r1 = fe.process_frame(frame(1, 50, 0, 10), &prior);
        assert!(!r1.is_keyframe);
        let r2 = fe.process_frame(frame(2, 120, 0, 10), &prior);
        assert!(r2.is_keyframe);
        assert_eq!(fe.last_keyframe().frame_id, 2);
    }

    #[test]
    fn test_keyframe_on_track_loss() {
        let mut fe = frontend();
        fe.process_first_frame(frame(0, 0, 0, 10));
        // Disjoint landmark ids: nothing tracked from the previous frame.
        let r = fe.process_frame(frame(1, 10, 100, 10), &UnitQuaternion::identity());
        assert!(r.is_keyframe);
        assert_eq!(r.status, TrackingStatus::FewMatches);
    }

    #[test]
    fn test_valid_status_and_measurements() {
        let mut fe = frontend();
        fe.process_first_frame(frame(0, 0, 0, 10));
        let r = fe.process_frame(frame(1, 10, 0, 10), &UnitQuaternion::identity());
        assert_eq!(r.status, TrackingStatus::Valid);
        assert_eq!(r.measurements.len(), 10);
        assert!(!r.is_keyframe);
    }

    #[test]
    fn test_relative_pose_carries_rotation_prior() {
        let mut fe = frontend();
        fe.process_first_frame(frame(0, 0, 0, 10));
        let prior = UnitQuaternion::from_scaled_axis(nalgebra::Vector3::new(0.0, 0.0, 0.3));
        fe.process_frame(frame(1, 10, 0, 10), &prior);
        let pose = fe.relative_pose_body_stereo();
        assert!((pose.rotation.angle() - 0.3).abs() < 1e-12);
        assert_eq!(pose.translation.vector, nalgebra::Vector3::zeros());
    }
}
