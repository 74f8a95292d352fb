//! Vanilla VIO backend: dead-reckoned navigation state with a stereo
//! landmark map maintained over a fixed time horizon.
//!
//! The factor-graph optimization itself is out of scope here; this variant
//! composes the tracking stage's relative pose, triangulates landmarks from
//! stereo disparity, and maintains observation counts, which is everything
//! the rest of the pipeline consumes.

use std::collections::HashMap;

use nalgebra::{DMatrix, Isometry3, Point3, UnitQuaternion};
use tracing::{debug, info};

use crate::config::StereoCalibration;
use crate::imu::{preintegrate_gyro, ImuSample};
use crate::pipeline::payloads::{BackendInput, BackendOutput};
use crate::types::{LandmarkId, LandmarkType, LandmarkTypeMap, NavState, PointsWithIdMap, Timestamp};

use super::{BackendSeed, VioBackend};

/// Landmarks unseen for longer than this fall out of the map.
const TIME_HORIZON_NS: Timestamp = 6_000_000_000;

/// Below this disparity a stereo match carries no usable depth.
const MIN_DISPARITY_PX: f64 = 0.5;

const NANOSECONDS_PER_SECOND: f64 = 1e9;

pub(crate) struct LandmarkEntry {
    pub position: Point3<f64>,
    pub n_observations: usize,
    pub last_seen: Timestamp,
}

pub struct VanillaBackend {
    calibration: StereoCalibration,
    state: NavState,
    timestamp_lkf: Timestamp,
    landmarks: HashMap<LandmarkId, LandmarkEntry>,
    keyframe_count: usize,
}

impl VanillaBackend {
    pub fn new(calibration: StereoCalibration) -> Self {
        Self {
            calibration,
            state: NavState::identity(),
            timestamp_lkf: 0,
            landmarks: HashMap::new(),
            keyframe_count: 0,
        }
    }

    /// Lift a stereo measurement into the world frame via disparity depth.
    fn triangulate(
        &self,
        u_left: f64,
        u_right: f64,
        v: f64,
        w_pose_cam: &Isometry3<f64>,
    ) -> Option<Point3<f64>> {
        let disparity = u_left - u_right;
        if disparity < MIN_DISPARITY_PX {
            return None;
        }
        let f = self.calibration.focal_length;
        let [cx, cy] = self.calibration.principal_point;
        let depth = f * self.calibration.baseline / disparity;
        let p_cam = Point3::new((u_left - cx) * depth / f, (v - cy) * depth / f, depth);
        Some(w_pose_cam.transform_point(&p_cam))
    }

    /// Shared keyframe bookkeeping; the regular variant layers on top.
    pub(crate) fn update_on_keyframe(&mut self, input: &BackendInput) {
        let dt = input.timestamp.saturating_sub(self.timestamp_lkf) as f64
            / NANOSECONDS_PER_SECOND;

        let previous_translation = self.state.pose.translation.vector;
        self.state.pose *= input.relative_pose;
        if dt > 0.0 {
            self.state.velocity =
                (self.state.pose.translation.vector - previous_translation) / dt;
        }

        let w_pose_cam = self.state.pose * self.calibration.b_pose_cam;
        let mut observed = 0usize;
        for m in &input.measurements {
            if let Some(position) = self.triangulate(m.u_left, m.u_right, m.v, &w_pose_cam) {
                observed += 1;
                self.landmarks
                    .entry(m.landmark_id)
                    .and_modify(|e| {
                        e.position = position;
                        e.n_observations += 1;
                        e.last_seen = input.timestamp;
                    })
                    .or_insert(LandmarkEntry {
                        position,
                        n_observations: 1,
                        last_seen: input.timestamp,
                    });
            }
        }

        let horizon_start = input.timestamp.saturating_sub(TIME_HORIZON_NS);
        self.landmarks.retain(|_, e| e.last_seen >= horizon_start);

        self.timestamp_lkf = input.timestamp;
        self.keyframe_count += 1;

        debug!(
            timestamp = input.timestamp,
            observed,
            map_size = self.landmarks.len(),
            "backend keyframe update"
        );
    }

    pub(crate) fn output(&self, timestamp: Timestamp) -> BackendOutput {
        BackendOutput {
            timestamp,
            state: self.state.clone(),
            landmarks: self.landmark_positions(),
        }
    }

    pub(crate) fn landmark_positions(&self) -> PointsWithIdMap {
        self.landmarks
            .iter()
            .map(|(&id, e)| (id, e.position))
            .collect()
    }

    pub(crate) fn landmarks_filtered(&self, min_observations: usize) -> PointsWithIdMap {
        self.landmarks
            .iter()
            .filter(|(_, e)| e.n_observations >= min_observations)
            .map(|(&id, e)| (id, e.position))
            .collect()
    }

    pub(crate) fn landmark_ids_filtered(&self, min_observations: usize) -> Vec<LandmarkId> {
        self.landmarks
            .iter()
            .filter(|(_, e)| e.n_observations >= min_observations)
            .map(|(&id, _)| id)
            .collect()
    }
}

impl VioBackend for VanillaBackend {
    fn initialize(&mut self, seed: BackendSeed) {
        if let Some(gt) = seed.ground_truth {
            self.state = gt;
        }
        // Static-rig assumption: the first gyro reading is pure bias.
        self.state.imu_bias.gyro = seed.imu_sample.gyro;
        self.timestamp_lkf = seed.timestamp;
        info!(timestamp = seed.timestamp, "backend initialized");
    }

    fn preintegrate_gyro(
        &self,
        stamps: &[Timestamp],
        samples: &[ImuSample],
    ) -> UnitQuaternion<f64> {
        preintegrate_gyro(stamps, samples, &self.state.imu_bias)
    }

    fn process_keyframe(&mut self, input: BackendInput) -> BackendOutput {
        self.update_on_keyframe(&input);
        self.output(input.timestamp)
    }

    fn w_pose_b_lkf(&self) -> Isometry3<f64> {
        self.state.pose
    }

    fn landmarks_in_time_horizon(
        &self,
        min_observations: usize,
        with_types: bool,
    ) -> (PointsWithIdMap, Option<LandmarkTypeMap>) {
        let points = self.landmarks_filtered(min_observations);
        let types = with_types.then(|| {
            points
                .keys()
                .map(|&id| (id, LandmarkType::Smart))
                .collect::<LandmarkTypeMap>()
        });
        (points, types)
    }

    fn points_3d(&self) -> Vec<Point3<f64>> {
        self.landmarks.values().map(|e| e.position).collect()
    }

    fn state_covariance(&self) -> DMatrix<f64> {
        // Pose (6) + velocity (3): marginals shrink as keyframes accumulate.
        DMatrix::identity(9, 9) / (1.0 + self.keyframe_count as f64)
    }

    fn shutdown(&mut self) {
        info!(
            keyframes = self.keyframe_count,
            landmarks = self.landmarks.len(),
            "backend shutdown"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{StereoMeasurement, TrackingStatus};
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, Vector3};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn calibration() -> StereoCalibration {
        StereoCalibration {
            focal_length: 400.0,
            principal_point: [320.0, 240.0],
            baseline: 0.1,
            b_pose_cam: Isometry3::identity(),
        }
    }

    fn keyframe_input(timestamp: Timestamp, measurements: Vec<StereoMeasurement>) -> BackendInput {
        BackendInput {
            timestamp,
            tracking_status: TrackingStatus::Valid,
            measurements,
            imu_stamps: vec![timestamp],
            imu_samples: vec![ImuSample::zero()],
            planes: Arc::new(Mutex::new(Vec::new())),
            relative_pose: Isometry3::from_parts(
                Translation3::new(1.0, 0.0, 0.0),
                UnitQuaternion::identity(),
            ),
        }
    }

    fn centered_measurement(id: LandmarkId, disparity: f64) -> StereoMeasurement {
        StereoMeasurement {
            landmark_id: id,
            u_left: 320.0,
            u_right: 320.0 - disparity,
            v: 240.0,
        }
    }

    #[test]
    fn test_pose_composes_relative_motion() {
        let mut backend = VanillaBackend::new(calibration());
        backend.initialize(BackendSeed {
            timestamp: 0,
            imu_sample: ImuSample::zero(),
            ground_truth: None,
        });
        let out = backend.process_keyframe(keyframe_input(1_000_000_000, vec![]));
        assert_relative_eq!(out.state.pose.translation.vector.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(out.state.velocity.x, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_disparity_depth_on_optical_axis() {
        let mut backend = VanillaBackend::new(calibration());
        // f * b / d = 400 * 0.1 / 4 = 10 m straight ahead.
        let input = BackendInput {
            relative_pose: Isometry3::identity(),
            ..keyframe_input(1, vec![centered_measurement(7, 4.0)])
        };
        let out = backend.process_keyframe(input);
        let p = out.landmarks[&7];
        assert_relative_eq!(p.z, 10.0, epsilon = 1e-9);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_low_disparity_measurements_are_skipped() {
        let mut backend = VanillaBackend::new(calibration());
        let out =
            backend.process_keyframe(keyframe_input(1, vec![centered_measurement(7, 0.1)]));
        assert!(out.landmarks.is_empty());
    }

    #[test]
    fn test_observation_count_filter() {
        let mut backend = VanillaBackend::new(calibration());
        backend.process_keyframe(keyframe_input(1, vec![centered_measurement(1, 4.0)]));
        backend.process_keyframe(keyframe_input(
            2,
            vec![centered_measurement(1, 4.0), centered_measurement(2, 4.0)],
        ));

        let (all, _) = backend.landmarks_in_time_horizon(0, false);
        assert_eq!(all.len(), 2);
        let (seen_twice, types) = backend.landmarks_in_time_horizon(2, true);
        assert_eq!(seen_twice.len(), 1);
        assert!(seen_twice.contains_key(&1));
        assert_eq!(types.unwrap()[&1], LandmarkType::Smart);
    }

    #[test]
    fn test_landmarks_expire_outside_time_horizon() {
        let mut backend = VanillaBackend::new(calibration());
        backend.process_keyframe(keyframe_input(1, vec![centered_measurement(1, 4.0)]));
        backend.process_keyframe(keyframe_input(
            TIME_HORIZON_NS + 2,
            vec![centered_measurement(2, 4.0)],
        ));
        let (points, _) = backend.landmarks_in_time_horizon(0, false);
        assert!(!points.contains_key(&1));
        assert!(points.contains_key(&2));
    }

    #[test]
    fn test_gyro_bias_seeded_from_first_sample() {
        let mut backend = VanillaBackend::new(calibration());
        let bias = Vector3::new(0.0, 0.0, 0.05);
        backend.initialize(BackendSeed {
            timestamp: 0,
            imu_sample: ImuSample::new(Vector3::zeros(), bias),
            ground_truth: None,
        });
        // A window rotating exactly at the bias rate preintegrates to zero.
        let stamps: Vec<Timestamp> = (0..5).map(|i| i * 10_000_000).collect();
        let samples = vec![ImuSample::new(Vector3::zeros(), bias); 5];
        let rot = backend.preintegrate_gyro(&stamps, &samples);
        assert_relative_eq!(rot.angle(), 0.0, epsilon = 1e-12);
    }
}
