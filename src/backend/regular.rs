//! Regular VIO backend: the vanilla bookkeeping plus planar-regularity
//! handling, with the factor composition selected by a fixed modality.

use std::collections::HashSet;

use nalgebra::{DMatrix, Isometry3, Point3, UnitQuaternion};
use tracing::debug;

use crate::config::{RegularModality, StereoCalibration};
use crate::imu::ImuSample;
use crate::pipeline::payloads::{BackendInput, BackendOutput};
use crate::types::{LandmarkId, LandmarkType, LandmarkTypeMap, PointsWithIdMap, Timestamp};

use super::vanilla::VanillaBackend;
use super::{BackendSeed, VioBackend};

/// A landmark closer than this to a plane is absorbed by its regularity.
const PLANE_DISTANCE_TOLERANCE_M: f64 = 0.10;

pub struct RegularBackend {
    inner: VanillaBackend,
    modality: RegularModality,
    /// Landmarks currently constrained by a planar regularity.
    plane_landmarks: HashSet<LandmarkId>,
}

impl RegularBackend {
    pub fn new(calibration: StereoCalibration, modality: RegularModality) -> Self {
        Self {
            inner: VanillaBackend::new(calibration),
            modality,
            plane_landmarks: HashSet::new(),
        }
    }

    fn uses_regularities(&self) -> bool {
        matches!(
            self.modality,
            RegularModality::StructurelessProjection
                | RegularModality::ProjectionRegularity
                | RegularModality::All
        )
    }

    /// Re-associate map landmarks with the shared plane set.
    ///
    /// Runs while the orchestrator is blocked on this keyframe's output, so
    /// the plane set is never touched concurrently.
    fn refresh_regularities(&mut self, input: &BackendInput) {
        if !self.uses_regularities() {
            return;
        }
        let landmarks = self.inner.landmark_positions();
        let mut planes = input.planes.lock();
        self.plane_landmarks.clear();
        for plane in planes.iter_mut() {
            plane.landmark_ids = landmarks
                .iter()
                .filter(|(_, p)| {
                    (plane.normal.dot(&p.coords) - plane.distance).abs()
                        < PLANE_DISTANCE_TOLERANCE_M
                })
                .map(|(&id, _)| id)
                .collect();
            self.plane_landmarks.extend(plane.landmark_ids.iter().copied());
        }
        debug!(
            planes = planes.len(),
            constrained = self.plane_landmarks.len(),
            "regularities refreshed"
        );
    }

    fn classify(&self, id: LandmarkId) -> LandmarkType {
        match self.modality {
            RegularModality::Structureless => LandmarkType::Smart,
            RegularModality::Projection => LandmarkType::Projection,
            _ => {
                if self.plane_landmarks.contains(&id) {
                    LandmarkType::Projection
                } else {
                    LandmarkType::Smart
                }
            }
        }
    }
}

impl VioBackend for RegularBackend {
    fn initialize(&mut self, seed: BackendSeed) {
        self.inner.initialize(seed);
    }

    fn preintegrate_gyro(
        &self,
        stamps: &[Timestamp],
        samples: &[ImuSample],
    ) -> UnitQuaternion<f64> {
        self.inner.preintegrate_gyro(stamps, samples)
    }

    fn process_keyframe(&mut self, input: BackendInput) -> BackendOutput {
        self.inner.update_on_keyframe(&input);
        self.refresh_regularities(&input);
        self.inner.output(input.timestamp)
    }

    fn w_pose_b_lkf(&self) -> Isometry3<f64> {
        self.inner.w_pose_b_lkf()
    }

    fn landmarks_in_time_horizon(
        &self,
        min_observations: usize,
        with_types: bool,
    ) -> (PointsWithIdMap, Option<LandmarkTypeMap>) {
        let points = self.inner.landmarks_filtered(min_observations);
        let types = with_types.then(|| {
            self.inner
                .landmark_ids_filtered(min_observations)
                .into_iter()
                .map(|id| (id, self.classify(id)))
                .collect::<LandmarkTypeMap>()
        });
        (points, types)
    }

    fn points_3d(&self) -> Vec<Point3<f64>> {
        self.inner.points_3d()
    }

    fn state_covariance(&self) -> DMatrix<f64> {
        self.inner.state_covariance()
    }

    fn shutdown(&mut self) {
        self.inner.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{StereoMeasurement, TrackingStatus};
    use crate::types::Plane;
    use nalgebra::Vector3;
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

    fn input_with_planes(
        measurements: Vec<StereoMeasurement>,
        planes: Arc<Mutex<Vec<Plane>>>,
    ) -> BackendInput {
        BackendInput {
            timestamp: 1,
            tracking_status: TrackingStatus::Valid,
            measurements,
            imu_stamps: vec![1],
            imu_samples: vec![ImuSample::zero()],
            planes,
            relative_pose: Isometry3::identity(),
        }
    }

    // Depth f*b/d = 400*0.1/4 = 10 m on the optical axis.
    fn on_axis(id: LandmarkId) -> StereoMeasurement {
        StereoMeasurement {
            landmark_id: id,
            u_left: 320.0,
            u_right: 316.0,
            v: 240.0,
        }
    }

    #[test]
    fn test_plane_membership_classifies_projection() {
        let mut backend = RegularBackend::new(calibration(), RegularModality::All);
        let planes = Arc::new(Mutex::new(vec![Plane {
            normal: Vector3::new(0.0, 0.0, 1.0),
            distance: 10.0,
            landmark_ids: vec![],
        }]));

        backend.process_keyframe(input_with_planes(vec![on_axis(1)], Arc::clone(&planes)));

        assert_eq!(planes.lock()[0].landmark_ids, vec![1]);
        let (_, types) = backend.landmarks_in_time_horizon(0, true);
        assert_eq!(types.unwrap()[&1], LandmarkType::Projection);
    }

    #[test]
    fn test_structureless_modality_never_reclassifies() {
        let mut backend =
            RegularBackend::new(calibration(), RegularModality::Structureless);
        let planes = Arc::new(Mutex::new(Vec::new()));
        backend.process_keyframe(input_with_planes(vec![on_axis(1)], planes));
        let (_, types) = backend.landmarks_in_time_horizon(0, true);
        assert_eq!(types.unwrap()[&1], LandmarkType::Smart);
    }

    #[test]
    fn test_projection_modality_classifies_everything_projection() {
        let mut backend = RegularBackend::new(calibration(), RegularModality::Projection);
        let planes = Arc::new(Mutex::new(Vec::new()));
        backend.process_keyframe(input_with_planes(vec![on_axis(1)], planes));
        let (_, types) = backend.landmarks_in_time_horizon(0, true);
        assert_eq!(types.unwrap()[&1], LandmarkType::Projection);
    }
}
