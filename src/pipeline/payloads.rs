//! Payloads handed wholesale between the orchestrator and its workers.
//!
//! Each payload is created once, pushed once, and consumed exactly once;
//! ownership transfers with the value through its queue. The only shared
//! reference is the plane set, protected by the pipeline's strict
//! one-keyframe-at-a-time sequencing.

use std::sync::Arc;

use nalgebra::{Isometry3, Point3};
use parking_lot::Mutex;

use crate::config::VisualizationType;
use crate::frontend::{StereoFrame, StereoMeasurement, TrackingStatus};
use crate::imu::ImuSample;
use crate::types::{
    LandmarkTypeMap, Mesh2d, Mesh3d, MeshColors, NavState, Plane, PointsWithIdMap, Timestamp,
};

/// Everything the backend needs to optimize one keyframe.
pub struct BackendInput {
    pub timestamp: Timestamp,
    /// Stereo tracking health for the dispatched keyframe.
    pub tracking_status: TrackingStatus,
    pub measurements: Vec<StereoMeasurement>,
    /// Inertial window spanning [last keyframe, this keyframe's successor].
    pub imu_stamps: Vec<Timestamp>,
    pub imu_samples: Vec<ImuSample>,
    /// Shared plane set; read-only for the backend while a keyframe is in
    /// flight.
    pub planes: Arc<Mutex<Vec<Plane>>>,
    /// Relative body pose estimated by the tracking stage.
    pub relative_pose: Isometry3<f64>,
}

/// Result of optimizing one keyframe.
pub struct BackendOutput {
    pub timestamp: Timestamp,
    pub state: NavState,
    /// Landmark map snapshot at this keyframe.
    pub landmarks: PointsWithIdMap,
}

/// Snapshot the mesher turns into 2D/3D meshes.
pub struct MesherInput {
    pub landmarks: PointsWithIdMap,
    /// Last keyframe's stereo frame.
    pub frame: StereoFrame,
    /// Left camera pose in world frame at that keyframe.
    pub w_pose_cam: Isometry3<f64>,
}

/// Mesh products plus planar regularities detected in them.
pub struct MesherOutput {
    pub mesh_2d: Mesh2d,
    pub mesh_3d: Mesh3d,
    pub planes: Vec<Plane>,
}

/// Everything the visualizer needs to assemble one rendered keyframe.
pub struct VisualizerInput {
    pub viz_type: VisualizationType,
    /// Camera pose for trajectory display.
    pub pose: Isometry3<f64>,
    /// 2D mesh built directly from frontend features (mesh-only modes).
    pub mesh_2d: Mesh2d,
    /// Per-triangle colors from the semantic segmentation callback, empty
    /// when no callback is registered.
    pub colors: MeshColors,
    /// Last keyframe's frame, for image-space overlays.
    pub frame: StereoFrame,
    pub mesher_output: Option<MesherOutput>,
    pub landmarks: PointsWithIdMap,
    pub landmark_types: Option<LandmarkTypeMap>,
    /// Snapshot of the plane set at this keyframe.
    pub planes: Vec<Plane>,
    /// Repeated point cloud, used by [`VisualizationType::PointcloudRepeated`].
    pub points_3d: Vec<Point3<f64>>,
    pub timestamp: Timestamp,
}

/// Renderable display state; actual screen rendering happens outside the
/// pipeline core.
pub struct VisualizerOutput {
    pub viz_type: VisualizationType,
    pub timestamp: Timestamp,
    pub pose: Isometry3<f64>,
    pub points: Vec<Point3<f64>>,
    pub mesh_2d: Mesh2d,
    pub mesh_3d: Mesh3d,
    pub colors: MeshColors,
    pub plane_count: usize,
}
