//! Core identifier, landmark, plane and mesh types shared across the pipeline.

use std::collections::HashMap;

use nalgebra::{Isometry3, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::imu::ImuBias;

/// Timestamp in nanoseconds.
pub type Timestamp = u64;

/// Monotonic frame counter assigned by the data source.
pub type FrameId = u64;

/// Stable identifier of a tracked 3D scene point.
pub type LandmarkId = u64;

/// Landmark positions keyed by id, as returned by backend map queries.
pub type PointsWithIdMap = HashMap<LandmarkId, Point3<f64>>;

/// Optional landmark classification attached to map queries.
pub type LandmarkTypeMap = HashMap<LandmarkId, LandmarkType>;

/// How a landmark is represented inside the optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkType {
    /// Deferred triangulation: the landmark exists only as tracked rays.
    Smart,
    /// Explicit 3D value with projection observations.
    Projection,
}

/// A planar regularity extracted from the reconstructed mesh.
#[derive(Debug, Clone)]
pub struct Plane {
    /// Unit normal in world frame.
    pub normal: Vector3<f64>,
    /// Signed distance from the origin along `normal`.
    pub distance: f64,
    /// Landmarks currently associated with this plane.
    pub landmark_ids: Vec<LandmarkId>,
}

/// Triangle over 2D image keypoints.
pub type Triangle2d = [Point2<f64>; 3];

/// Triangle over 3D world points.
pub type Triangle3d = [Point3<f64>; 3];

/// 2D mesh: triangulation of image keypoints.
pub type Mesh2d = Vec<Triangle2d>;

/// 3D mesh: triangles lifted to world coordinates.
pub type Mesh3d = Vec<Triangle3d>;

/// Per-triangle RGB colors, as produced by a semantic segmentation callback.
pub type MeshColors = Vec<[u8; 3]>;

/// Full navigation state at a keyframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavState {
    /// Body pose in world frame (T_wb).
    pub pose: Isometry3<f64>,
    /// Velocity in world frame.
    pub velocity: Vector3<f64>,
    /// Current IMU bias estimate.
    pub imu_bias: ImuBias,
}

impl NavState {
    pub fn identity() -> Self {
        Self {
            pose: Isometry3::identity(),
            velocity: Vector3::zeros(),
            imu_bias: ImuBias::zero(),
        }
    }
}
