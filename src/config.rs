//! Pipeline configuration: closed option sets, fixed for the lifetime of a
//! run, plus the numeric flag codes accepted on the command line.

use anyhow::{bail, Error};
use nalgebra::Isometry3;
use serde::{Deserialize, Serialize};

use crate::types::NavState;

/// How pipeline stages are scheduled. Only the parallel pipeline is
/// implemented; selecting `Sequential` is a fatal misconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    Parallel,
    Sequential,
}

/// Factor composition used by the regular backend variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegularModality {
    /// Structureless factors only (equivalent to the vanilla backend).
    Structureless,
    /// Projection factors throughout.
    Projection,
    /// Structureless, switching to projection inside regularities.
    StructurelessProjection,
    /// Projection factors plus regularity constraints on a subset.
    ProjectionRegularity,
    /// Structureless, projection and regularity factors combined.
    All,
}

impl TryFrom<i32> for RegularModality {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self, Error> {
        Ok(match code {
            0 => Self::Structureless,
            1 => Self::Projection,
            2 => Self::StructurelessProjection,
            3 => Self::ProjectionRegularity,
            4 => Self::All,
            _ => bail!("requested regular backend modality {code} is not supported"),
        })
    }
}

/// Closed set of backend implementations, chosen once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendSelector {
    Vanilla,
    Regular(RegularModality),
}

impl BackendSelector {
    /// Build from the numeric backend-type and modality flag codes.
    pub fn from_codes(backend_type: i32, modality: i32) -> Result<Self, Error> {
        Ok(match backend_type {
            0 => Self::Vanilla,
            1 => Self::Regular(RegularModality::try_from(modality)?),
            _ => bail!("requested backend type {backend_type} is not supported"),
        })
    }
}

/// Which optional computation precedes visualizer-payload construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisualizationType {
    /// 3D positions of all landmarks in the time horizon.
    Pointcloud,
    /// Landmark positions re-plotted at every keyframe.
    PointcloudRepeated,
    /// 2D mesh over every left keypoint of the last keyframe.
    Mesh2d,
    /// 2D mesh restricted to right-valid keypoints.
    Mesh2dSparse,
    /// 2D mesh lifted to 3D through the mesher worker.
    Mesh2dTo3dSparse,
    /// No map visualization.
    None,
}

impl TryFrom<i32> for VisualizationType {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self, Error> {
        Ok(match code {
            0 => Self::Pointcloud,
            1 => Self::PointcloudRepeated,
            2 => Self::Mesh2d,
            4 => Self::Mesh2dSparse,
            5 => Self::Mesh2dTo3dSparse,
            7 => Self::None,
            _ => bail!("requested visualization type {code} is not supported"),
        })
    }
}

/// Rectified stereo rig calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StereoCalibration {
    pub focal_length: f64,
    pub principal_point: [f64; 2],
    /// Stereo baseline in meters. Must be positive.
    pub baseline: f64,
    /// Extrinsics: left rectified camera pose in the body frame.
    pub b_pose_cam: Isometry3<f64>,
}

impl StereoCalibration {
    pub fn is_valid(&self) -> bool {
        self.baseline > 0.0 && self.focal_length > 0.0
    }
}

/// All recognized pipeline options. Fixed for a run; never re-decided.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub execution_mode: ExecutionMode,
    pub backend: BackendSelector,
    pub visualize: bool,
    pub viz_type: VisualizationType,
    /// Smart feature selection. Not thread safe: fatal when a keyframe
    /// dispatches while worker threads are running.
    pub use_feature_selection: bool,
    /// Minimum observation count for a landmark to reach the mesher.
    pub min_num_obs_for_mesher_points: usize,
    /// Annotate landmark map queries with a per-landmark classification.
    pub visualize_lmk_type: bool,
    /// Seed the driver's random number generator for repeatable runs.
    pub deterministic_rng: bool,
    pub calibration: Option<StereoCalibration>,
    pub ground_truth_seed: Option<NavState>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Parallel,
            backend: BackendSelector::Vanilla,
            visualize: true,
            viz_type: VisualizationType::Pointcloud,
            use_feature_selection: false,
            min_num_obs_for_mesher_points: 4,
            visualize_lmk_type: false,
            deterministic_rng: false,
            calibration: None,
            ground_truth_seed: None,
        }
    }
}
