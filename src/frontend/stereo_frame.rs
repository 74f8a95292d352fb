//! Stereo frame data and the synchronized frame+IMU input packet.

use nalgebra::Point2;

use crate::imu::ImuSample;
use crate::types::{FrameId, Mesh2d, Timestamp};

/// One detected feature with its stereo correspondence.
#[derive(Debug, Clone)]
pub struct StereoKeypoint {
    pub landmark_id: crate::types::LandmarkId,
    /// Pixel position in the left rectified image.
    pub left: Point2<f64>,
    /// Matching position in the right rectified image; `None` when the
    /// stereo match failed or disparity was unusable.
    pub right: Option<Point2<f64>>,
}

/// A rectified stereo frame with its tracked keypoints.
#[derive(Debug, Clone)]
pub struct StereoFrame {
    pub frame_id: FrameId,
    pub timestamp: Timestamp,
    pub keypoints: Vec<StereoKeypoint>,
}

impl StereoFrame {
    /// Triangulate all left keypoints into a 2D image mesh.
    pub fn mesh_2d(&self) -> Mesh2d {
        Self::fan_triangulation(self.keypoints.iter().map(|kp| kp.left))
    }

    /// Triangulate only keypoints with a valid right match.
    pub fn mesh_2d_stereo(&self) -> Mesh2d {
        Self::fan_triangulation(
            self.keypoints
                .iter()
                .filter(|kp| kp.right.is_some())
                .map(|kp| kp.left),
        )
    }

    fn fan_triangulation(points: impl Iterator<Item = Point2<f64>>) -> Mesh2d {
        let points: Vec<Point2<f64>> = points.collect();
        if points.len() < 3 {
            return Vec::new();
        }
        (1..points.len() - 1)
            .map(|i| [points[0], points[i], points[i + 1]])
            .collect()
    }
}

/// Synchronized input packet: one stereo frame plus the inertial samples
/// since the previous frame.
///
/// The sample window is closed by a measurement interpolated at the frame
/// timestamp, so the last stamp always equals `frame.timestamp`.
#[derive(Debug, Clone)]
pub struct StereoImuSyncPacket {
    pub frame: StereoFrame,
    pub imu_stamps: Vec<Timestamp>,
    pub imu_samples: Vec<ImuSample>,
}

impl StereoImuSyncPacket {
    /// Panics when the packet violates its synchronization invariants:
    /// aligned stamp/sample counts, strictly increasing stamps, final stamp
    /// at the frame timestamp.
    pub fn new(frame: StereoFrame, imu_stamps: Vec<Timestamp>, imu_samples: Vec<ImuSample>) -> Self {
        assert_eq!(
            imu_stamps.len(),
            imu_samples.len(),
            "sync packet {}: {} stamps but {} samples",
            frame.frame_id,
            imu_stamps.len(),
            imu_samples.len()
        );
        assert!(
            !imu_stamps.is_empty(),
            "sync packet {}: empty imu window",
            frame.frame_id
        );
        assert!(
            imu_stamps.windows(2).all(|w| w[0] < w[1]),
            "sync packet {}: imu stamps not strictly increasing",
            frame.frame_id
        );
        assert_eq!(
            *imu_stamps.last().unwrap(),
            frame.timestamp,
            "sync packet {}: last imu stamp does not close at the frame timestamp",
            frame.frame_id
        );
        Self {
            frame,
            imu_stamps,
            imu_samples,
        }
    }
}
