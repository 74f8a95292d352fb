//! Mesh reconstruction worker.
//!
//! Consumes a landmark snapshot plus the latest keyframe and produces a 2D
//! image mesh, its 3D lift through the landmark map, and the planar
//! regularities detected among the 3D triangles. Runs on its own thread,
//! driven purely by its input queue.

use std::collections::HashMap;

use nalgebra::{Point3, Vector3};
use tracing::{debug, info};

use crate::pipeline::payloads::{MesherInput, MesherOutput};
use crate::pipeline::queue::ThreadsafeQueue;
use crate::types::{LandmarkId, Mesh3d, Plane, Triangle3d};

/// Quantization step for clustering triangle planes (normal and offset).
const PLANE_BUCKET_STEP: f64 = 0.2;

/// A plane needs at least this many triangles to be reported.
const MIN_TRIANGLES_PER_PLANE: usize = 3;

#[derive(Default)]
pub struct Mesher {
    keyframes_meshed: usize,
}

impl Mesher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker loop: exits when the input queue is shut down.
    pub fn run(
        &mut self,
        input: &ThreadsafeQueue<MesherInput>,
        output: &ThreadsafeQueue<MesherOutput>,
    ) {
        info!("mesher worker started");
        while let Some(payload) = input.blocking_pop() {
            output.push(self.process(payload));
        }
        info!(keyframes = self.keyframes_meshed, "mesher worker exiting");
    }

    fn process(&mut self, input: MesherInput) -> MesherOutput {
        self.keyframes_meshed += 1;

        let mesh_2d = input.frame.mesh_2d_stereo();

        // Lift only keypoints whose landmark survived optimization.
        let vertices: Vec<(LandmarkId, Point3<f64>)> = input
            .frame
            .keypoints
            .iter()
            .filter(|kp| kp.right.is_some())
            .filter_map(|kp| {
                input
                    .landmarks
                    .get(&kp.landmark_id)
                    .map(|p| (kp.landmark_id, *p))
            })
            .collect();

        let cam_from_world = input.w_pose_cam.inverse();
        let mut mesh_3d: Mesh3d = Vec::new();
        let mut triangle_ids: Vec<[LandmarkId; 3]> = Vec::new();
        for i in 1..vertices.len().saturating_sub(1) {
            let triangle = [vertices[0].1, vertices[i].1, vertices[i + 1].1];
            // Cull triangles behind the keyframe camera.
            let visible = triangle
                .iter()
                .all(|p| cam_from_world.transform_point(p).z > 0.0);
            if !visible {
                continue;
            }
            mesh_3d.push(triangle);
            triangle_ids.push([vertices[0].0, vertices[i].0, vertices[i + 1].0]);
        }

        let planes = detect_planes(&mesh_3d, &triangle_ids);
        debug!(
            triangles_2d = mesh_2d.len(),
            triangles_3d = mesh_3d.len(),
            planes = planes.len(),
            "mesher processed keyframe"
        );

        MesherOutput {
            mesh_2d,
            mesh_3d,
            planes,
        }
    }
}

fn triangle_plane(triangle: &Triangle3d) -> Option<(Vector3<f64>, f64)> {
    let edge_a = triangle[1] - triangle[0];
    let edge_b = triangle[2] - triangle[0];
    let normal = edge_a.cross(&edge_b);
    if normal.norm() < 1e-9 {
        return None;
    }
    let mut normal = normal.normalize();
    // Canonical orientation so opposite-winding triangles cluster together.
    if normal.z < 0.0 || (normal.z == 0.0 && normal.x < 0.0) {
        normal = -normal;
    }
    let distance = normal.dot(&triangle[0].coords);
    Some((normal, distance))
}

/// Cluster near-coplanar triangles into plane candidates.
fn detect_planes(mesh_3d: &Mesh3d, triangle_ids: &[[LandmarkId; 3]]) -> Vec<Plane> {
    let mut buckets: HashMap<[i64; 4], (Vector3<f64>, f64, Vec<LandmarkId>, usize)> =
        HashMap::new();

    for (triangle, ids) in mesh_3d.iter().zip(triangle_ids) {
        let Some((normal, distance)) = triangle_plane(triangle) else {
            continue;
        };
        let key = [
            (normal.x / PLANE_BUCKET_STEP).round() as i64,
            (normal.y / PLANE_BUCKET_STEP).round() as i64,
            (normal.z / PLANE_BUCKET_STEP).round() as i64,
            (distance / PLANE_BUCKET_STEP).round() as i64,
        ];
        let entry = buckets
            .entry(key)
            .or_insert_with(|| (normal, distance, Vec::new(), 0));
        entry.3 += 1;
        for &id in ids {
            if !entry.2.contains(&id) {
                entry.2.push(id);
            }
        }
    }

    let mut planes: Vec<Plane> = buckets
        .into_values()
        .filter(|(_, _, _, count)| *count >= MIN_TRIANGLES_PER_PLANE)
        .map(|(normal, distance, landmark_ids, _)| Plane {
            normal,
            distance,
            landmark_ids,
        })
        .collect();
    // Deterministic ordering for consumers and tests.
    planes.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    planes
}
