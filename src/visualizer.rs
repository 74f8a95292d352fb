//! Visualization worker.
//!
//! Assembles a renderable [`VisualizerOutput`] from the keyframe's mesh and
//! point products. It owns no window: the orchestrator's display step (or an
//! external sink) decides what to do with the assembled frame.

use nalgebra::Point3;
use tracing::{debug, info};

use crate::config::VisualizationType;
use crate::pipeline::payloads::{VisualizerInput, VisualizerOutput};
use crate::pipeline::queue::ThreadsafeQueue;

#[derive(Default)]
pub struct Visualizer {
    frames_rendered: usize,
}

impl Visualizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker loop: exits when the input queue is shut down.
    pub fn run(
        &mut self,
        input: &ThreadsafeQueue<VisualizerInput>,
        output: &ThreadsafeQueue<VisualizerOutput>,
    ) {
        info!("visualizer worker started");
        while let Some(payload) = input.blocking_pop() {
            output.push(self.process(payload));
        }
        info!(frames = self.frames_rendered, "visualizer worker exiting");
    }

    fn process(&mut self, input: VisualizerInput) -> VisualizerOutput {
        self.frames_rendered += 1;

        let points: Vec<Point3<f64>> = match input.viz_type {
            VisualizationType::Pointcloud | VisualizationType::Mesh2dTo3dSparse => {
                input.landmarks.values().copied().collect()
            }
            VisualizationType::PointcloudRepeated => input.points_3d,
            VisualizationType::Mesh2d
            | VisualizationType::Mesh2dSparse
            | VisualizationType::None => Vec::new(),
        };

        let (mesh_2d, mesh_3d) = match input.mesher_output {
            Some(mesher) => (mesher.mesh_2d, mesher.mesh_3d),
            None => (input.mesh_2d, Vec::new()),
        };

        debug!(
            viz_type = ?input.viz_type,
            points = points.len(),
            triangles = mesh_3d.len(),
            planes = input.planes.len(),
            "visualizer assembled frame"
        );

        VisualizerOutput {
            viz_type: input.viz_type,
            timestamp: input.timestamp,
            pose: input.pose,
            points,
            mesh_2d,
            mesh_3d,
            colors: input.colors,
            plane_count: input.planes.len(),
        }
    }
}
