//! Pipeline orchestrator.
//!
//! Drives the tracking -> optimization -> meshing -> visualization stages over
//! producer/consumer queues, owns the worker threads, accumulates the
//! inertial window between keyframes, and decides when a keyframe is handed
//! to the backend. Keyframe processing is strictly sequential: keyframe k's
//! visualize step completes before keyframe k+1's dispatch begins, which is
//! what makes the shared plane set safe without further locking discipline.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Result};
use nalgebra::{Isometry3, Point3};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backend::{self, BackendSeed, VioBackend};
use crate::config::{ExecutionMode, PipelineConfig, VisualizationType};
use crate::frontend::tracking_frontend::FrontendParams;
use crate::frontend::{
    StereoFrame, StereoFrontend, StereoImuSyncPacket, TrackingFrontend, TrackingResult,
};
use crate::imu::ImuAccumulationBuffer;
use crate::mesher::Mesher;
use crate::types::{
    LandmarkTypeMap, Mesh2d, Mesh3d, MeshColors, Plane, PointsWithIdMap, Timestamp,
};
use crate::visualizer::Visualizer;

use super::payloads::{
    BackendInput, BackendOutput, MesherInput, MesherOutput, VisualizerInput, VisualizerOutput,
};
use super::queue::ThreadsafeQueue;

/// Optional mesh-coloring strategy supplied by the embedding application;
/// absence is an explicit, type-checked state.
pub type SemanticSegmentationCallback =
    Box<dyn Fn(&StereoFrame, &Mesh2d, &Mesh3d) -> MeshColors + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Running,
    ShuttingDown,
    Stopped,
}

/// Monotonic counters maintained by the orchestrator thread only.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    /// Frames run through the per-frame procedure (the bootstrap packet is
    /// consumed by initialization and not counted).
    pub frames_processed: usize,
    pub keyframes_dispatched: usize,
    pub mesher_dispatches: usize,
    pub visualizer_renders: usize,
    pub displays_skipped: usize,
}

/// One directed worker edge: its input/output queue pair plus the thread
/// consuming the input. Keeping the three edges uniform centralizes the
/// shutdown ordering (close queues first, join after).
struct WorkerChannels<In, Out> {
    input: Arc<ThreadsafeQueue<In>>,
    output: Arc<ThreadsafeQueue<Out>>,
    worker: Option<JoinHandle<()>>,
}

impl<In, Out> WorkerChannels<In, Out> {
    fn new() -> Self {
        Self {
            input: Arc::new(ThreadsafeQueue::new()),
            output: Arc::new(ThreadsafeQueue::new()),
            worker: None,
        }
    }

    fn shutdown_queues(&self) {
        self.input.shutdown();
        self.output.shutdown();
    }

    fn join(&mut self, name: &str) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!(worker = name, "worker thread panicked before join");
            }
        }
    }
}

pub struct VioPipeline {
    config: PipelineConfig,
    state: PipelineState,

    frontend: Box<dyn StereoFrontend>,
    /// Built at initialization from the configured variant (or injected);
    /// shared with the backend worker thread.
    backend: Option<Arc<RwLock<Box<dyn VioBackend>>>>,

    /// Inertial samples accumulated since the last keyframe boundary.
    imu_window: ImuAccumulationBuffer,
    timestamp_lkf: Timestamp,
    /// Tracking result of the most recent frame; its keyframe flag becomes
    /// actionable only while processing the next frame.
    last_result: Option<TrackingResult>,

    /// Mesh-derived planar regularities, shared by reference with the
    /// backend; protected by the strict keyframe sequencing.
    planes: Arc<Mutex<Vec<Plane>>>,
    segmentation_callback: Option<SemanticSegmentationCallback>,

    backend_channels: WorkerChannels<BackendInput, BackendOutput>,
    mesher_channels: WorkerChannels<MesherInput, MesherOutput>,
    visualizer_channels: WorkerChannels<VisualizerInput, VisualizerOutput>,

    stats: PipelineStats,
}

impl VioPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let frontend = Box::new(TrackingFrontend::new(FrontendParams::default()));
        Self::with_components(config, frontend, None)
    }

    /// Construct with injected collaborators (stub frontends/backends in
    /// tests; alternative tracking stacks in embedders). A `None` backend is
    /// built from the configuration at initialization time.
    pub fn with_components(
        config: PipelineConfig,
        frontend: Box<dyn StereoFrontend>,
        backend: Option<Box<dyn VioBackend>>,
    ) -> Self {
        if config.execution_mode == ExecutionMode::Sequential {
            panic!("sequential pipeline execution is not available");
        }
        Self {
            config,
            state: PipelineState::Uninitialized,
            frontend,
            backend: backend.map(|b| Arc::new(RwLock::new(b))),
            imu_window: ImuAccumulationBuffer::new(),
            timestamp_lkf: 0,
            last_result: None,
            planes: Arc::new(Mutex::new(Vec::new())),
            segmentation_callback: None,
            backend_channels: WorkerChannels::new(),
            mesher_channels: WorkerChannels::new(),
            visualizer_channels: WorkerChannels::new(),
            stats: PipelineStats::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Timestamp the accumulation window currently starts from: the frame
    /// that triggered the last keyframe dispatch (not the keyframe itself).
    pub fn timestamp_last_keyframe(&self) -> Timestamp {
        self.timestamp_lkf
    }

    /// Snapshot of the current plane set.
    pub fn planes(&self) -> Vec<Plane> {
        self.planes.lock().clone()
    }

    pub fn register_semantic_segmentation_callback(
        &mut self,
        callback: SemanticSegmentationCallback,
    ) {
        self.segmentation_callback = Some(callback);
    }

    /// Top-level entry, called once per synchronized input packet.
    ///
    /// The very first call initializes the frontend and backend, launches
    /// the worker threads and returns: the bootstrap packet is not tracked
    /// and its inertial window is not accumulated. Calls after shutdown fail
    /// with an error rather than deadlocking.
    pub fn spin(&mut self, packet: StereoImuSyncPacket) -> Result<()> {
        match self.state {
            PipelineState::Uninitialized => {
                info!(frame_id = packet.frame.frame_id, "initializing pipeline");
                self.initialize(&packet);
                self.launch_workers();
                self.state = PipelineState::Running;
                Ok(())
            }
            PipelineState::Running => self.spin_once(packet),
            PipelineState::ShuttingDown | PipelineState::Stopped => {
                bail!("spin called on a shut-down pipeline")
            }
        }
    }

    /// Cold-start the frontend and seed the backend from the first packet.
    fn initialize(&mut self, packet: &StereoImuSyncPacket) {
        self.frontend.process_first_frame(packet.frame.clone());

        if self.backend.is_none() {
            let calibration = self
                .config
                .calibration
                .clone()
                .expect("stereo calibration is required to construct the backend");
            assert!(
                calibration.is_valid(),
                "invalid stereo calibration: baseline and focal length must be positive"
            );
            self.backend = Some(Arc::new(RwLock::new(backend::build(
                self.config.backend,
                calibration,
            ))));
        }

        self.backend().write().initialize(BackendSeed {
            timestamp: packet.frame.timestamp,
            imu_sample: packet.imu_samples[0],
            ground_truth: self.config.ground_truth_seed.clone(),
        });
        self.timestamp_lkf = packet.frame.timestamp;
    }

    /// Spawn exactly one thread per worker, each bound to its queue pair.
    /// Must run after `initialize` and before any keyframe dispatch.
    fn launch_workers(&mut self) {
        assert!(
            self.backend_channels.worker.is_none(),
            "worker threads already launched"
        );

        let backend = Arc::clone(self.backend());
        let backend_in = Arc::clone(&self.backend_channels.input);
        let backend_out = Arc::clone(&self.backend_channels.output);
        self.backend_channels.worker = Some(thread::spawn(move || {
            backend::spin(backend, backend_in, backend_out);
        }));

        let mesher_in = Arc::clone(&self.mesher_channels.input);
        let mesher_out = Arc::clone(&self.mesher_channels.output);
        self.mesher_channels.worker = Some(thread::spawn(move || {
            Mesher::new().run(&mesher_in, &mesher_out);
        }));

        let visualizer_in = Arc::clone(&self.visualizer_channels.input);
        let visualizer_out = Arc::clone(&self.visualizer_channels.output);
        self.visualizer_channels.worker = Some(thread::spawn(move || {
            Visualizer::new().run(&visualizer_in, &visualizer_out);
        }));
    }

    /// Per-frame procedure for every packet after the bootstrap one.
    fn spin_once(&mut self, packet: StereoImuSyncPacket) -> Result<()> {
        let StereoImuSyncPacket {
            frame,
            imu_stamps,
            imu_samples,
        } = packet;
        let timestamp_k = frame.timestamp;
        let frame_id = frame.frame_id;
        debug!(frame_id, "processing frame");

        // Accumulate this packet's window onto [last keyframe, now].
        self.imu_window.append(&imu_stamps, &imu_samples);

        // Rotation prior over the accumulated window, for the tracking stage.
        let prior = self
            .backend()
            .read()
            .preintegrate_gyro(self.imu_window.stamps(), self.imu_window.samples());

        let result = self.frontend.process_frame(frame, &prior);

        // The keyframe flag of frame k-1 becomes actionable only now that
        // frame k has been ingested; dispatch uses frame k-1's result.
        let previous = self.last_result.replace(result);
        if let Some(previous) = previous {
            if previous.is_keyframe {
                info!(
                    frame_id,
                    measurements = previous.measurements.len(),
                    "dispatching keyframe"
                );
                self.process_keyframe(previous, timestamp_k)?;
                self.imu_window.clear();
                self.timestamp_lkf = timestamp_k;
                self.stats.keyframes_dispatched += 1;
            }
        }

        self.stats.frames_processed += 1;
        Ok(())
    }

    fn process_keyframe(&mut self, result: TrackingResult, timestamp_k: Timestamp) -> Result<()> {
        // Feature selection mutates tracking state that the workers read; it
        // cannot run while they do. Fatal, not recoverable.
        if self.config.use_feature_selection {
            panic!("feature selection cannot be used while worker threads are running");
        }

        // Unbounded push: no backpressure on the backend input edge.
        self.backend_channels.input.push(BackendInput {
            timestamp: timestamp_k,
            tracking_status: result.status,
            measurements: result.measurements,
            imu_stamps: self.imu_window.stamps().to_vec(),
            imu_samples: self.imu_window.samples().to_vec(),
            planes: Arc::clone(&self.planes),
            relative_pose: self.frontend.relative_pose_body_stereo(),
        });

        // Stall until the backend finishes this keyframe; backend throughput
        // bounds end-to-end keyframe latency.
        let Some(backend_output) = self.backend_channels.output.blocking_pop() else {
            bail!("backend output queue shut down while a keyframe was in flight");
        };
        debug!(timestamp = backend_output.timestamp, "backend output received");

        let (mesh_2d, landmarks, landmark_types, mesher_output, points_3d) =
            self.visualization_precomputation();

        if self.config.visualize {
            let colors = match (&self.segmentation_callback, &mesher_output) {
                (Some(callback), Some(mesher)) => callback(
                    self.frontend.last_keyframe(),
                    &mesher.mesh_2d,
                    &mesher.mesh_3d,
                ),
                _ => MeshColors::new(),
            };
            self.visualizer_channels.input.push(VisualizerInput {
                viz_type: self.config.viz_type,
                pose: self.backend().read().w_pose_b_lkf() * self.b_pose_cam(),
                mesh_2d,
                colors,
                frame: self.frontend.last_keyframe().clone(),
                mesher_output,
                landmarks,
                landmark_types,
                planes: self.planes.lock().clone(),
                points_3d,
                timestamp: timestamp_k,
            });
            // The pop is blocking even though nothing consumes the display
            // result: it bounds the visualizer backlog at the cost of
            // throttling the pipeline to visualizer speed.
            match self.visualizer_channels.output.blocking_pop() {
                Some(output) => self.spin_display_once(output),
                None => {
                    warn!("visualizer is lagging behind pipeline processing");
                    self.stats.displays_skipped += 1;
                }
            }
        }

        Ok(())
    }

    /// The optional expensive computation selected by the fixed
    /// visualization mode. Exactly one arm runs per keyframe.
    #[allow(clippy::type_complexity)]
    fn visualization_precomputation(
        &mut self,
    ) -> (
        Mesh2d,
        PointsWithIdMap,
        Option<LandmarkTypeMap>,
        Option<MesherOutput>,
        Vec<Point3<f64>>,
    ) {
        let mut mesh_2d = Mesh2d::new();
        let mut landmarks = PointsWithIdMap::new();
        let mut landmark_types = None;
        let mut mesher_output = None;
        let mut points_3d = Vec::new();

        match self.config.viz_type {
            VisualizationType::Mesh2d => {
                mesh_2d = self.frontend.last_keyframe().mesh_2d();
            }
            VisualizationType::Mesh2dSparse => {
                mesh_2d = self.frontend.last_keyframe().mesh_2d_stereo();
            }
            VisualizationType::Mesh2dTo3dSparse => {
                let (points, types) = self.backend().read().landmarks_in_time_horizon(
                    self.config.min_num_obs_for_mesher_points,
                    self.config.visualize_lmk_type,
                );
                landmarks = points;
                landmark_types = types;

                let w_pose_cam = self.backend().read().w_pose_b_lkf() * self.b_pose_cam();
                self.mesher_channels.input.push(MesherInput {
                    landmarks: landmarks.clone(),
                    frame: self.frontend.last_keyframe().clone(),
                    w_pose_cam,
                });
                self.stats.mesher_dispatches += 1;

                // A mesh is never skipped: block until the mesher delivers.
                mesher_output = self.mesher_channels.output.blocking_pop();
                match &mesher_output {
                    Some(output) => {
                        *self.planes.lock() = output.planes.clone();
                    }
                    None => warn!("mesher output queue did not pop a payload"),
                }
            }
            VisualizationType::PointcloudRepeated => {
                points_3d = self.backend().read().points_3d();
            }
            VisualizationType::Pointcloud => {
                landmarks = self.backend().read().landmarks_in_time_horizon(0, false).0;
            }
            VisualizationType::None => {}
        }

        (mesh_2d, landmarks, landmark_types, mesher_output, points_3d)
    }

    /// Hand the assembled display state to whatever sink is attached; the
    /// pipeline core only logs it.
    fn spin_display_once(&mut self, output: VisualizerOutput) {
        if output.viz_type != VisualizationType::None {
            info!(
                timestamp = output.timestamp,
                points = output.points.len(),
                triangles = output.mesh_3d.len(),
                planes = output.plane_count,
                "display frame"
            );
        }
        self.stats.visualizer_renders += 1;
    }

    /// Close every queue, signal the backend, join all workers. Safe to call
    /// more than once.
    pub fn shutdown(&mut self) {
        if self.state == PipelineState::Stopped {
            return;
        }
        info!("shutting down pipeline");
        self.state = PipelineState::ShuttingDown;

        // Close all six queues before joining anything: workers blocked on
        // their input and any dispatch blocked on an output must all wake.
        self.backend_channels.shutdown_queues();
        self.mesher_channels.shutdown_queues();
        self.visualizer_channels.shutdown_queues();
        if let Some(backend) = &self.backend {
            backend.write().shutdown();
        }

        self.backend_channels.join("backend");
        self.mesher_channels.join("mesher");
        self.visualizer_channels.join("visualizer");

        self.state = PipelineState::Stopped;
        info!(
            frames = self.stats.frames_processed,
            keyframes = self.stats.keyframes_dispatched,
            "pipeline stopped"
        );
    }

    fn backend(&self) -> &Arc<RwLock<Box<dyn VioBackend>>> {
        self.backend.as_ref().expect("backend not initialized")
    }

    fn b_pose_cam(&self) -> Isometry3<f64> {
        self.config
            .calibration
            .as_ref()
            .map(|c| c.b_pose_cam)
            .unwrap_or_else(Isometry3::identity)
    }
}

impl Drop for VioPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
