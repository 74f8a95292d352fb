use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use nalgebra::{Isometry3, Point2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

use stereo_vio::config::{
    BackendSelector, ExecutionMode, PipelineConfig, StereoCalibration, VisualizationType,
};
use stereo_vio::frontend::{StereoFrame, StereoImuSyncPacket, StereoKeypoint};
use stereo_vio::imu::ImuSample;
use stereo_vio::pipeline::VioPipeline;
use stereo_vio::types::Timestamp;

/// Drive the visual-inertial pipeline over a synthetic circular-trajectory
/// packet stream.
#[derive(Parser, Debug)]
#[command(name = "stereo-vio")]
struct Args {
    /// Request the sequential pipeline (not available; fails fatally).
    #[arg(long)]
    sequential: bool,

    /// Backend type: 0 vanilla VIO, 1 regular VIO.
    #[arg(long, default_value_t = 0)]
    backend_type: i32,

    /// Regular backend modality: 0 structureless, 1 projection, 2
    /// structureless+projection, 3 projection+regularity, 4 all.
    #[arg(long, default_value_t = 4)]
    regular_vio_backend_modality: i32,

    /// Enable overall visualization.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    visualize: bool,

    /// Visualization type: 0 pointcloud, 1 repeated pointcloud, 2 2D mesh,
    /// 4 sparse 2D mesh, 5 sparse 2D-to-3D mesh, 7 none.
    #[arg(long, default_value_t = 0)]
    viz_type: i32,

    /// Annotate landmark map queries with a per-landmark classification.
    #[arg(long)]
    visualize_lmk_type: bool,

    /// Enable smart feature selection (not thread safe; fatal once a
    /// keyframe dispatches in the parallel pipeline).
    #[arg(long)]
    use_feature_selection: bool,

    /// Minimum observation count for a landmark to reach the mesher.
    #[arg(long, default_value_t = 4)]
    min_num_obs_for_mesher_points: usize,

    /// Seed the random number generator for repeatable runs.
    #[arg(long)]
    deterministic_random_number_generator: bool,

    /// Number of synthetic frames to feed.
    #[arg(long, default_value_t = 200)]
    num_frames: usize,

    /// Optional JSON pipeline configuration; flags override its fields.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<(PipelineConfig, usize)> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => PipelineConfig::default(),
        };

        config.execution_mode = if self.sequential {
            ExecutionMode::Sequential
        } else {
            ExecutionMode::Parallel
        };
        config.backend =
            BackendSelector::from_codes(self.backend_type, self.regular_vio_backend_modality)?;
        config.visualize = self.visualize;
        config.viz_type = VisualizationType::try_from(self.viz_type)?;
        config.visualize_lmk_type = self.visualize_lmk_type;
        config.use_feature_selection = self.use_feature_selection;
        config.min_num_obs_for_mesher_points = self.min_num_obs_for_mesher_points;
        config.deterministic_rng = self.deterministic_random_number_generator;

        if config.calibration.is_none() {
            config.calibration = Some(StereoCalibration {
                focal_length: 458.0,
                principal_point: [367.2, 248.4],
                baseline: 0.11,
                b_pose_cam: Isometry3::identity(),
            });
        }
        Ok((config, self.num_frames))
    }
}

const FRAME_PERIOD_NS: Timestamp = 50_000_000;
const IMU_PERIOD_NS: Timestamp = 5_000_000;
const START_TIME_NS: Timestamp = 1_000_000_000;

/// Yaw rate of the synthetic circular trajectory (rad/s).
const YAW_RATE: f64 = 0.1;

struct SyntheticStream {
    rng: StdRng,
    num_landmarks: u64,
}

impl SyntheticStream {
    fn new(deterministic: bool) -> Self {
        let rng = if deterministic {
            StdRng::seed_from_u64(42)
        } else {
            StdRng::from_entropy()
        };
        Self {
            rng,
            num_landmarks: 48,
        }
    }

    fn noise(&mut self, scale: f64) -> f64 {
        self.rng.gen_range(-scale..scale)
    }

    fn packet(&mut self, frame_id: u64) -> StereoImuSyncPacket {
        let timestamp = START_TIME_NS + frame_id * FRAME_PERIOD_NS;

        // Window since the previous frame, closed by an interpolated sample
        // at the frame timestamp.
        let n_samples = (FRAME_PERIOD_NS / IMU_PERIOD_NS) as u64;
        let first_stamp = timestamp - FRAME_PERIOD_NS + IMU_PERIOD_NS;
        let mut imu_stamps = Vec::new();
        let mut imu_samples = Vec::new();
        for i in 0..n_samples {
            imu_stamps.push(first_stamp + i * IMU_PERIOD_NS);
            imu_samples.push(ImuSample::new(
                Vector3::new(self.noise(0.02), self.noise(0.02), 9.81 + self.noise(0.02)),
                Vector3::new(self.noise(0.002), self.noise(0.002), YAW_RATE + self.noise(0.002)),
            ));
        }

        // Stable landmark ids; keypoints drift slowly across the image as
        // the rig yaws.
        let drift = frame_id as f64 * 0.8;
        let keypoints = (0..self.num_landmarks)
            .map(|i| {
                let u = 40.0 + ((i % 8) as f64) * 80.0 + drift + self.noise(0.3);
                let v = 40.0 + ((i / 8) as f64) * 70.0 + self.noise(0.3);
                let disparity = 4.0 + ((i % 5) as f64) * 0.5;
                StereoKeypoint {
                    landmark_id: i,
                    left: Point2::new(u, v),
                    right: Some(Point2::new(u - disparity, v)),
                }
            })
            .collect();

        StereoImuSyncPacket::new(
            StereoFrame {
                frame_id,
                timestamp,
                keypoints,
            },
            imu_stamps,
            imu_samples,
        )
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (config, num_frames) = Args::parse().into_config()?;
    info!(?config, "pipeline configuration");

    let deterministic = config.deterministic_rng;
    let mut pipeline = VioPipeline::new(config);
    let mut stream = SyntheticStream::new(deterministic);

    for frame_id in 0..num_frames as u64 {
        pipeline.spin(stream.packet(frame_id))?;
    }

    let stats = pipeline.stats().clone();
    info!(
        frames = stats.frames_processed,
        keyframes = stats.keyframes_dispatched,
        renders = stats.visualizer_renders,
        "run complete"
    );
    pipeline.shutdown();
    Ok(())
}
