//! Single-threaded actor wiring reflector extraction, data association, the
//! EKF-SLAM estimator, and prior-map persistence into one SLAM node.
//!
//! The message-bus transport that actually delivers odometry, scans, and
//! point clouds is out of scope here; this module owns everything downstream
//! of "a message arrived": the monotonic clock guard, extraction,
//! association, update, augmentation, and the load/save of the prior map.
//! `odom_rx`/`scan_rx`/`cloud_rx` are the channel-shaped stand-in for that
//! external bus.

use ekf_slam::{AssociationConfig, EkfSlam, NoiseConfig, ObservationSummary};
use nalgebra::Matrix2;
use priormap::{PriorMap, PriorMapError};
use reflectors::{CloudConfig, ExtractionError, ScanConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use transforms::Transform2D;
use types::{LaserScanMsg, OdometryMsg, Pose, PointCloudMsg};

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("reflector extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("prior-map I/O failed: {0}")]
    PriorMap(#[from] PriorMapError),
}

/// TOML-loaded file configuration (`slam_node.toml`). CLI flags in `Args`
/// (the binary's `main`) override individual fields after this is parsed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub use_3d: bool,
    pub scan_topic: String,
    pub points_topic: String,
    pub odom_topic: String,
    pub start_pose: [f64; 3],
    pub map_path: Option<String>,
    /// Sensor extrinsic `(x, y, theta)` relative to the robot base.
    pub extrinsic: [f64; 3],
    pub scan: ScanConfigFile,
    pub cloud: CloudConfigFile,
    /// Process-noise diagonal `(var_v, var_omega)`.
    pub q_u: [f64; 2],
    /// Measurement-noise diagonal `(var_x, var_y)`.
    pub q_t: [f64; 2],
    pub association: AssociationConfigFile,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            use_3d: false,
            scan_topic: "/scan".to_string(),
            points_topic: "/points".to_string(),
            odom_topic: "/odom".to_string(),
            start_pose: [0.0, 0.0, 0.0],
            map_path: None,
            extrinsic: [0.13686, 0.0, 0.0],
            scan: ScanConfigFile::default(),
            cloud: CloudConfigFile::default(),
            q_u: [0.05 * 0.05, 0.068 * 0.068],
            q_t: [0.05 * 0.05, 0.05 * 0.05],
            association: AssociationConfigFile::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ScanConfigFile {
    pub range_min: f64,
    pub range_max: f64,
    pub intensity_min: f64,
    pub reflector_min_length: f64,
    pub reflector_length_error: f64,
    pub max_bridge_gap: usize,
    pub max_bridge_range_jump: f64,
}

impl Default for ScanConfigFile {
    fn default() -> Self {
        let d = ScanConfig::default();
        Self {
            range_min: d.range_min,
            range_max: d.range_max,
            intensity_min: d.intensity_min,
            reflector_min_length: d.reflector_min_length,
            reflector_length_error: d.reflector_length_error,
            max_bridge_gap: d.max_bridge_gap,
            max_bridge_range_jump: d.max_bridge_range_jump,
        }
    }
}

impl From<ScanConfigFile> for ScanConfig {
    fn from(f: ScanConfigFile) -> Self {
        Self {
            range_min: f.range_min,
            range_max: f.range_max,
            intensity_min: f.intensity_min,
            reflector_min_length: f.reflector_min_length,
            reflector_length_error: f.reflector_length_error,
            max_bridge_gap: f.max_bridge_gap,
            max_bridge_range_jump: f.max_bridge_range_jump,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CloudConfigFile {
    pub intensity_min: f64,
    pub outlier_k: usize,
    pub outlier_stddev_mul: f64,
    pub cluster_tolerance: f64,
    pub cluster_min_size: usize,
    pub cluster_max_size: usize,
}

impl Default for CloudConfigFile {
    fn default() -> Self {
        let d = CloudConfig::default();
        Self {
            intensity_min: d.intensity_min,
            outlier_k: d.outlier_k,
            outlier_stddev_mul: d.outlier_stddev_mul,
            cluster_tolerance: d.cluster_tolerance,
            cluster_min_size: d.cluster_min_size,
            cluster_max_size: d.cluster_max_size,
        }
    }
}

impl From<CloudConfigFile> for CloudConfig {
    fn from(f: CloudConfigFile) -> Self {
        Self {
            intensity_min: f.intensity_min,
            outlier_k: f.outlier_k,
            outlier_stddev_mul: f.outlier_stddev_mul,
            cluster_tolerance: f.cluster_tolerance,
            cluster_min_size: f.cluster_min_size,
            cluster_max_size: f.cluster_max_size,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct AssociationConfigFile {
    pub prior_map_gate: f64,
    pub state_gate: f64,
}

impl Default for AssociationConfigFile {
    fn default() -> Self {
        let d = AssociationConfig::default();
        Self {
            prior_map_gate: d.prior_map_gate,
            state_gate: d.state_gate,
        }
    }
}

impl From<AssociationConfigFile> for AssociationConfig {
    fn from(f: AssociationConfigFile) -> Self {
        Self {
            prior_map_gate: f.prior_map_gate,
            state_gate: f.state_gate,
        }
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&text)?)
        } else {
            warn!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }
}

/// The single-threaded SLAM actor: owns the filter and the extraction
/// configs, and is the only thing permitted to mutate them.
pub struct SlamActor {
    filter: EkfSlam,
    scan_config: ScanConfig,
    cloud_config: CloudConfig,
    extrinsic: Transform2D,
}

impl SlamActor {
    pub fn new(config: &FileConfig, prior_map: PriorMap) -> Self {
        let start_pose = Pose {
            x: config.start_pose[0],
            y: config.start_pose[1],
            theta: config.start_pose[2],
        };
        let noise = NoiseConfig {
            q_u: Matrix2::new(config.q_u[0], 0.0, 0.0, config.q_u[1]),
            q_t: Matrix2::new(config.q_t[0], 0.0, 0.0, config.q_t[1]),
        };
        let filter = EkfSlam::new(start_pose, noise, prior_map, config.association.into(), 0.0);
        let extrinsic = Transform2D::new(config.extrinsic[0], config.extrinsic[1], config.extrinsic[2]);

        Self {
            filter,
            scan_config: config.scan.into(),
            cloud_config: config.cloud.into(),
            extrinsic,
        }
    }

    pub fn filter(&self) -> &EkfSlam {
        &self.filter
    }

    /// Odometry messages at or before the filter clock are dropped: the
    /// monotonic clock guard.
    pub fn on_odometry(&mut self, msg: OdometryMsg) {
        if msg.stamp <= self.filter.clock() {
            debug!(stamp = msg.stamp, clock = self.filter.clock(), "dropping stale odometry");
            return;
        }
        self.filter.predict(msg.linear, msg.angular, msg.stamp);
    }

    /// Scans are always processed, regardless of their timestamp relative to
    /// the filter clock (only a warning is raised on non-monotonic input).
    pub fn on_scan(&mut self, msg: LaserScanMsg) -> Result<ObservationSummary, NodeError> {
        if msg.stamp < self.filter.clock() {
            warn!(stamp = msg.stamp, clock = self.filter.clock(), "non-monotonic scan timestamp");
        }
        let obs = reflectors::extract_2d(&msg, &self.extrinsic, &self.scan_config)?;
        if obs.centers.is_empty() {
            debug!("no reflectors in scan, skipping update");
        }
        Ok(self.filter.on_observation(&obs))
    }

    pub fn on_cloud(&mut self, msg: PointCloudMsg) -> ObservationSummary {
        if msg.stamp < self.filter.clock() {
            warn!(stamp = msg.stamp, clock = self.filter.clock(), "non-monotonic cloud timestamp");
        }
        let obs = reflectors::extract_3d(&msg, &self.extrinsic, &self.cloud_config);
        if obs.centers.is_empty() {
            debug!("no reflectors in cloud, skipping update");
        }
        self.filter.on_observation(&obs)
    }

    /// Dump the prior map plus this session's discovered landmarks, so a
    /// follow-on session can load this file as its own prior map.
    pub fn shutdown(&self, map_path: impl AsRef<Path>) -> Result<(), NodeError> {
        PriorMap::save(map_path, self.filter.prior_map().landmarks(), &self.filter.session_landmarks())?;
        Ok(())
    }
}

/// Channel handles for the three input streams the actor consumes. Stands in
/// for the external message-bus connection.
pub struct NodeChannels {
    pub odom: mpsc::Receiver<OdometryMsg>,
    pub scan: mpsc::Receiver<LaserScanMsg>,
    pub cloud: mpsc::Receiver<PointCloudMsg>,
}

/// Run the actor loop until every input channel has been closed (the
/// external bus has torn down the connection) or `shutdown` resolves (an
/// external shutdown request, e.g. ctrl-c). Each message is processed to
/// completion before the next `select!` iteration.
pub async fn run(mut actor: SlamActor, mut channels: NodeChannels, shutdown: impl std::future::Future<Output = ()>) -> SlamActor {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            msg = channels.odom.recv() => {
                match msg {
                    Some(odom) => actor.on_odometry(odom),
                    None => if channels.scan.is_closed() && channels.cloud.is_closed() { break },
                }
            }
            msg = channels.scan.recv() => {
                match msg {
                    Some(scan) => match actor.on_scan(scan) {
                        Ok(summary) => info!(
                            prior = summary.prior_matches,
                            state = summary.state_matches,
                            new = summary.new_landmarks,
                            "scan observation processed"
                        ),
                        Err(err) => warn!(?err, "scan observation failed"),
                    },
                    None => if channels.odom.is_closed() && channels.cloud.is_closed() { break },
                }
            }
            msg = channels.cloud.recv() => {
                match msg {
                    Some(cloud) => {
                        let summary = actor.on_cloud(cloud);
                        info!(
                            prior = summary.prior_matches,
                            state = summary.state_matches,
                            new = summary.new_landmarks,
                            "cloud observation processed"
                        );
                    }
                    None => if channels.odom.is_closed() && channels.scan.is_closed() { break },
                }
            }
        }
    }
    actor
}

/// Refine a pose estimate against an externally supplied occupancy grid.
///
/// This is a deliberately standalone entry point: the correlative matcher
/// never reads from or writes to the EKF filter, so it takes a pose and a
/// grid directly rather than borrowing a [`SlamActor`].
pub fn refine_pose_with_scan_match(
    points: &[nalgebra::Vector2<f64>],
    grid: &scan_matching::ProbabilityGrid,
    initial_pose: Pose,
    params: &scan_matching::SearchParameters,
) -> Result<scan_matching::ScanMatchResult, scan_matching::ScanMatchError> {
    scan_matching::match_scan(points, grid, initial_pose, params)
}

/// Resolve `map_path` from CLI override then file config; fatal if absent.
pub fn resolve_map_path(cli_override: Option<String>, file_config: &FileConfig) -> anyhow::Result<PathBuf> {
    cli_override
        .or_else(|| file_config.map_path.clone())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("map_path is required (set it in the config file or pass --map-path)"))
}
