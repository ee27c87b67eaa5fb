//! Shared message and data types for the reflector EKF-SLAM stack.
//!
//! These are plain, transport-agnostic structs: the bus that actually carries
//! odometry, scans, and point clouds into the estimator is outside this
//! workspace's scope, so these types model only the fields the core
//! algorithms read.

use serde::{Deserialize, Serialize};

/// 2D pose (meters, radians). `theta` is always wrapped to `(-pi, pi]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// A 2D point, used for landmark centers and scan/cloud returns in whatever
/// frame the caller documents (robot frame for observations, world frame for
/// landmark positions).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Wheel-odometry tick: linear velocity along the robot's x axis (m/s) and
/// angular velocity about its z axis (rad/s), sampled at `stamp`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OdometryMsg {
    /// Seconds, monotonic within a session.
    pub stamp: f64,
    pub linear: f64,
    pub angular: f64,
}

/// A planar range scan, one revolution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LaserScanMsg {
    pub stamp: f64,
    pub angle_min: f64,
    pub angle_max: f64,
    pub angle_increment: f64,
    pub range_min: f64,
    pub range_max: f64,
    pub ranges: Vec<f64>,
    pub intensities: Vec<f64>,
}

/// A single intensity-tagged 3D point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointXyzi {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub intensity: f64,
}

/// An unordered point cloud (one sensor sweep).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointCloudMsg {
    pub stamp: f64,
    pub points: Vec<PointXyzi>,
}

/// A set of reflector centers extracted from one scan or cloud, in the robot
/// (base-link) frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Observation {
    pub stamp: f64,
    pub centers: Vec<Point2>,
}

/// Pose output with its 3x3 planar covariance block (row-major: x, y, theta).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseWithCovariance2D {
    pub pose: Pose,
    pub covariance: [[f64; 3]; 3],
}

/// A 95%-confidence ellipse for a single landmark, ready for visualization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkMarker {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    /// Full ellipse axis lengths (not semi-axes), `2*sqrt(5.991*lambda)`.
    pub axis_major: f64,
    pub axis_minor: f64,
    /// Ellipse orientation in radians, from the leading eigenvector.
    pub angle: f64,
}

/// A monotonically appended path of poses.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PathUpdate {
    pub poses: Vec<Pose>,
}
