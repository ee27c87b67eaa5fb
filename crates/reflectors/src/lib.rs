//! Reflector extraction from range sensors.
//!
//! Two independent pipelines feed the same [`types::Observation`] contract:
//! [`scan::extract_2d`] for planar laser scans and [`cloud::extract_3d`] for
//! intensity-tagged point clouds. Both report reflector centers in the robot
//! (base-link) frame, transformed from the sensor frame by a fixed extrinsic.

use thiserror::Error;

pub mod cloud;
pub mod scan;

pub use cloud::{extract_3d, CloudConfig};
pub use scan::{extract_2d, ScanConfig};

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("malformed scan bounds: {0}")]
    InvalidScanBounds(String),
}
