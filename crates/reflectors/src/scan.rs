//! 2D reflector extraction: isolate contiguous high-intensity runs in a
//! planar scan, bridge short dim gaps, and validate width by chord length.

use nalgebra::Vector2;
use tracing::debug;
use transforms::Transform2D;
use types::{LaserScanMsg, Observation, Point2};

use crate::ExtractionError;

/// Extraction thresholds, all in the units the source reports (meters,
/// intensity counts, indices).
#[derive(Debug, Clone, Copy)]
pub struct ScanConfig {
    pub range_min: f64,
    pub range_max: f64,
    pub intensity_min: f64,
    pub reflector_min_length: f64,
    pub reflector_length_error: f64,
    /// Bridges a dim gap when the index distance from the last bright
    /// return to the first bright return after the gap is under this value
    /// (so at most `max_bridge_gap - 2` interior dim returns are absorbed).
    pub max_bridge_gap: usize,
    /// Maximum range jump (meters) tolerated across a bridged gap.
    pub max_bridge_range_jump: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            range_min: 0.3,
            range_max: 10.0,
            intensity_min: 160.0,
            reflector_min_length: 0.18,
            reflector_length_error: 0.06,
            max_bridge_gap: 4,
            max_bridge_range_jump: 0.3,
        }
    }
}

/// Extract reflector centers from a single planar scan.
///
/// Scans left to right. Consecutive bright returns form a run; a run may
/// bridge a dim gap under `max_bridge_gap`/`max_bridge_range_jump` if the
/// return right after the gap is itself bright, gating on the index distance
/// from the last bright return to that post-gap return (not the count of
/// dim returns in between). A run closes when no bridge applies (or the
/// scan ends) and is accepted if its chord length falls within
/// `reflector_length_error` of `reflector_min_length`.
pub fn extract_2d(
    scan: &LaserScanMsg,
    extrinsic: &Transform2D,
    config: &ScanConfig,
) -> Result<Observation, ExtractionError> {
    if config.range_min < 0.0 || config.range_max <= config.range_min {
        return Err(ExtractionError::InvalidScanBounds(format!(
            "range_min={} range_max={}",
            config.range_min, config.range_max
        )));
    }
    if scan.angle_increment < 0.0 && scan.angle_max <= scan.angle_min {
        return Err(ExtractionError::InvalidScanBounds(format!(
            "angle_increment={} angle_min={} angle_max={}",
            scan.angle_increment, scan.angle_min, scan.angle_max
        )));
    }
    if scan.ranges.len() != scan.intensities.len() {
        return Err(ExtractionError::InvalidScanBounds(format!(
            "ranges.len()={} != intensities.len()={}",
            scan.ranges.len(),
            scan.intensities.len()
        )));
    }

    let n = scan.ranges.len();
    let is_bright = |i: usize| -> bool {
        let r = scan.ranges[i];
        r.is_finite()
            && r >= config.range_min
            && r <= config.range_max
            && scan.intensities[i] > config.intensity_min
    };
    let beam_point = |i: usize| -> Vector2<f64> {
        let angle = scan.angle_min + i as f64 * scan.angle_increment;
        let r = scan.ranges[i];
        Vector2::new(r * angle.cos(), r * angle.sin())
    };

    let mut centers = Vec::new();
    let mut i = 0;
    while i < n {
        if !is_bright(i) {
            i += 1;
            continue;
        }

        let mut run = vec![i];
        let mut j = i + 1;
        loop {
            if j >= n {
                break;
            }
            if is_bright(j) {
                run.push(j);
                j += 1;
                continue;
            }

            // dim return: look ahead for a bridge.
            let gap_start = j;
            let mut k = j;
            while k < n && !is_bright(k) {
                k += 1;
            }
            if k < n {
                let last_bright = *run.last().unwrap();
                // Gate on the index distance from the last bright return to
                // the post-gap bright return (not the interior dim count):
                // a distance under `max_bridge_gap` allows at most
                // `max_bridge_gap - 2` interior dim returns.
                let index_distance = k - last_bright;
                let range_before = scan.ranges[last_bright];
                let range_after = scan.ranges[k];
                let range_jump = (range_after - range_before).abs();
                if index_distance < config.max_bridge_gap && range_jump < config.max_bridge_range_jump {
                    for idx in gap_start..k {
                        if scan.ranges[idx].is_finite() {
                            run.push(idx);
                        } else {
                            debug!(index = idx, "skipping non-finite range inside a bridged gap");
                        }
                    }
                    run.push(k);
                    j = k + 1;
                    continue;
                }
            }
            break;
        }

        if let Some(center) = close_run(&run, scan, &beam_point, extrinsic, config) {
            centers.push(center);
        }
        i = j;
    }

    Ok(Observation {
        stamp: scan.stamp,
        centers,
    })
}

fn close_run(
    run: &[usize],
    _scan: &LaserScanMsg,
    beam_point: &dyn Fn(usize) -> Vector2<f64>,
    extrinsic: &Transform2D,
    config: &ScanConfig,
) -> Option<Point2> {
    let first = beam_point(run[0]);
    let last = beam_point(*run.last().unwrap());
    let chord = (first - last).norm();
    if (chord - config.reflector_min_length).abs() >= config.reflector_length_error {
        return None;
    }

    let mut sum = Vector2::zeros();
    for &idx in run {
        sum += beam_point(idx);
    }
    let mean_sensor = sum / run.len() as f64;
    let robot_point = extrinsic.transform_point(mean_sensor);
    Some(Point2::new(robot_point.x, robot_point.y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn scan_from_intensities(ranges: Vec<f64>, intensities: Vec<f64>) -> LaserScanMsg {
        let n = ranges.len();
        LaserScanMsg {
            stamp: 0.0,
            angle_min: 0.0,
            angle_max: 2.0 * PI,
            angle_increment: 2.0 * PI / n as f64,
            range_min: 0.3,
            range_max: 10.0,
            ranges,
            intensities,
        }
    }

    #[test]
    fn test_single_bright_arc_yields_one_center() {
        // 10-beam scan, a short bright arc sized to pass the chord test.
        let ranges = vec![1.0; 10];
        let mut intensities = vec![0.0; 10];
        intensities[3] = 200.0;
        intensities[4] = 200.0;
        let scan = scan_from_intensities(ranges, intensities);
        let config = ScanConfig::default();
        let obs = extract_2d(&scan, &Transform2D::identity(), &config).unwrap();
        assert_eq!(obs.centers.len(), 1);
    }

    #[test]
    fn test_gap_bridging_single_dim_return() {
        // H H L H H pattern (with leading/trailing dim) from spec scenario 6.
        let ranges = vec![1.0; 10];
        let intensities: Vec<f64> = vec![0.0, 0.0, 200.0, 200.0, 0.0, 200.0, 200.0, 0.0, 0.0, 0.0];
        let scan = scan_from_intensities(ranges, intensities);
        let config = ScanConfig::default();
        let obs = extract_2d(&scan, &Transform2D::identity(), &config).unwrap();
        assert_eq!(obs.centers.len(), 1, "single dim return must be bridged");
    }

    #[test]
    fn test_long_gap_never_bridges() {
        let ranges = vec![1.0; 12];
        let mut intensities = vec![0.0; 12];
        intensities[1] = 200.0;
        intensities[2] = 200.0;
        // 4 dim returns (indices 3..6) before the run resumes: at or over the bridge limit.
        intensities[7] = 200.0;
        intensities[8] = 200.0;
        let scan = scan_from_intensities(ranges, intensities);
        let config = ScanConfig::default();
        let obs = extract_2d(&scan, &Transform2D::identity(), &config).unwrap();
        // Two separate short runs, neither likely to pass the chord test in isolation,
        // but in no case should they be merged into a single bridged run.
        assert!(obs.centers.len() != 1 || obs.centers.is_empty());
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let mut scan = scan_from_intensities(vec![1.0; 4], vec![0.0; 4]);
        scan.angle_increment = scan.angle_increment; // no-op, keep valid angle bounds
        let config = ScanConfig {
            range_min: 1.0,
            range_max: 0.5,
            ..ScanConfig::default()
        };
        let result = extract_2d(&scan, &Transform2D::identity(), &config);
        assert!(result.is_err());
    }

    #[test]
    fn test_no_reflectors_in_uniformly_dim_scan() {
        let scan = scan_from_intensities(vec![1.0; 20], vec![0.0; 20]);
        let config = ScanConfig::default();
        let obs = extract_2d(&scan, &Transform2D::identity(), &config).unwrap();
        assert!(obs.centers.is_empty());
    }
}
