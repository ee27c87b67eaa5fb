//! 3D reflector extraction: intensity threshold, statistical outlier
//! removal, Euclidean clustering, centroid per cluster.
//!
//! This is a from-scratch reimplementation of the PCL pipeline the source
//! relied on (`StatisticalOutlierRemoval` + `EuclideanClusterExtraction`);
//! both passes here are the brute-force O(n^2) neighbor search, which is fine
//! at the point counts a reflector-filtered cloud produces but would need a
//! kd-tree for a raw, unfiltered sweep.

use nalgebra::Vector3;
use transforms::Transform2D;
use types::{Observation, Point2, PointCloudMsg};

/// Pipeline thresholds.
#[derive(Debug, Clone, Copy)]
pub struct CloudConfig {
    pub intensity_min: f64,
    /// Neighbor count for statistical outlier removal.
    pub outlier_k: usize,
    /// Standard-deviation multiplier for the outlier rejection threshold.
    pub outlier_stddev_mul: f64,
    /// Euclidean clustering neighbor tolerance (meters).
    pub cluster_tolerance: f64,
    pub cluster_min_size: usize,
    pub cluster_max_size: usize,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            intensity_min: 160.0,
            outlier_k: 30,
            outlier_stddev_mul: 0.5,
            cluster_tolerance: 0.2,
            cluster_min_size: 4,
            cluster_max_size: 160,
        }
    }
}

/// Extract reflector centers from one point cloud sweep.
///
/// Performs no width validation of its own; the cluster-size bounds already
/// enforce it.
pub fn extract_3d(
    cloud: &PointCloudMsg,
    extrinsic: &Transform2D,
    config: &CloudConfig,
) -> Observation {
    let bright: Vec<Vector3<f64>> = cloud
        .points
        .iter()
        .filter(|p| p.intensity > config.intensity_min)
        .map(|p| Vector3::new(p.x, p.y, p.z))
        .collect();

    let filtered = statistical_outlier_removal(&bright, config.outlier_k, config.outlier_stddev_mul);
    let clusters = euclidean_cluster(&filtered, config.cluster_tolerance);

    let centers = clusters
        .into_iter()
        .filter(|c| c.len() >= config.cluster_min_size && c.len() <= config.cluster_max_size)
        .map(|cluster| {
            let mut sum = Vector3::zeros();
            for &p in &cluster {
                sum += p;
            }
            let centroid = sum / cluster.len() as f64;
            let robot_point =
                extrinsic.transform_point(nalgebra::Vector2::new(centroid.x, centroid.y));
            Point2::new(robot_point.x, robot_point.y)
        })
        .collect();

    Observation {
        stamp: cloud.stamp,
        centers,
    }
}

/// Reject points whose mean distance to their `k` nearest neighbors exceeds
/// `global_mean + stddev_mul * global_stddev`.
fn statistical_outlier_removal(
    points: &[Vector3<f64>],
    k: usize,
    stddev_mul: f64,
) -> Vec<Vector3<f64>> {
    if points.len() <= k {
        return points.to_vec();
    }

    let mean_knn_distances: Vec<f64> = points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let mut distances: Vec<f64> = points
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, q)| (p - q).norm())
                .collect();
            distances.sort_by(|a, b| a.partial_cmp(b).unwrap());
            distances.truncate(k);
            distances.iter().sum::<f64>() / distances.len() as f64
        })
        .collect();

    let global_mean = mean_knn_distances.iter().sum::<f64>() / mean_knn_distances.len() as f64;
    let variance = mean_knn_distances
        .iter()
        .map(|d| (d - global_mean).powi(2))
        .sum::<f64>()
        / mean_knn_distances.len() as f64;
    let stddev = variance.sqrt();
    let threshold = global_mean + stddev_mul * stddev;

    points
        .iter()
        .zip(mean_knn_distances.iter())
        .filter(|(_, &d)| d <= threshold)
        .map(|(&p, _)| p)
        .collect()
}

/// Group points into connected components under a distance tolerance.
fn euclidean_cluster(points: &[Vector3<f64>], tolerance: f64) -> Vec<Vec<Vector3<f64>>> {
    let n = points.len();
    let mut visited = vec![false; n];
    let mut clusters = Vec::new();

    for start in 0..n {
        if visited[start] {
            continue;
        }
        let mut stack = vec![start];
        visited[start] = true;
        let mut cluster_indices = Vec::new();

        while let Some(i) = stack.pop() {
            cluster_indices.push(i);
            for j in 0..n {
                if visited[j] {
                    continue;
                }
                if (points[i] - points[j]).norm() <= tolerance {
                    visited[j] = true;
                    stack.push(j);
                }
            }
        }

        clusters.push(cluster_indices.into_iter().map(|i| points[i]).collect());
    }

    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::PointXyzi;

    fn make_cloud(points: Vec<(f64, f64, f64, f64)>) -> PointCloudMsg {
        PointCloudMsg {
            stamp: 0.0,
            points: points
                .into_iter()
                .map(|(x, y, z, intensity)| PointXyzi { x, y, z, intensity })
                .collect(),
        }
    }

    #[test]
    fn test_single_tight_cluster_yields_one_center() {
        let mut pts = Vec::new();
        for i in 0..10 {
            let t = i as f64 * 0.01;
            pts.push((2.0 + t, 0.0, 0.0, 200.0));
        }
        let cloud = make_cloud(pts);
        let obs = extract_3d(&cloud, &Transform2D::identity(), &CloudConfig::default());
        assert_eq!(obs.centers.len(), 1);
        assert!((obs.centers[0].x - 2.045).abs() < 0.05);
    }

    #[test]
    fn test_dim_points_ignored() {
        let cloud = make_cloud(vec![(1.0, 1.0, 0.0, 10.0); 20]);
        let obs = extract_3d(&cloud, &Transform2D::identity(), &CloudConfig::default());
        assert!(obs.centers.is_empty());
    }

    #[test]
    fn test_cluster_below_min_size_rejected() {
        let mut pts = Vec::new();
        for i in 0..3 {
            pts.push((1.0 + i as f64 * 0.01, 0.0, 0.0, 200.0));
        }
        let cloud = make_cloud(pts);
        let config = CloudConfig::default();
        let obs = extract_3d(&cloud, &Transform2D::identity(), &config);
        assert!(obs.centers.is_empty());
    }

    #[test]
    fn test_two_separate_clusters() {
        let mut pts = Vec::new();
        for i in 0..6 {
            pts.push((2.0 + i as f64 * 0.01, 0.0, 0.0, 200.0));
        }
        for i in 0..6 {
            pts.push((0.0, 3.0 + i as f64 * 0.01, 0.0, 200.0));
        }
        let cloud = make_cloud(pts);
        let obs = extract_3d(&cloud, &Transform2D::identity(), &CloudConfig::default());
        assert_eq!(obs.centers.len(), 2);
    }
}
