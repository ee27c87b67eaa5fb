//! Correlative scan matcher: an independent 3-DoF pose refiner that searches
//! a point cloud against a [`ProbabilityGrid`] to find the best-scoring
//! `(dx, dy, dtheta)` offset from an initial pose estimate.
//!
//! Grounded on the real-time correlative scan matcher
//! (`original_source/src/scan_matching/real_time_correlative_scan_matcher_2d.cc`):
//! rotate the candidate points once per angular step, discretize into grid
//! cells, then slide every linear offset over the same rotated point set.
//! This is a *separate* algorithm from the EKF-SLAM estimator in `ekf_slam`
//! — it shares the pose-refinement role but the two never call into each
//! other.

mod grid;

pub use grid::ProbabilityGrid;

use nalgebra::Vector2;
use thiserror::Error;
use transforms::Transform2D;
use types::Pose;

#[derive(Error, Debug)]
pub enum ScanMatchError {
    #[error("scan has no points to match")]
    EmptyScan,
    #[error("probability grid has no occupied cells")]
    EmptyGrid,
}

/// Search window and scoring weights for the exhaustive search.
#[derive(Debug, Clone, Copy)]
pub struct SearchParameters {
    /// Half-width of the linear search window, meters, in both x and y.
    pub linear_range: f64,
    /// Half-width of the angular search window, radians.
    pub angular_range: f64,
    /// Angular step between candidates, radians.
    pub angular_step: f64,
    /// Penalty weight on linear displacement.
    pub translation_weight: f64,
    /// Penalty weight on angular displacement.
    pub rotation_weight: f64,
}

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            linear_range: 0.3,
            angular_range: 0.2,
            angular_step: 0.02,
            translation_weight: 1.0,
            rotation_weight: 1.0,
        }
    }
}

impl SearchParameters {
    /// Shrink the linear search window to the grid's populated extent, so
    /// candidates that can never land on an occupied cell are not enumerated.
    /// `base_cell` is the initial pose's cell index in `grid`; returns the
    /// (possibly narrowed) half-widths in grid cells for (x, y).
    fn shrink_to_fit(&self, grid: &ProbabilityGrid, base_cell: (i64, i64)) -> (i64, i64) {
        let full_x = (self.linear_range / grid.resolution).ceil() as i64;
        let full_y = full_x;

        let Some((min_x, max_x, min_y, max_y)) = grid.occupied_bounds() else {
            return (full_x, full_y);
        };

        let reach_x = (min_x - base_cell.0).abs().max((max_x - base_cell.0).abs());
        let reach_y = (min_y - base_cell.1).abs().max((max_y - base_cell.1).abs());

        (full_x.min(reach_x.max(1)), full_y.min(reach_y.max(1)))
    }
}

/// The argmax candidate from an exhaustive search: its score and the
/// corrected world-frame pose.
#[derive(Debug, Clone, Copy)]
pub struct ScanMatchResult {
    pub pose: Pose,
    pub score: f64,
}

/// Exhaustively search `(dx, dy, dtheta)` offsets around `initial_pose` to
/// maximize the average grid probability under the transformed `points`
/// (robot-frame points, e.g. from a laser scan or point cloud).
pub fn match_scan(
    points: &[Vector2<f64>],
    grid: &ProbabilityGrid,
    initial_pose: Pose,
    params: &SearchParameters,
) -> Result<ScanMatchResult, ScanMatchError> {
    if points.is_empty() {
        return Err(ScanMatchError::EmptyScan);
    }
    if grid.occupied_bounds().is_none() {
        return Err(ScanMatchError::EmptyGrid);
    }

    let base_tf = Transform2D::from_pose(&initial_pose);
    let base_cell = grid.world_to_grid(base_tf.translation());

    let (x_steps, y_steps) = params.shrink_to_fit(grid, base_cell);
    let theta_steps = (params.angular_range / params.angular_step).ceil().max(0.0) as i64;

    let mut best_score = f64::NEG_INFINITY;
    let mut best = (0.0, 0.0, 0.0);

    for ti in -theta_steps..=theta_steps {
        let dtheta = ti as f64 * params.angular_step;
        let theta = initial_pose.theta + dtheta;
        let rotation_tf = Transform2D::new(initial_pose.x, initial_pose.y, theta);

        // Pre-rotate once: world-frame points at this heading, offset (0, 0).
        let rotated: Vec<Vector2<f64>> = points.iter().map(|&p| rotation_tf.transform_point(p)).collect();
        let rotated_cells: Vec<(i64, i64)> = rotated.iter().map(|&p| grid.world_to_grid(p)).collect();

        for xi in -x_steps..=x_steps {
            for yi in -y_steps..=y_steps {
                let dx = xi as f64 * grid.resolution;
                let dy = yi as f64 * grid.resolution;

                let mut total = 0.0;
                for &(gx, gy) in &rotated_cells {
                    total += grid.probability_at_index(gx + xi, gy + yi);
                }
                let raw_score = total / rotated_cells.len() as f64;

                let offset_norm = (dx * dx + dy * dy).sqrt();
                let penalty = (-(offset_norm * params.translation_weight
                    + dtheta.abs() * params.rotation_weight)
                    .powi(2))
                .exp();
                let score = raw_score * penalty;

                if score > best_score {
                    best_score = score;
                    best = (dx, dy, dtheta);
                }
            }
        }
    }

    let (dx, dy, dtheta) = best;
    Ok(ScanMatchResult {
        pose: Pose {
            x: initial_pose.x + dx,
            y: initial_pose.y + dy,
            theta: transforms::normalize_angle(initial_pose.theta + dtheta),
        },
        score: best_score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ring_grid(radius: f64, resolution: f64) -> ProbabilityGrid {
        let half = (radius * 1.5 / resolution).ceil() as usize;
        let size = half * 2 + 1;
        let origin = Vector2::new(-(half as f64) * resolution, -(half as f64) * resolution);
        let mut grid = ProbabilityGrid::new(size, size, resolution, origin);

        for i in 0..360 {
            let angle = (i as f64).to_radians();
            let point = Vector2::new(radius * angle.cos(), radius * angle.sin());
            let (gx, gy) = grid.world_to_grid(point);
            if gx >= 0 && gy >= 0 && (gx as usize) < size && (gy as usize) < size {
                grid.set_probability(gx as usize, gy as usize, 0.9);
            }
        }
        grid
    }

    fn ring_points(radius: f64) -> Vec<Vector2<f64>> {
        (0..360)
            .map(|i| {
                let angle = (i as f64).to_radians();
                Vector2::new(radius * angle.cos(), radius * angle.sin())
            })
            .collect()
    }

    #[test]
    fn test_identity_match_scores_high() {
        let grid = ring_grid(5.0, 0.05);
        let points = ring_points(5.0);
        let params = SearchParameters {
            linear_range: 0.2,
            angular_range: 0.1,
            angular_step: 0.02,
            ..SearchParameters::default()
        };
        let result = match_scan(&points, &grid, Pose::default(), &params).unwrap();
        assert!(result.score > 0.5);
        assert_relative_eq!(result.pose.x, 0.0, epsilon = 0.1);
        assert_relative_eq!(result.pose.y, 0.0, epsilon = 0.1);
    }

    #[test]
    fn test_recovers_small_translation_offset() {
        let grid = ring_grid(5.0, 0.05);
        let points = ring_points(5.0);
        let params = SearchParameters {
            linear_range: 0.3,
            angular_range: 0.05,
            angular_step: 0.02,
            ..SearchParameters::default()
        };
        // Initial guess offset by (0.1, 0.0) from the grid's true center.
        let initial = Pose {
            x: 0.1,
            y: 0.0,
            theta: 0.0,
        };
        let result = match_scan(&points, &grid, initial, &params).unwrap();
        assert!(result.pose.x.abs() < initial.x.abs());
    }

    #[test]
    fn test_empty_scan_is_an_error() {
        let grid = ring_grid(5.0, 0.05);
        let result = match_scan(&[], &grid, Pose::default(), &SearchParameters::default());
        assert!(matches!(result, Err(ScanMatchError::EmptyScan)));
    }

    #[test]
    fn test_empty_grid_is_an_error() {
        let grid = ProbabilityGrid::new(10, 10, 0.1, Vector2::new(0.0, 0.0));
        let points = ring_points(1.0);
        let result = match_scan(&points, &grid, Pose::default(), &SearchParameters::default());
        assert!(matches!(result, Err(ScanMatchError::EmptyGrid)));
    }
}
