//! Probability grid: a dense occupancy-probability map over a bounded world
//! region, in the role of `mapping::ProbabilityGrid` from the correlative
//! scan matcher this module is grounded on. World<->grid index conversions
//! follow the same shape as an occupancy-grid world<->cell mapping, but this
//! grid stores probabilities directly rather than log-odds, since the
//! matcher only ever reads probabilities.

use nalgebra::Vector2;

/// A dense grid of occupancy probabilities in `[0, 1]`, with a fixed
/// resolution and world-frame origin (grid cell `(0, 0)`'s lower-left
/// corner).
#[derive(Debug, Clone)]
pub struct ProbabilityGrid {
    data: Vec<f64>,
    pub width: usize,
    pub height: usize,
    pub resolution: f64,
    pub origin: Vector2<f64>,
}

impl ProbabilityGrid {
    pub fn new(width: usize, height: usize, resolution: f64, origin: Vector2<f64>) -> Self {
        Self {
            data: vec![0.0; width * height],
            width,
            height,
            resolution,
            origin,
        }
    }

    /// Build from a flat row-major buffer of probabilities.
    pub fn from_data(width: usize, height: usize, resolution: f64, origin: Vector2<f64>, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), width * height);
        Self {
            data,
            width,
            height,
            resolution,
            origin,
        }
    }

    pub fn set_probability(&mut self, gx: usize, gy: usize, p: f64) {
        self.data[gy * self.width + gx] = p.clamp(0.0, 1.0);
    }

    /// World coordinates to (possibly out-of-bounds) grid indices.
    pub fn world_to_grid(&self, point: Vector2<f64>) -> (i64, i64) {
        let gx = ((point.x - self.origin.x) / self.resolution).floor() as i64;
        let gy = ((point.y - self.origin.y) / self.resolution).floor() as i64;
        (gx, gy)
    }

    pub fn grid_to_world(&self, gx: i64, gy: i64) -> Vector2<f64> {
        Vector2::new(
            self.origin.x + (gx as f64 + 0.5) * self.resolution,
            self.origin.y + (gy as f64 + 0.5) * self.resolution,
        )
    }

    /// Probability at a world point, or `0.0` outside the grid (treated as
    /// free/unknown, never a match contributor).
    pub fn probability_at(&self, point: Vector2<f64>) -> f64 {
        let (gx, gy) = self.world_to_grid(point);
        self.probability_at_index(gx, gy)
    }

    pub fn probability_at_index(&self, gx: i64, gy: i64) -> f64 {
        if gx < 0 || gy < 0 || gx as usize >= self.width || gy as usize >= self.height {
            return 0.0;
        }
        self.data[gy as usize * self.width + gx as usize]
    }

    /// Bounding box (in grid index units) of cells with nonzero probability,
    /// or `None` if the grid is entirely empty. Used to shrink a search
    /// window down to the grid's useful extent.
    pub fn occupied_bounds(&self) -> Option<(i64, i64, i64, i64)> {
        let mut min_x = i64::MAX;
        let mut max_x = i64::MIN;
        let mut min_y = i64::MAX;
        let mut max_y = i64::MIN;
        let mut any = false;

        for gy in 0..self.height {
            for gx in 0..self.width {
                if self.data[gy * self.width + gx] > 0.0 {
                    any = true;
                    min_x = min_x.min(gx as i64);
                    max_x = max_x.max(gx as i64);
                    min_y = min_y.min(gy as i64);
                    max_y = max_y.max(gy as i64);
                }
            }
        }

        if any {
            Some((min_x, max_x, min_y, max_y))
        } else {
            None
        }
    }
}
