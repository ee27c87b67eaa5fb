//! Data association: match each observation to a prior-map reflector, an
//! in-state landmark, or mark it as new.
//!
//! The prior map and the in-state landmarks are both "landmark sources" for
//! matching purposes but use different write policies downstream (the prior
//! map is read-only evidence; in-state landmarks are part of `mu`), and
//! deliberately different distance metrics — preserved for parity with the
//! source rather than unified, see the crate's top-level docs.

use nalgebra::{DVector, Vector2};
use priormap::PriorMap;

/// Gating thresholds and metric choice for association.
#[derive(Debug, Clone, Copy)]
pub struct AssociationConfig {
    /// Gate on the prior-map Mahalanobis-like distance.
    pub prior_map_gate: f64,
    /// Gate on the bare Euclidean distance against in-state landmarks.
    pub state_gate: f64,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            prior_map_gate: 0.05,
            state_gate: 0.6,
        }
    }
}

#[derive(Debug, Default)]
pub struct Associations {
    /// (observation index, prior-map landmark index)
    pub prior_matches: Vec<(usize, usize)>,
    /// (observation index, in-state landmark index)
    pub state_matches: Vec<(usize, usize)>,
    /// observation indices with no match, to be augmented
    pub new_obs: Vec<usize>,
}

/// Associate each world-frame observation center `centers_world[i]` against
/// the prior map first, then in-state landmarks, else mark new.
pub fn associate(
    centers_world: &[Vector2<f64>],
    prior_map: &PriorMap,
    mu: &DVector<f64>,
    k_state: usize,
    config: &AssociationConfig,
) -> Associations {
    let mut result = Associations::default();

    for (i, &q) in centers_world.iter().enumerate() {
        let mut matched = false;

        if !prior_map.is_empty() {
            if let Some(j) = best_prior_match(prior_map, q, config.prior_map_gate) {
                result.prior_matches.push((i, j));
                matched = true;
            }
        }

        if !matched && k_state > 0 {
            if let Some(j) = best_state_match(mu, k_state, q, config.state_gate) {
                result.state_matches.push((i, j));
                matched = true;
            }
        }

        if !matched {
            result.new_obs.push(i);
        }
    }

    result
}

/// Mahalanobis-like distance against the stored (not inverted) 2x2
/// covariance, exactly as the source computes it: `sqrt(d^T * Sigma * d)`.
/// See the open question in the top-level spec about this being
/// dimensionally unusual; it is preserved here for behavioral parity.
fn best_prior_match(prior_map: &PriorMap, q: Vector2<f64>, gate: f64) -> Option<usize> {
    let mut best_idx = None;
    let mut best_d = f64::INFINITY;

    for (j, landmark) in prior_map.landmarks().iter().enumerate() {
        let diff = landmark.position - q;
        let quad = (diff.transpose() * landmark.covariance * diff)[(0, 0)];
        let d = quad.max(0.0).sqrt();
        if d < best_d {
            best_d = d;
            best_idx = Some(j);
        }
    }

    if best_d < gate {
        best_idx
    } else {
        None
    }
}

fn best_state_match(mu: &DVector<f64>, k_state: usize, q: Vector2<f64>, gate: f64) -> Option<usize> {
    let mut best_idx = None;
    let mut best_d = f64::INFINITY;

    for j in 0..k_state {
        let lx = mu[3 + 2 * j];
        let ly = mu[3 + 2 * j + 1];
        let d = ((lx - q.x).powi(2) + (ly - q.y).powi(2)).sqrt();
        if d < best_d {
            best_d = d;
            best_idx = Some(j);
        }
    }

    if best_d < gate {
        best_idx
    } else {
        None
    }
}
