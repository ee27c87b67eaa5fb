//! EKF-SLAM estimator: a single filter state (pose + landmarks) that grows
//! as new reflectors are discovered.
//!
//! The state vector `mu` and covariance `sigma` are dense, dynamically sized
//! (`DVector`/`DMatrix`), since the number of landmarks is not known ahead of
//! time. Landmarks are never removed; `mu` only ever grows. See
//! [`EkfSlam::augment`] for the single-reallocation growth strategy.

mod associate;

pub use associate::{associate, AssociationConfig, Associations};

use nalgebra::{DMatrix, DVector, Matrix2, SymmetricEigen, Vector2};
use priormap::{PriorLandmark, PriorMap};
use thiserror::Error;
use tracing::warn;
use transforms::Transform2D;
use types::{LandmarkMarker, Observation, Pose, PoseWithCovariance2D};

/// 95%-confidence chi-square factor for a 2-DoF ellipse (`5.991`).
const CHI2_95_2DOF: f64 = 5.991;

#[derive(Error, Debug)]
pub enum EkfError {
    #[error("innovation covariance is numerically ill-conditioned and no pseudoinverse could be computed")]
    IllConditionedInnovation,
}

/// Process- and measurement-noise covariances, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct NoiseConfig {
    /// 2x2, on (linear velocity, angular velocity).
    pub q_u: Matrix2<f64>,
    /// 2x2, on (x, y) observation.
    pub q_t: Matrix2<f64>,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            q_u: Matrix2::new(0.05 * 0.05, 0.0, 0.0, 0.068 * 0.068),
            q_t: Matrix2::new(0.05 * 0.05, 0.0, 0.0, 0.05 * 0.05),
        }
    }
}

/// Summary of what a single observation tick did, for logging/telemetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservationSummary {
    pub prior_matches: usize,
    pub state_matches: usize,
    pub new_landmarks: usize,
}

/// The EKF-SLAM filter: pose plus all landmarks discovered this session.
pub struct EkfSlam {
    mu: DVector<f64>,
    sigma: DMatrix<f64>,
    clock: f64,
    q_u: DMatrix<f64>,
    q_t: DMatrix<f64>,
    association: AssociationConfig,
    prior_map: PriorMap,
    path: Vec<Pose>,
    last_v: f64,
    last_omega: f64,
}

impl EkfSlam {
    /// Create a filter at `start_pose` with zero covariance (the initial
    /// pose is declared exact) and `start_clock` as the filter's epoch.
    pub fn new(
        start_pose: Pose,
        noise: NoiseConfig,
        prior_map: PriorMap,
        association: AssociationConfig,
        start_clock: f64,
    ) -> Self {
        let mu = DVector::from_vec(vec![start_pose.x, start_pose.y, start_pose.theta]);
        let sigma = DMatrix::zeros(3, 3);
        Self {
            mu,
            sigma,
            clock: start_clock,
            q_u: matrix2_to_dmatrix(noise.q_u),
            q_t: matrix2_to_dmatrix(noise.q_t),
            association,
            prior_map,
            path: vec![start_pose],
            last_v: 0.0,
            last_omega: 0.0,
        }
    }

    /// Number of landmarks currently tracked in the filter state.
    pub fn num_state_landmarks(&self) -> usize {
        (self.mu.len() - 3) / 2
    }

    pub fn state_len(&self) -> usize {
        self.mu.len()
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn mu(&self) -> &DVector<f64> {
        &self.mu
    }

    pub fn sigma(&self) -> &DMatrix<f64> {
        &self.sigma
    }

    pub fn pose(&self) -> Pose {
        Pose {
            x: self.mu[0],
            y: self.mu[1],
            theta: self.mu[2],
        }
    }

    pub fn path(&self) -> &[Pose] {
        &self.path
    }

    /// Pose and the 3x3 pose block of `Sigma`.
    pub fn pose_with_covariance(&self) -> PoseWithCovariance2D {
        let mut covariance = [[0.0; 3]; 3];
        for r in 0..3 {
            for c in 0..3 {
                covariance[r][c] = self.sigma[(r, c)];
            }
        }
        PoseWithCovariance2D {
            pose: self.pose(),
            covariance,
        }
    }

    /// 95%-confidence ellipse markers, one per in-state landmark.
    pub fn landmark_markers(&self) -> Vec<LandmarkMarker> {
        (0..self.num_state_landmarks())
            .map(|j| {
                let idx = 3 + 2 * j;
                let x = self.mu[idx];
                let y = self.mu[idx + 1];
                let cov = Matrix2::new(
                    self.sigma[(idx, idx)],
                    self.sigma[(idx, idx + 1)],
                    self.sigma[(idx + 1, idx)],
                    self.sigma[(idx + 1, idx + 1)],
                );
                let eig = SymmetricEigen::new(cov);
                let (major_idx, minor_idx) = if eig.eigenvalues[0] >= eig.eigenvalues[1] {
                    (0, 1)
                } else {
                    (1, 0)
                };
                let lambda_major = eig.eigenvalues[major_idx].max(0.0);
                let lambda_minor = eig.eigenvalues[minor_idx].max(0.0);
                let leading = eig.eigenvectors.column(major_idx);
                LandmarkMarker {
                    id: j,
                    x,
                    y,
                    axis_major: 2.0 * (CHI2_95_2DOF * lambda_major).sqrt(),
                    axis_minor: 2.0 * (CHI2_95_2DOF * lambda_minor).sqrt(),
                    angle: leading.y.atan2(leading.x),
                }
            })
            .collect()
    }

    /// In-state landmarks as prior-map-shaped entries, for the shutdown dump.
    pub fn session_landmarks(&self) -> Vec<PriorLandmark> {
        (0..self.num_state_landmarks())
            .map(|j| {
                let idx = 3 + 2 * j;
                PriorLandmark {
                    position: Vector2::new(self.mu[idx], self.mu[idx + 1]),
                    covariance: Matrix2::new(
                        self.sigma[(idx, idx)],
                        self.sigma[(idx, idx + 1)],
                        self.sigma[(idx + 1, idx)],
                        self.sigma[(idx + 1, idx + 1)],
                    ),
                }
            })
            .collect()
    }

    pub fn prior_map(&self) -> &PriorMap {
        &self.prior_map
    }

    /// Propagate mean and covariance with the held-constant odometry
    /// velocity (v, omega) from the filter clock to `stamp`.
    pub fn predict(&mut self, v: f64, omega: f64, stamp: f64) {
        let dt = stamp - self.clock;
        self.last_v = v;
        self.last_omega = omega;
        self.step(v, omega, dt);
        self.clock = stamp;
        self.path.push(self.pose());
    }

    /// Process a reflector observation: advance the clock with the last
    /// known velocity, associate, update, and augment.
    pub fn on_observation(&mut self, obs: &Observation) -> ObservationSummary {
        let dt = obs.stamp - self.clock;
        let (v, omega) = (self.last_v, self.last_omega);
        self.step(v, omega, dt);
        self.clock = obs.stamp;

        let pose_tf = Transform2D::new(self.mu[0], self.mu[1], self.mu[2]);
        let centers_world: Vec<Vector2<f64>> = obs
            .centers
            .iter()
            .map(|c| pose_tf.transform_point(Vector2::new(c.x, c.y)))
            .collect();

        let k_state = self.num_state_landmarks();
        let assoc = associate(&centers_world, &self.prior_map, &self.mu, k_state, &self.association);

        if !assoc.prior_matches.is_empty() || !assoc.state_matches.is_empty() {
            if let Err(err) = self.apply_update(&assoc, obs) {
                warn!(?err, "measurement update skipped");
            }
        }

        self.augment(obs, &assoc.new_obs);
        self.path.push(self.pose());

        ObservationSummary {
            prior_matches: assoc.prior_matches.len(),
            state_matches: assoc.state_matches.len(),
            new_landmarks: assoc.new_obs.len(),
        }
    }

    fn step(&mut self, v: f64, omega: f64, dt: f64) {
        let theta = self.mu[2];
        let dtheta = omega * dt;
        let theta_mid = theta + dtheta / 2.0;
        let dx = v * dt * theta_mid.cos();
        let dy = v * dt * theta_mid.sin();

        self.mu[0] += dx;
        self.mu[1] += dy;
        self.mu[2] = transforms::normalize_angle(theta + dtheta);

        let n = self.mu.len();
        let mut g_xi = DMatrix::<f64>::identity(n, n);
        g_xi[(0, 2)] = -v * dt * theta_mid.sin();
        g_xi[(1, 2)] = v * dt * theta_mid.cos();

        let mut g_u = DMatrix::<f64>::zeros(n, 2);
        g_u[(0, 0)] = dt * theta_mid.cos();
        g_u[(0, 1)] = -v * dt * dt * theta_mid.sin() / 2.0;
        g_u[(1, 0)] = dt * theta_mid.sin();
        g_u[(1, 1)] = v * dt * dt * theta_mid.cos() / 2.0;
        g_u[(2, 1)] = dt;

        self.sigma = &g_xi * &self.sigma * g_xi.transpose() + &g_u * &self.q_u * g_u.transpose();
    }

    fn apply_update(&mut self, assoc: &Associations, obs: &Observation) -> Result<(), EkfError> {
        enum Kind {
            State(usize),
            Prior(usize),
        }

        let mut rows: Vec<(usize, Vector2<f64>, Kind)> = Vec::new();
        for &(obs_idx, j) in &assoc.state_matches {
            let pos = Vector2::new(self.mu[3 + 2 * j], self.mu[3 + 2 * j + 1]);
            rows.push((obs_idx, pos, Kind::State(j)));
        }
        for &(obs_idx, j) in &assoc.prior_matches {
            let pos = self.prior_map.landmarks()[j].position;
            rows.push((obs_idx, pos, Kind::Prior(j)));
        }

        let mm = rows.len();
        if mm == 0 {
            return Ok(());
        }

        let n = self.mu.len();
        let theta = self.mu[2];
        let (x, y) = (self.mu[0], self.mu[1]);

        let mut z = DVector::<f64>::zeros(2 * mm);
        let mut zhat = DVector::<f64>::zeros(2 * mm);
        let mut h = DMatrix::<f64>::zeros(2 * mm, n);
        let mut r = DMatrix::<f64>::zeros(2 * mm, 2 * mm);

        for (row, (obs_idx, land_pos, kind)) in rows.iter().enumerate() {
            let center = obs.centers[*obs_idx];
            z[2 * row] = center.x;
            z[2 * row + 1] = center.y;

            let dxp = land_pos.x - x;
            let dyp = land_pos.y - y;
            zhat[2 * row] = dxp * theta.cos() + dyp * theta.sin();
            zhat[2 * row + 1] = -dxp * theta.sin() + dyp * theta.cos();

            h[(2 * row, 0)] = -theta.cos();
            h[(2 * row, 1)] = -theta.sin();
            h[(2 * row, 2)] = -dxp * theta.sin() + dyp * theta.cos();
            h[(2 * row + 1, 0)] = theta.sin();
            h[(2 * row + 1, 1)] = -theta.cos();
            h[(2 * row + 1, 2)] = -dxp * theta.cos() - dyp * theta.sin();

            if let Kind::State(j) = kind {
                let col = 3 + 2 * j;
                h[(2 * row, col)] = theta.cos();
                h[(2 * row, col + 1)] = theta.sin();
                h[(2 * row + 1, col)] = -theta.sin();
                h[(2 * row + 1, col + 1)] = theta.cos();
            }

            r[(2 * row, 2 * row)] = self.q_t[(0, 0)];
            r[(2 * row, 2 * row + 1)] = self.q_t[(0, 1)];
            r[(2 * row + 1, 2 * row)] = self.q_t[(1, 0)];
            r[(2 * row + 1, 2 * row + 1)] = self.q_t[(1, 1)];
        }

        let s = &h * &self.sigma * h.transpose() + &r;

        let s_inv = match s.clone().cholesky() {
            Some(chol) => chol.inverse(),
            None => {
                warn!("innovation covariance not positive definite, falling back to pseudoinverse");
                s.clone()
                    .pseudo_inverse(1e-9)
                    .map_err(|_| EkfError::IllConditionedInnovation)?
            }
        };

        let k_gain = &self.sigma * h.transpose() * &s_inv;
        let innovation = &z - &zhat;
        self.mu += &k_gain * innovation;
        self.mu[2] = transforms::normalize_angle(self.mu[2]);
        self.sigma -= &k_gain * &h * &self.sigma;

        Ok(())
    }

    fn augment(&mut self, obs: &Observation, new_obs: &[usize]) {
        let n2 = new_obs.len();
        if n2 == 0 {
            return;
        }

        let n = self.mu.len();
        let theta = self.mu[2];
        let (x, y) = (self.mu[0], self.mu[1]);

        let mut new_mu = DVector::<f64>::zeros(n + 2 * n2);
        new_mu.rows_mut(0, n).copy_from(&self.mu);

        let mut g_p = DMatrix::<f64>::zeros(2 * n2, 3);
        let mut g_z = DMatrix::<f64>::zeros(2 * n2, 2 * n2);

        for (k, &obs_idx) in new_obs.iter().enumerate() {
            let center = obs.centers[obs_idx];
            let (rx, ry) = (center.x, center.y);

            new_mu[n + 2 * k] = x + rx * theta.cos() - ry * theta.sin();
            new_mu[n + 2 * k + 1] = y + rx * theta.sin() + ry * theta.cos();

            g_p[(2 * k, 0)] = 1.0;
            g_p[(2 * k, 2)] = -rx * theta.sin() - ry * theta.cos();
            g_p[(2 * k + 1, 1)] = 1.0;
            g_p[(2 * k + 1, 2)] = rx * theta.cos() - ry * theta.sin();

            g_z[(2 * k, 2 * k)] = theta.cos();
            g_z[(2 * k, 2 * k + 1)] = -theta.sin();
            g_z[(2 * k + 1, 2 * k)] = theta.sin();
            g_z[(2 * k + 1, 2 * k + 1)] = theta.cos();
        }

        let sigma_pp = self.sigma.view((0, 0), (3, 3)).clone_owned();
        let q_t_block = block_diag(&self.q_t, n2);
        let sigma_mm = &g_p * sigma_pp * g_p.transpose() + &g_z * q_t_block * g_z.transpose();

        let mut g_fx = DMatrix::<f64>::zeros(2 * n2, n);
        g_fx.view_mut((0, 0), (2 * n2, 3)).copy_from(&g_p);
        let sigma_mx = &g_fx * &self.sigma;

        let mut new_sigma = DMatrix::<f64>::zeros(n + 2 * n2, n + 2 * n2);
        new_sigma.view_mut((0, 0), (n, n)).copy_from(&self.sigma);
        new_sigma.view_mut((n, 0), (2 * n2, n)).copy_from(&sigma_mx);
        new_sigma
            .view_mut((0, n), (n, 2 * n2))
            .copy_from(&sigma_mx.transpose());
        new_sigma.view_mut((n, n), (2 * n2, 2 * n2)).copy_from(&sigma_mm);

        self.mu = new_mu;
        self.sigma = new_sigma;
    }
}

fn matrix2_to_dmatrix(m: Matrix2<f64>) -> DMatrix<f64> {
    DMatrix::from_row_slice(2, 2, &[m[(0, 0)], m[(0, 1)], m[(1, 0)], m[(1, 1)]])
}

fn block_diag(block: &DMatrix<f64>, count: usize) -> DMatrix<f64> {
    let d = block.nrows();
    let mut out = DMatrix::<f64>::zeros(d * count, d * count);
    for i in 0..count {
        out.view_mut((i * d, i * d), (d, d)).copy_from(block);
    }
    out
}
