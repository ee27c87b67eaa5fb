//! End-to-end scenarios exercising reflector extraction, association, and
//! the EKF-SLAM filter together, rather than any one crate in isolation.
//!
//! Each scenario starts from mu = (0, 0, 0), Sigma = 0, an empty prior map,
//! Q_u = diag(0.05^2, 0.068^2), Q_t = diag(0.05^2, 0.05^2), and the extrinsic
//! (0.13686, 0, 0).

use approx::assert_relative_eq;
use ekf_slam::{AssociationConfig, EkfSlam, NoiseConfig};
use nalgebra::Matrix2;
use priormap::PriorMap;
use reflectors::{extract_2d, ScanConfig};
use transforms::Transform2D;
use types::{LaserScanMsg, Observation, Point2, Pose};

const EXTRINSIC: (f64, f64, f64) = (0.13686, 0.0, 0.0);

fn default_noise() -> NoiseConfig {
    NoiseConfig {
        q_u: Matrix2::new(0.05 * 0.05, 0.0, 0.0, 0.068 * 0.068),
        q_t: Matrix2::new(0.05 * 0.05, 0.0, 0.0, 0.05 * 0.05),
    }
}

fn new_filter(prior_map: PriorMap) -> EkfSlam {
    EkfSlam::new(Pose::default(), default_noise(), prior_map, AssociationConfig::default(), 0.0)
}

#[test]
fn scenario_1_pure_prediction() {
    let mut filter = new_filter(PriorMap::empty());
    filter.predict(1.0, 0.0, 0.0);
    filter.predict(1.0, 0.0, 1.0);

    let pose = filter.pose();
    assert_relative_eq!(pose.x, 1.0, epsilon = 1e-9);
    assert_relative_eq!(pose.y, 0.0, epsilon = 1e-9);
    assert_relative_eq!(pose.theta, 0.0, epsilon = 1e-9);
    assert!(filter.sigma()[(0, 0)] > 0.0);
    // Not zero: G_u's (1,1) entry (v*dt^2*cos(theta_mid)/2) couples angular
    // process noise into y even on a straight-line heading.
    assert!(filter.sigma()[(1, 1)] > 0.0);
}

#[test]
fn scenario_2_single_landmark_birth() {
    let mut filter = new_filter(PriorMap::empty());
    let obs = Observation {
        stamp: 0.0,
        centers: vec![Point2::new(2.0, 0.0)],
    };
    let summary = filter.on_observation(&obs);

    assert_eq!(summary.new_landmarks, 1);
    assert_eq!(filter.state_len(), 5);
    assert_relative_eq!(filter.mu()[3], 2.0, epsilon = 1e-9);
    assert_relative_eq!(filter.mu()[4], 0.0, epsilon = 1e-9);

    let cov = filter.sigma().view((3, 3), (2, 2)).clone_owned();
    assert_relative_eq!(cov[(0, 0)], default_noise().q_t[(0, 0)], epsilon = 1e-9);
    assert_relative_eq!(cov[(1, 1)], default_noise().q_t[(1, 1)], epsilon = 1e-9);
}

#[test]
fn scenario_3_reobservation_shrinks_covariance() {
    let mut filter = new_filter(PriorMap::empty());
    let obs1 = Observation {
        stamp: 0.0,
        centers: vec![Point2::new(2.0, 0.0)],
    };
    filter.on_observation(&obs1);
    let mu_before = (filter.mu()[3], filter.mu()[4]);
    let cov_before = (filter.sigma()[(3, 3)], filter.sigma()[(4, 4)]);

    filter.predict(0.0, 0.0, 1.0);
    let obs2 = Observation {
        stamp: 1.0,
        centers: vec![Point2::new(2.0, 0.0)],
    };
    filter.on_observation(&obs2);

    assert_eq!(filter.state_len(), 5, "re-observation must not grow the state");
    assert_relative_eq!(filter.mu()[3], mu_before.0, epsilon = 1e-6);
    assert_relative_eq!(filter.mu()[4], mu_before.1, epsilon = 1e-6);
    assert!(filter.sigma()[(3, 3)] < cov_before.0);
    assert!(filter.sigma()[(4, 4)] < cov_before.1);
}

#[test]
fn scenario_4_association_with_prior_map() {
    let prior = PriorMap::from_text("2.137,0.0\n0.0001,0.0,0.0,0.0001\n").unwrap();
    let mut filter = new_filter(prior);

    let pose_before = filter.pose();
    let obs = Observation {
        stamp: 0.0,
        centers: vec![Point2::new(2.0, 0.0)],
    };
    let summary = filter.on_observation(&obs);

    assert_eq!(summary.prior_matches, 1);
    assert_eq!(summary.new_landmarks, 0);
    assert_eq!(filter.state_len(), 3, "a prior-map match must not grow the state");

    let shift = (filter.pose().x - pose_before.x).abs();
    assert!(shift <= (2.137_f64 - 2.13686).abs() + 1e-6);
}

#[test]
fn scenario_5_augmentation_preserves_existing_state() {
    let mut filter = new_filter(PriorMap::empty());
    let obs1 = Observation {
        stamp: 0.0,
        centers: vec![Point2::new(2.0, 0.0)],
    };
    filter.on_observation(&obs1);
    assert_eq!(filter.state_len(), 5);
    let sigma_before = filter.sigma().clone();

    let obs2 = Observation {
        stamp: 0.0,
        centers: vec![Point2::new(0.0, 3.0)],
    };
    filter.on_observation(&obs2);

    assert_eq!(filter.state_len(), 7);
    for r in 0..5 {
        for c in 0..5 {
            assert_eq!(filter.sigma()[(r, c)], sigma_before[(r, c)]);
        }
    }

    let new_block = filter.sigma().view((5, 5), (2, 2)).clone_owned();
    let eig = new_block.symmetric_eigenvalues();
    assert!(eig.iter().all(|&e| e > 0.0), "new landmark block must be positive definite");
}

#[test]
fn scenario_6_gap_bridging_extracts_one_reflector_end_to_end() {
    let num_beams = 10;
    let high = 200.0;
    let low = 10.0;
    let intensities = vec![0.0, 0.0, high, high, low, high, high, 0.0, 0.0, 0.0];
    assert_eq!(intensities.len(), num_beams);

    // Chosen so the bridged run's chord length (first beam to last beam of
    // the accepted run) lands within reflector_min_length +/- its error.
    let angle_increment = 0.045;
    let scan = LaserScanMsg {
        stamp: 0.0,
        angle_min: 0.0,
        angle_max: (num_beams - 1) as f64 * angle_increment,
        angle_increment,
        range_min: 0.1,
        range_max: 10.0,
        ranges: vec![1.0; num_beams],
        intensities,
    };

    let extrinsic = Transform2D::new(EXTRINSIC.0, EXTRINSIC.1, EXTRINSIC.2);
    let config = ScanConfig {
        intensity_min: 100.0,
        ..ScanConfig::default()
    };
    let obs = extract_2d(&scan, &extrinsic, &config).unwrap();
    assert_eq!(obs.centers.len(), 1, "the dim return in the middle of the run must be bridged");

    let mut filter = new_filter(PriorMap::empty());
    let summary = filter.on_observation(&obs);
    assert_eq!(summary.new_landmarks, 1);
    assert_eq!(filter.state_len(), 5);
}

#[test]
fn scenario_7_markers_and_path_track_the_session() {
    let mut filter = new_filter(PriorMap::empty());
    filter.predict(1.0, 0.0, 1.0);
    let obs = Observation {
        stamp: 1.0,
        centers: vec![Point2::new(1.0, 1.0)],
    };
    filter.on_observation(&obs);

    let markers = filter.landmark_markers();
    assert_eq!(markers.len(), 1);
    assert!(markers[0].axis_major > 0.0);
    assert!(markers[0].axis_minor > 0.0);

    assert!(filter.path().len() >= 2);

    let landmarks = filter.session_landmarks();
    assert_eq!(landmarks.len(), 1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session_map.txt");
    PriorMap::save(&path, filter.prior_map().landmarks(), &landmarks).unwrap();
    let reloaded = PriorMap::load(&path).unwrap();
    assert_eq!(reloaded.len(), 1);
}
