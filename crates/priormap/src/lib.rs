//! Prior-map file persistence.
//!
//! The file format is two UTF-8 text lines of comma-separated reals: a flat
//! list of landmark coordinates, then a flat list of 2x2 covariance entries
//! in row-major order, one covariance per landmark in the same order as the
//! coordinates.

use nalgebra::{Matrix2, Vector2};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum PriorMapError {
    #[error("prior-map file must have exactly 2 lines, found {0}")]
    LineCountMismatch(usize),
    #[error("landmark coordinate count ({coords}) and covariance entry count ({covariances}) are inconsistent")]
    LengthMismatch { coords: usize, covariances: usize },
    #[error("failed to parse prior-map entry: {0}")]
    Parse(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single prior-map reflector: a fixed position and its 2x2 covariance.
#[derive(Debug, Clone, Copy)]
pub struct PriorLandmark {
    pub position: Vector2<f64>,
    pub covariance: Matrix2<f64>,
}

/// The set of reflectors known before the session. Immutable after load;
/// treated as fixed evidence during data association.
#[derive(Debug, Clone, Default)]
pub struct PriorMap {
    landmarks: Vec<PriorLandmark>,
}

impl PriorMap {
    pub fn empty() -> Self {
        Self { landmarks: Vec::new() }
    }

    pub fn landmarks(&self) -> &[PriorLandmark] {
        &self.landmarks
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    /// Load a prior map from disk. Returns an empty map if the file is
    /// absent at `path` and the caller explicitly permits that via
    /// [`PriorMap::load_or_empty`]; `load` itself is strict and propagates
    /// an I/O error for a missing file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PriorMapError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_text(&text)
    }

    /// Load a prior map, treating a missing file as an empty map (the
    /// first-session case, with no prior map to seed from yet).
    pub fn load_or_empty(path: impl AsRef<Path>) -> Result<Self, PriorMapError> {
        if !path.as_ref().exists() {
            info!(path = %path.as_ref().display(), "no prior-map file yet, starting from an empty map");
            return Ok(Self::empty());
        }
        Self::load(path)
    }

    pub fn from_text(text: &str) -> Result<Self, PriorMapError> {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() != 2 {
            return Err(PriorMapError::LineCountMismatch(lines.len()));
        }

        let coords = parse_csv(lines[0])?;
        let covariances = parse_csv(lines[1])?;

        if coords.len() % 2 != 0 || covariances.len() % 4 != 0 {
            return Err(PriorMapError::LengthMismatch {
                coords: coords.len(),
                covariances: covariances.len(),
            });
        }
        let num_landmarks = coords.len() / 2;
        if covariances.len() / 4 != num_landmarks {
            return Err(PriorMapError::LengthMismatch {
                coords: coords.len(),
                covariances: covariances.len(),
            });
        }

        let landmarks = (0..num_landmarks)
            .map(|i| {
                let position = Vector2::new(coords[2 * i], coords[2 * i + 1]);
                let covariance = Matrix2::new(
                    covariances[4 * i],
                    covariances[4 * i + 1],
                    covariances[4 * i + 2],
                    covariances[4 * i + 3],
                );
                PriorLandmark { position, covariance }
            })
            .collect();

        Ok(Self { landmarks })
    }

    /// Serialize `prior` followed by `session` (in-state landmarks
    /// discovered this session) to the two-line layout, so a follow-on
    /// session can load this file as its own prior map.
    pub fn save(
        path: impl AsRef<Path>,
        prior: &[PriorLandmark],
        session: &[PriorLandmark],
    ) -> Result<(), PriorMapError> {
        let text = Self::to_text(prior, session);
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn to_text(prior: &[PriorLandmark], session: &[PriorLandmark]) -> String {
        let all: Vec<&PriorLandmark> = prior.iter().chain(session.iter()).collect();

        let coord_line = all
            .iter()
            .flat_map(|l| [l.position.x, l.position.y])
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let cov_line = all
            .iter()
            .flat_map(|l| {
                [
                    l.covariance[(0, 0)],
                    l.covariance[(0, 1)],
                    l.covariance[(1, 0)],
                    l.covariance[(1, 1)],
                ]
            })
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");

        format!("{coord_line}\n{cov_line}\n")
    }
}

fn parse_csv(line: &str) -> Result<Vec<f64>, PriorMapError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split(',')
        .map(|s| {
            s.trim()
                .parse::<f64>()
                .map_err(|e| PriorMapError::Parse(format!("{s:?}: {e}")))
        })
        .collect()
}
