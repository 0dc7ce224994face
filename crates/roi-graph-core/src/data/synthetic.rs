//! Seeded synthetic sessions with known ground truth.
//!
//! A fixed population of cells is drawn once. Each session detects every
//! cell with `presence_probability`, jitters its position, adds feature noise
//! and shuffles the detection order, so identical cells never share an index
//! pattern across sessions.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::config::SyntheticConfig;
use crate::error::{TrackingError, TrackingResult};
use crate::types::{RoiRecord, SessionData, SpatialFootprint};

/// Generated sessions plus the true cell identity of every ROI.
#[derive(Debug, Clone)]
pub struct SyntheticSessions {
    pub sessions: Vec<SessionData>,
    /// Cell identity of each ROI, concatenated in global index order.
    pub identities: Vec<usize>,
}

struct Cell {
    y: f32,
    x: f32,
    embedding: Vec<f32>,
    wavelet: Vec<f32>,
}

/// Generate sessions from `config`. Identical `(config, seed)` gives identical output.
pub fn generate_sessions(config: &SyntheticConfig, seed: u64) -> TrackingResult<SyntheticSessions> {
    config.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let unit = normal(1.0)?;
    let drift = normal(config.position_jitter)?;
    let noise = normal(config.feature_noise)?;

    let r = config.blob_radius as f32;
    let y_max = (config.fov_height - 1) as f32 - r;
    let x_max = (config.fov_width - 1) as f32 - r;
    let cells: Vec<Cell> = (0..config.n_identities)
        .map(|_| Cell {
            y: rng.gen_range(r..=y_max),
            x: rng.gen_range(r..=x_max),
            embedding: (0..config.embedding_dim).map(|_| unit.sample(&mut rng)).collect(),
            wavelet: (0..config.wavelet_dim).map(|_| unit.sample(&mut rng)).collect(),
        })
        .collect();

    let mut sessions = Vec::with_capacity(config.n_sessions);
    let mut identities = Vec::new();
    for s in 0..config.n_sessions {
        let mut present: Vec<usize> = (0..cells.len())
            .filter(|_| rng.gen_bool(config.presence_probability))
            .collect();
        present.shuffle(&mut rng);
        present.truncate(config.max_rois_per_session);

        let mut rois = Vec::with_capacity(present.len());
        for &id in &present {
            let cell = &cells[id];
            let cy = (cell.y + drift.sample(&mut rng)).clamp(r, y_max);
            let cx = (cell.x + drift.sample(&mut rng)).clamp(r, x_max);
            let footprint = blob(cy, cx, config)?;
            let embedding = cell.embedding.iter().map(|v| v + noise.sample(&mut rng)).collect();
            let wavelet = cell.wavelet.iter().map(|v| v + noise.sample(&mut rng)).collect();
            rois.push(
                RoiRecord::new(footprint)
                    .with_embedding(embedding)
                    .with_wavelet(wavelet),
            );
        }
        identities.extend_from_slice(&present);
        sessions.push(SessionData {
            name: format!("session_{:03}", s),
            fov_height: config.fov_height,
            fov_width: config.fov_width,
            rois,
        });
    }

    Ok(SyntheticSessions {
        sessions,
        identities,
    })
}

fn normal(std_dev: f32) -> TrackingResult<Normal<f32>> {
    Normal::new(0.0, std_dev).map_err(|e| TrackingError::invalid_parameter(e.to_string()))
}

/// Gaussian disc of `blob_radius` around `(cy, cx)`.
fn blob(cy: f32, cx: f32, config: &SyntheticConfig) -> TrackingResult<SpatialFootprint> {
    let r = config.blob_radius as f32;
    let sigma = (r / 2.0).max(0.5);
    let (y0, x0) = (cy.round() as i64, cx.round() as i64);
    let reach = config.blob_radius as i64 + 1;

    let mut coords = Vec::new();
    for y in (y0 - reach)..=(y0 + reach) {
        for x in (x0 - reach)..=(x0 + reach) {
            if y < 0 || x < 0 || y >= config.fov_height as i64 || x >= config.fov_width as i64 {
                continue;
            }
            let d2 = (y as f32 - cy).powi(2) + (x as f32 - cx).powi(2);
            if d2 <= (r + 0.5).powi(2) {
                coords.push((y as usize, x as usize, (-d2 / (2.0 * sigma * sigma)).exp()));
            }
        }
    }
    SpatialFootprint::from_coords(coords, config.fov_width)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SyntheticConfig {
        SyntheticConfig {
            n_sessions: 4,
            max_rois_per_session: 20,
            n_identities: 25,
            fov_height: 48,
            fov_width: 48,
            ..SyntheticConfig::default()
        }
    }

    #[test]
    fn test_same_seed_same_sessions() {
        let a = generate_sessions(&small(), 7).expect("generate");
        let b = generate_sessions(&small(), 7).expect("generate");
        assert_eq!(a.sessions, b.sessions, "generator must be deterministic");
        assert_eq!(a.identities, b.identities);

        let c = generate_sessions(&small(), 8).expect("generate");
        assert_ne!(a.sessions, c.sessions, "different seeds must differ");
        println!("[PASS] synthetic generator is seeded");
    }

    #[test]
    fn test_shapes_and_caps() {
        let config = small();
        let out = generate_sessions(&config, 1).expect("generate");
        assert_eq!(out.sessions.len(), 4);

        let total: usize = out.sessions.iter().map(|s| s.rois.len()).sum();
        assert_eq!(out.identities.len(), total);
        for session in &out.sessions {
            assert!(session.rois.len() <= config.max_rois_per_session);
            for roi in &session.rois {
                assert!(!roi.footprint.is_empty(), "blob must cover pixels");
                assert!(roi.footprint.max_pixel().is_some_and(|p| p < 48 * 48));
                assert_eq!(roi.embedding.as_ref().map(Vec::len), Some(config.embedding_dim));
                assert_eq!(roi.wavelet.as_ref().map(Vec::len), Some(config.wavelet_dim));
            }
        }
    }

    #[test]
    fn test_identity_unique_within_session() {
        let out = generate_sessions(&small(), 3).expect("generate");
        let mut start = 0;
        for session in &out.sessions {
            let mut ids = out.identities[start..start + session.rois.len()].to_vec();
            ids.sort_unstable();
            ids.dedup();
            assert_eq!(ids.len(), session.rois.len(), "a cell appears at most once per session");
            start += session.rois.len();
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SyntheticConfig {
            presence_probability: 0.0,
            ..small()
        };
        assert!(generate_sessions(&config, 0).is_err());
    }
}
