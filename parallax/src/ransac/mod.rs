//! RANSAC (Random Sample Consensus) fitting of planar models to
//! correspondences.
//!
//! Each trial draws a minimal sample, fits a candidate and counts the pairs
//! whose residual is below the inlier threshold. The candidate with the most
//! inliers wins and is re-fit on its full inlier set. The random source is
//! passed in by the caller so runs can be made reproducible.


pub mod models;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::correspondence::Correspondence;

pub use models::{AffineFit, AffineFundamental, AffineFundamentalFit, HomographyFit};

/// A model family that can be fit to correspondences.
pub trait FittingModel {
    type Model: Clone;

    /// Size of a minimal sample.
    const MIN_SAMPLES: usize;

    /// Least-squares fit over `pairs` (at least `MIN_SAMPLES`). `None` for
    /// degenerate input.
    fn fit(&self, pairs: &[Correspondence]) -> Option<Self::Model>;

    /// Distance of `pair` from `model`, in pixels.
    fn residual(&self, model: &Self::Model, pair: &Correspondence) -> f64;
}

/// Trial count and acceptance rule for one RANSAC run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RansacParams {
    pub iterations: usize,
    /// Inlier residual bound, in pixels.
    pub inlier_threshold: f64,
    /// Minimum inliers for a model to be accepted.
    pub min_inliers: usize,
}

impl RansacParams {
    /// Requires at least half of `n` pairs to agree.
    pub fn majority(iterations: usize, inlier_threshold: f64, n: usize) -> Self {
        Self {
            iterations,
            inlier_threshold,
            min_inliers: n / 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FitResult<M> {
    pub model: M,
    /// Indices into the input pairs, ascending.
    pub inliers: Vec<usize>,
}

impl<M> FitResult<M> {
    pub fn inlier_pairs(&self, pairs: &[Correspondence]) -> Vec<Correspondence> {
        self.inliers.iter().map(|&i| pairs[i]).collect()
    }
}

/// Why a RANSAC run produced no model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RansacFailure {
    TooFewPairs { needed: usize, found: usize },
    NoConsensus { best: usize, required: usize },
}

impl std::fmt::Display for RansacFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewPairs { needed, found } => {
                write!(f, "need {needed} pairs, found {found}")
            }
            Self::NoConsensus { best, required } => {
                write!(f, "best model has {best} inliers, {required} required")
            }
        }
    }
}

pub struct RobustModelFitter {
    params: RansacParams,
}

impl RobustModelFitter {
    pub fn new(params: RansacParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RansacParams {
        &self.params
    }

    pub fn fit<F, R>(
        &self,
        model: &F,
        pairs: &[Correspondence],
        rng: &mut R,
    ) -> Result<FitResult<F::Model>, RansacFailure>
    where
        F: FittingModel,
        R: Rng + ?Sized,
    {
        let n = pairs.len();
        if n < F::MIN_SAMPLES {
            return Err(RansacFailure::TooFewPairs {
                needed: F::MIN_SAMPLES,
                found: n,
            });
        }
        let required = self.params.min_inliers.max(F::MIN_SAMPLES);

        let mut best: Option<(F::Model, Vec<usize>)> = None;
        let mut sample_indices = Vec::with_capacity(F::MIN_SAMPLES);
        let mut sample = Vec::with_capacity(F::MIN_SAMPLES);

        for _ in 0..self.params.iterations {
            random_sample_into(rng, n, F::MIN_SAMPLES, &mut sample_indices);
            sample.clear();
            sample.extend(sample_indices.iter().map(|&i| pairs[i]));

            let Some(candidate) = model.fit(&sample) else {
                continue;
            };
            let inliers = self.inliers_of(model, &candidate, pairs);
            if best
                .as_ref()
                .is_none_or(|(_, best_inliers)| inliers.len() > best_inliers.len())
            {
                let all_agree = inliers.len() == n;
                best = Some((candidate, inliers));
                if all_agree {
                    break;
                }
            }
        }

        let best_count = best.as_ref().map_or(0, |(_, inliers)| inliers.len());
        let Some((candidate, inliers)) = best.filter(|_| best_count >= required) else {
            return Err(RansacFailure::NoConsensus {
                best: best_count,
                required,
            });
        };

        // Refit on the consensus set; keep the refit only if it holds on to
        // at least as many inliers.
        let consensus: Vec<Correspondence> = inliers.iter().map(|&i| pairs[i]).collect();
        if let Some(refined) = model.fit(&consensus) {
            let refined_inliers = self.inliers_of(model, &refined, pairs);
            if refined_inliers.len() >= inliers.len() {
                return Ok(FitResult {
                    model: refined,
                    inliers: refined_inliers,
                });
            }
        }

        Ok(FitResult {
            model: candidate,
            inliers,
        })
    }

    /// Like [`Self::fit`] with a ChaCha8 stream seeded from `seed`, or from the
    /// OS when `None`.
    pub fn fit_seeded<F: FittingModel>(
        &self,
        model: &F,
        pairs: &[Correspondence],
        seed: Option<u64>,
    ) -> Result<FitResult<F::Model>, RansacFailure> {
        let mut rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };
        self.fit(model, pairs, &mut rng)
    }

    fn inliers_of<F: FittingModel>(
        &self,
        model: &F,
        candidate: &F::Model,
        pairs: &[Correspondence],
    ) -> Vec<usize> {
        pairs
            .iter()
            .enumerate()
            .filter(|(_, pair)| {
                let r = model.residual(candidate, pair);
                r.is_finite() && r <= self.params.inlier_threshold
            })
            .map(|(i, _)| i)
            .collect()
    }
}

/// Draws `k` distinct indices from `0..n` into `buffer`.
fn random_sample_into<R: Rng + ?Sized>(rng: &mut R, n: usize, k: usize, buffer: &mut Vec<usize>) {
    debug_assert!(k <= n, "Cannot sample {} indices from {}", k, n);
    buffer.clear();

    if k <= n / 2 {
        // Floyd's algorithm.
        for j in (n - k)..n {
            let t = rng.random_range(0..=j);
            if buffer.contains(&t) {
                buffer.push(j);
            } else {
                buffer.push(t);
            }
        }
    } else {
        buffer.extend(0..n);
        buffer.shuffle(rng);
        buffer.truncate(k);
    }
}
