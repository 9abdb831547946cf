//! Temporal decay scoring and lifecycle decisions.
//!
//! The combined score of a record at time `t` is
//! `max(use_count, 1)^beta * f(Δt) * strength`, where `f` is one of three
//! decay curves. Scores are computed on demand and never persisted.

use serde::Serialize;

use crate::config::{DecayConfig, LifecycleConfig};
use crate::error::{Error, Result};
use crate::memory::types::{Memory, MemoryStatus};

const SECONDS_PER_DAY: f64 = 86_400.0;
/// Upper clamp for Δt — ten years. Anything older decays identically.
const MAX_DELTA_SECS: f64 = 10.0 * 365.25 * SECONDS_PER_DAY;

/// One of the three decay curves, with resolved parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecayModel {
    /// `f(Δt) = exp(-lambda * Δt)`
    Exponential { lambda: f64 },
    /// `f(Δt) = (1 + Δt/t0)^(-alpha)`, with `t0` derived so `f(H) = 0.5`.
    PowerLaw { alpha: f64, t0: f64 },
    /// `f(Δt) = w * exp(-fast * Δt) + (1-w) * exp(-slow * Δt)`
    TwoComponent { fast: f64, slow: f64, weight: f64 },
}

impl DecayModel {
    /// Resolve a model from config. Unknown model names are `Invalid`.
    pub fn from_config(config: &DecayConfig) -> Result<Self> {
        match config.decay_model.as_str() {
            "exponential" => Ok(Self::Exponential {
                lambda: lambda_from_half_life(config.half_life_days),
            }),
            "power_law" => {
                let alpha = config.alpha;
                if alpha <= 0.0 {
                    return Err(Error::Invalid(format!("alpha must be > 0, got {alpha}")));
                }
                let half_life_secs = config.half_life_days * SECONDS_PER_DAY;
                let t0 = half_life_secs / (2f64.powf(1.0 / alpha) - 1.0);
                Ok(Self::PowerLaw { alpha, t0 })
            }
            "two_component" => {
                let weight = config.tc_weight_fast;
                if !(0.0..=1.0).contains(&weight) {
                    return Err(Error::Invalid(format!(
                        "tc_weight_fast must be in [0, 1], got {weight}"
                    )));
                }
                Ok(Self::TwoComponent {
                    fast: config.tc_lambda_fast,
                    slow: config.tc_lambda_slow,
                    weight,
                })
            }
            other => Err(Error::Invalid(format!("unknown decay model: {other}"))),
        }
    }

    /// Retention factor for an elapsed time of `delta_secs`.
    fn retention(&self, delta_secs: f64) -> f64 {
        match *self {
            Self::Exponential { lambda } => (-lambda * delta_secs).exp(),
            Self::PowerLaw { alpha, t0 } => (1.0 + delta_secs / t0).powf(-alpha),
            Self::TwoComponent { fast, slow, weight } => {
                weight * (-fast * delta_secs).exp() + (1.0 - weight) * (-slow * delta_secs).exp()
            }
        }
    }
}

/// Scoring context: decay model, use-count exponent, and lifecycle thresholds.
#[derive(Debug)]
pub struct Scorer {
    model: DecayModel,
    beta: f64,
    lifecycle: LifecycleConfig,
    /// Count of Δt clamps (clock skew or ancient records); metric only.
    clamped: std::sync::atomic::AtomicU64,
}

/// Outcome of a promotion check, with the reason it fired.
#[derive(Debug, Clone, Serialize)]
pub struct PromoteDecision {
    pub promote: bool,
    pub reason: String,
    pub score: f64,
}

impl Scorer {
    pub fn new(model: DecayModel, beta: f64, lifecycle: LifecycleConfig) -> Self {
        Self {
            model,
            beta,
            lifecycle,
            clamped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn from_config(decay: &DecayConfig, lifecycle: &LifecycleConfig) -> Result<Self> {
        Ok(Self::new(
            DecayModel::from_config(decay)?,
            decay.beta,
            lifecycle.clone(),
        ))
    }

    /// Combined score of `memory` at time `now`. A negative Δt (clock skew)
    /// clamps to zero; `use_count = 0` scores as if it were 1.
    pub fn score(&self, memory: &Memory, now: i64) -> f64 {
        let raw_delta = (now - memory.last_used) as f64;
        let delta = raw_delta.clamp(0.0, MAX_DELTA_SECS);
        if delta != raw_delta {
            self.clamped
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }

        let use_component = f64::from(memory.use_count.max(1)).powf(self.beta);
        use_component * self.model.retention(delta) * memory.strength
    }

    /// A record is forgettable when its score has sunk below the forget
    /// threshold, it is still active, and it is not pinned by strength.
    pub fn should_forget(&self, memory: &Memory, now: i64) -> bool {
        memory.status == MemoryStatus::Active
            && memory.strength < self.lifecycle.pinned_strength_floor
            && self.score(memory, now) < self.lifecycle.forget_threshold
    }

    /// Promotion fires on a high score, or on heavy use inside the promotion
    /// window regardless of score.
    pub fn should_promote(&self, memory: &Memory, now: i64) -> PromoteDecision {
        let score = self.score(memory, now);
        if memory.status != MemoryStatus::Active {
            return PromoteDecision {
                promote: false,
                reason: format!("status is {}", memory.status),
                score,
            };
        }

        if score >= self.lifecycle.promote_threshold {
            return PromoteDecision {
                promote: true,
                reason: format!(
                    "score {:.4} >= threshold {}",
                    score, self.lifecycle.promote_threshold
                ),
                score,
            };
        }

        let window_secs = self.lifecycle.promote_time_window_days * SECONDS_PER_DAY;
        let age_secs = (now - memory.created_at).max(0) as f64;
        if memory.use_count >= self.lifecycle.promote_use_count && age_secs <= window_secs {
            return PromoteDecision {
                promote: true,
                reason: format!(
                    "use_count {} >= {} within {} days",
                    memory.use_count,
                    self.lifecycle.promote_use_count,
                    self.lifecycle.promote_time_window_days
                ),
                score,
            };
        }

        PromoteDecision {
            promote: false,
            reason: "below score and use-count criteria".into(),
            score,
        }
    }

    /// Project the score at a future instant (same formula, different `now`).
    pub fn project_score_at(&self, memory: &Memory, target_time: i64) -> f64 {
        self.score(memory, target_time)
    }

    /// Seconds until the score decays below `threshold`, or `None` if it is
    /// already there. Only meaningful for the exponential model, where the
    /// decay inverts in closed form.
    pub fn time_until_threshold(&self, memory: &Memory, now: i64, threshold: f64) -> Option<f64> {
        let current = self.score(memory, now);
        if current <= threshold {
            return None;
        }
        let lambda = match self.model {
            DecayModel::Exponential { lambda } => lambda,
            _ => return None,
        };
        // threshold = current * exp(-lambda * t)  →  t = -ln(threshold/current)/lambda
        let remaining = -(threshold / current).ln() / lambda;
        Some(remaining.max(0.0))
    }

    /// Number of Δt clamps observed since construction.
    pub fn clamped_count(&self) -> u64 {
        self.clamped.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn lifecycle(&self) -> &LifecycleConfig {
        &self.lifecycle
    }
}

/// Decay constant from a half-life in days: `ln 2 / (H * 86400)`.
pub fn lambda_from_half_life(half_life_days: f64) -> f64 {
    std::f64::consts::LN_2 / (half_life_days * SECONDS_PER_DAY)
}

/// Half-life in days from a decay constant.
pub fn half_life_from_lambda(lambda: f64) -> f64 {
    std::f64::consts::LN_2 / lambda / SECONDS_PER_DAY
}
