//! Retry delay strategies

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::settings::SettingsProvider;

/// Jitter band applied to exponential delays (±20%)
pub const JITTER_RATIO: f64 = 0.2;

// 2^64 seconds already exceeds any sane max delay
const MAX_EXPONENT: u32 = 64;

/// How long to wait before the next restart attempt.
///
/// Delays are expressed in seconds. `attempt` is zero based: the first retry
/// after a failure uses `attempt = 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `min(max_delay, base_delay * multiplier * 2^attempt)`, optionally jittered
    Exponential {
        base_delay: f64,
        max_delay: f64,
        multiplier: f64,
        jitter: bool,
    },

    /// `min(max_delay, base_delay + increment * attempt)`
    Linear {
        base_delay: f64,
        increment: f64,
        max_delay: f64,
    },

    /// Constant delay
    Fixed { delay: f64 },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base_delay: 10.0,
            max_delay: 3600.0,
            multiplier: 1.0,
            jitter: true,
        }
    }
}

impl BackoffStrategy {
    /// Build a strategy from its settings name.
    ///
    /// Unknown names fall back to exponential.
    pub fn from_name(name: &str, settings: &dyn SettingsProvider) -> Self {
        let base_delay = settings.get_float("restart.base_delay_seconds", 10.0);
        let max_delay = settings.get_float("restart.max_delay_seconds", 3600.0);

        match name.trim().to_ascii_lowercase().as_str() {
            "linear" => BackoffStrategy::Linear {
                base_delay,
                increment: settings.get_float("restart.increment_seconds", 30.0),
                max_delay,
            },
            "fixed" => BackoffStrategy::Fixed {
                delay: settings.get_float("restart.fixed_delay_seconds", 60.0),
            },
            other => {
                if other != "exponential" {
                    warn!("Unknown backoff strategy {:?}, using exponential", name);
                }
                BackoffStrategy::Exponential {
                    base_delay,
                    max_delay,
                    multiplier: settings.get_float("restart.multiplier", 1.0),
                    jitter: settings.get_bool("restart.jitter", true),
                }
            }
        }
    }

    /// Strategy name as stored in settings
    pub fn name(&self) -> &'static str {
        match self {
            BackoffStrategy::Exponential { .. } => "exponential",
            BackoffStrategy::Linear { .. } => "linear",
            BackoffStrategy::Fixed { .. } => "fixed",
        }
    }

    /// Delay before jitter
    pub fn raw_delay(&self, attempt: u32) -> f64 {
        match *self {
            BackoffStrategy::Exponential {
                base_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let growth = 2f64.powi(attempt.min(MAX_EXPONENT) as i32);
                (base_delay * multiplier * growth).min(max_delay)
            }
            BackoffStrategy::Linear {
                base_delay,
                increment,
                max_delay,
            } => (base_delay + increment * attempt as f64).min(max_delay),
            BackoffStrategy::Fixed { delay } => delay,
        }
    }

    /// Delay to wait, with jitter applied when enabled.
    ///
    /// Jittered delays never fall below `base_delay`.
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> f64 {
        let raw = self.raw_delay(attempt);
        match *self {
            BackoffStrategy::Exponential {
                base_delay,
                jitter: true,
                ..
            } => {
                let factor = rng.gen_range((1.0 - JITTER_RATIO)..=(1.0 + JITTER_RATIO));
                (raw * factor).max(base_delay)
            }
            _ => raw,
        }
    }
}
