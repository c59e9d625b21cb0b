//! Per-client behaviour profiles.
//!
//! Online mean and variance of operation amounts (USD equivalent) using
//! Welford's update, so a profile never stores the raw history.

use crate::{
    error::{DeskError, DeskResult},
    types::Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Below this many samples a z-score is not meaningful.
pub const MIN_SAMPLES_FOR_Z: u64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorProfile {
    pub count: u64,
    pub mean: f64,
    /// Sum of squared deviations from the running mean.
    pub m2: f64,
    pub min: f64,
    pub max: f64,
    pub updated_at: Option<Timestamp>,
    /// Alerts on this client that were resolved as false positives.
    #[serde(default)]
    pub false_positive_alerts: u64,
}

impl Default for BehaviorProfile {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            updated_at: None,
            false_positive_alerts: 0,
        }
    }
}

impl BehaviorProfile {
    pub fn update(&mut self, x: f64, now: Timestamp) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        self.min = self.min.min(x);
        self.max = self.max.max(x);
        self.updated_at = Some(now);
    }

    /// Population variance, clamped at zero against float noise.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.m2 / self.count as f64).max(0.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Standard score of `x` against this profile.
    ///
    /// `None` with fewer than `min_samples` observations. With zero variance
    /// the score is `0` for the mean itself and infinite otherwise.
    pub fn z_score(&self, x: f64, min_samples: u64) -> Option<f64> {
        if self.count < min_samples.max(1) {
            return None;
        }
        let sd = self.std_dev();
        if sd == 0.0 {
            return Some(if x == self.mean {
                0.0
            } else if x > self.mean {
                f64::INFINITY
            } else {
                f64::NEG_INFINITY
            });
        }
        Some((x - self.mean) / sd)
    }
}

/// All client profiles, keyed by client id.
#[derive(Default)]
pub struct ProfileBook {
    profiles: RwLock<HashMap<String, BehaviorProfile>>,
}

impl ProfileBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, client_id: &str) -> Option<BehaviorProfile> {
        self.profiles.read().ok()?.get(client_id).cloned()
    }

    pub fn update(&self, client_id: &str, amount_usd: f64, now: Timestamp) -> DeskResult<BehaviorProfile> {
        let mut profiles = self
            .profiles
            .write()
            .map_err(|_| DeskError::LockPoisoned("profile book"))?;
        let profile = profiles.entry(client_id.to_string()).or_default();
        profile.update(amount_usd, now);
        Ok(profile.clone())
    }

    /// Count a false-positive resolution against an existing profile.
    /// Clients without operations have no profile and nothing is recorded.
    pub fn note_false_positive(&self, client_id: &str) -> DeskResult<Option<BehaviorProfile>> {
        let mut profiles = self
            .profiles
            .write()
            .map_err(|_| DeskError::LockPoisoned("profile book"))?;
        Ok(profiles.get_mut(client_id).map(|profile| {
            profile.false_positive_alerts += 1;
            profile.clone()
        }))
    }

    pub fn len(&self) -> usize {
        self.profiles.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
