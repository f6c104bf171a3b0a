use crate::backend::{GameBackend, UserId};
use crate::evaluator::SpeedBounds;
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Difficulty tier recommended by the backend's policy
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DifficultyTier {
    Easy,
    Normal,
    Hard,
}

impl DifficultyTier {
    /// Parses a backend label; unknown labels are `None`
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "easy" => Some(Self::Easy),
            "normal" => Some(Self::Normal),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }
}

/// Gauge period (ms per tick) for each tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierSpeeds {
    pub easy: f64,
    pub normal: f64,
    pub hard: f64,
}

impl Default for TierSpeeds {
    fn default() -> Self {
        Self {
            easy: 40.0,
            normal: 25.0,
            hard: 15.0,
        }
    }
}

impl TierSpeeds {
    pub fn speed_for(&self, tier: DifficultyTier) -> f64 {
        match tier {
            DifficultyTier::Easy => self.easy,
            DifficultyTier::Normal => self.normal,
            DifficultyTier::Hard => self.hard,
        }
    }

    /// Hardest tier is the floor, easiest tier is the ceiling
    pub fn bounds(&self) -> SpeedBounds {
        let min = self.easy.min(self.normal).min(self.hard);
        let max = self.easy.max(self.normal).max(self.hard);
        SpeedBounds::new(min, max)
    }
}

/// What the backend's policy chose for this player, kept verbatim so it can be
/// echoed back with the RL update at the end of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub tier: DifficultyTier,
    pub state: Value,
    pub action: Value,
}

impl Recommendation {
    pub fn new(tier: DifficultyTier, state: Value, action: Option<Value>) -> Self {
        let action = action.unwrap_or_else(|| Value::String(tier.to_string()));
        Self {
            tier,
            state,
            action,
        }
    }
}

/// Optional starting difficulty for a session.
///
/// The default seed carries no recommendation and starts the gauge at the
/// configured default speed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DifficultySeed {
    pub recommendation: Option<Recommendation>,
}

impl DifficultySeed {
    pub fn recommended(recommendation: Recommendation) -> Self {
        Self {
            recommendation: Some(recommendation),
        }
    }

    /// Asks the backend for a recommendation, falling back to the default seed
    pub fn request(backend: &dyn GameBackend, user_id: UserId) -> Self {
        match backend.recommend_difficulty(user_id) {
            Ok(recommendation) => {
                info!(
                    "Difficulty recommendation for user {}: {}",
                    user_id, recommendation.tier
                );
                Self::recommended(recommendation)
            }
            Err(e) => {
                warn!("Difficulty recommendation failed, using default speed: {}", e);
                Self::default()
            }
        }
    }

    pub fn tier(&self) -> Option<DifficultyTier> {
        self.recommendation.as_ref().map(|r| r.tier)
    }

    pub fn initial_speed_ms(&self, config: &SessionConfig) -> f64 {
        let speed = match &self.recommendation {
            Some(r) => config.tier_speeds.speed_for(r.tier),
            None => config.initial_speed_ms,
        };
        config.speed_bounds.clamp(speed)
    }
}
