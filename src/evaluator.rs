use serde::{Deserialize, Serialize};

/// Classification of a stopped gauge reading
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    #[strum(serialize = "Perfect!")]
    Perfect,
    #[strum(serialize = "Too Strong!")]
    TooStrong,
    #[strum(serialize = "Too Weak...")]
    TooWeak,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Perfect)
    }
}

/// Inclusive power interval counted as a successful throw
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerfectRange {
    pub low: f64,
    pub high: f64,
}

impl PerfectRange {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, power: f64) -> bool {
        power >= self.low && power <= self.high
    }
}

impl Default for PerfectRange {
    fn default() -> Self {
        Self::new(70.0, 90.0)
    }
}

/// Allowed range for the gauge tick period. Lower is faster, i.e. harder.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeedBounds {
    pub min_ms: f64,
    pub max_ms: f64,
}

impl SpeedBounds {
    pub fn new(min_ms: f64, max_ms: f64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn clamp(&self, speed_ms: f64) -> f64 {
        speed_ms.max(self.min_ms).min(self.max_ms)
    }

    pub fn contains(&self, speed_ms: f64) -> bool {
        speed_ms >= self.min_ms && speed_ms <= self.max_ms
    }
}

impl Default for SpeedBounds {
    fn default() -> Self {
        Self::new(15.0, 40.0)
    }
}

/// Factors applied by [`adapt_speed`]
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdaptationTuning {
    /// Fraction of the current period removed after a perfect throw
    pub success_speedup: f64,
    /// Milliseconds added per unit of overshoot
    pub overshoot_easing: f64,
    /// Milliseconds removed per unit of undershoot
    pub undershoot_speedup: f64,
}

impl Default for AdaptationTuning {
    fn default() -> Self {
        Self {
            success_speedup: 0.1,
            overshoot_easing: 0.5,
            undershoot_speedup: 0.1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluation {
    pub power: f64,
    pub outcome: Outcome,
    /// Distance to the nearest edge of the perfect range, 0 for a perfect throw
    pub margin: f64,
}

pub fn evaluate(power: f64, range: PerfectRange) -> Evaluation {
    let (outcome, margin) = if range.contains(power) {
        (Outcome::Perfect, 0.0)
    } else if power > range.high {
        (Outcome::TooStrong, power - range.high)
    } else {
        (Outcome::TooWeak, range.low - power)
    };

    Evaluation {
        power,
        outcome,
        margin,
    }
}

/// Next gauge period after a throw.
///
/// A perfect throw speeds the gauge up by a fraction of its period and an
/// overshoot slows it down in proportion to the margin. An undershoot also
/// speeds it up, in proportion to the margin. The result is always clamped to
/// `bounds`.
pub fn adapt_speed(
    evaluation: &Evaluation,
    speed_ms: f64,
    bounds: SpeedBounds,
    tuning: &AdaptationTuning,
) -> f64 {
    let next = match evaluation.outcome {
        Outcome::Perfect => speed_ms - speed_ms * tuning.success_speedup,
        Outcome::TooStrong => speed_ms + evaluation.margin * tuning.overshoot_easing,
        // TODO: confirm with the clinical team whether an under-powered throw
        // should ease the gauge instead; kept as a speed-up to match the game
        // as shipped.
        Outcome::TooWeak => speed_ms - evaluation.margin * tuning.undershoot_speedup,
    };
    bounds.clamp(next)
}
