use crate::evaluator::PerfectRange;
use crate::gauge::{Direction, GaugeState, GAUGE_MAX, GAUGE_MIN};
use crate::session::Session;
use crate::turn::TurnPhase;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Virtual clock resolution; finer than the fastest gauge tick
pub const SIM_STEP: Duration = Duration::from_millis(5);

// A five-turn session needs well under a minute of virtual time
const MAX_STEPS: u32 = 200_000;

pub struct BotPlayer {
    rng: StdRng,
    skill: f64,
}

impl BotPlayer {
    /// `skill` is clamped to [0, 1]; 1 always aims inside the perfect range
    pub fn new(skill: f64, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            skill: skill.clamp(0.0, 1.0),
        }
    }

    pub fn skill(&self) -> f64 {
        self.skill
    }

    /// Time between input opening and the press
    pub fn hesitation(&mut self) -> Duration {
        let max_ms = 200 + ((1.0 - self.skill) * 1_300.0) as u64;
        Duration::from_millis(self.rng.gen_range(100..=max_ms))
    }

    /// Gauge value the bot will try to release at
    pub fn aim(&mut self, range: PerfectRange) -> f64 {
        let center = (range.low + range.high) / 2.0;
        let half_width = (range.high - range.low) / 2.0;
        let spread = half_width * 0.5 + (1.0 - self.skill) * 35.0;
        let offset = self.rng.gen_range(-spread..=spread);
        (center + offset).clamp(GAUGE_MIN, GAUGE_MAX)
    }

    pub fn should_release(aim: f64, gauge: GaugeState) -> bool {
        match gauge.direction {
            Direction::Up => gauge.value >= aim,
            Direction::Down => gauge.value <= aim,
        }
    }
}

/// Plays `session` to completion on a virtual clock starting at `start`, so the
/// same seed gives the same throws. Returns the virtual instant at which the
/// session completed.
pub fn simulate_session(session: &mut Session, bot: &mut BotPlayer, start: Instant) -> Instant {
    let range = session.controller().config().perfect_range;
    let mut now = start;
    let mut press_at: Option<Instant> = None;
    let mut aim: Option<f64> = None;

    for _ in 0..MAX_STEPS {
        match session.advance(now) {
            TurnPhase::SessionComplete | TurnPhase::Aborted => return now,
            TurnPhase::Ready if session.controller().accepts_input(now) => {
                let at = *press_at.get_or_insert_with(|| now + bot.hesitation());
                if now >= at && session.press_start(now) {
                    let target = bot.aim(range);
                    debug!("Bot aiming at {:.1}", target);
                    aim = Some(target);
                    press_at = None;
                }
            }
            TurnPhase::Charging => {
                if let Some(target) = aim {
                    if BotPlayer::should_release(target, session.gauge()) {
                        session.press_end(now);
                        aim = None;
                    }
                }
            }
            _ => {}
        }
        now += SIM_STEP;
    }

    warn!("Simulation stopped before the session completed");
    now
}
