use crate::evaluator::{adapt_speed, evaluate, Evaluation, Outcome};
use crate::gauge::{GaugeOscillator, GaugeState};
use crate::session::SessionConfig;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum TurnPhase {
    Ready,
    Charging,
    Evaluating,
    Resolving,
    SessionComplete,
    /// Ended early; every later input is ignored
    Aborted,
}

/// One charge-and-release cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub index: u32,
    /// When the ball arrived at the player
    pub opened_at: DateTime<Local>,
    /// When the player started charging
    pub started_at: Option<DateTime<Local>>,
    pub power: Option<f64>,
    pub outcome: Option<Outcome>,
    pub margin: Option<f64>,
    /// From the ball's arrival to the release
    pub response_time_ms: Option<u64>,
    /// Gauge period in effect during this turn
    pub speed_ms: f64,
}

impl Turn {
    fn open(index: u32, speed_ms: f64) -> Self {
        Self {
            index,
            opened_at: Local::now(),
            started_at: None,
            power: None,
            outcome: None,
            margin: None,
            response_time_ms: None,
            speed_ms,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.map(|o| o.is_success()).unwrap_or(false)
    }
}

/// Result of a release, handed to the session for bookkeeping and reporting
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResolution {
    pub turn: Turn,
    pub evaluation: Evaluation,
    pub previous_speed_ms: f64,
    pub next_speed_ms: f64,
    /// This was the last turn of the session
    pub last_turn: bool,
}

/// Periodic tick schedule for the gauge
#[derive(Debug, Clone, Copy)]
pub struct GaugeTimer {
    period: Duration,
    next_due: Instant,
}

impl GaugeTimer {
    pub fn start(speed_ms: f64, now: Instant) -> Self {
        let period = Duration::from_micros((speed_ms.max(1.0) * 1000.0).round() as u64);
        Self {
            period,
            next_due: now + period,
        }
    }

    /// Number of ticks that fell due up to `now`, advancing the schedule
    pub fn due_ticks(&mut self, now: Instant) -> u32 {
        let mut ticks = 0;
        while self.next_due <= now {
            ticks += 1;
            self.next_due += self.period;
        }
        ticks
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

/// READY -> CHARGING -> EVALUATING -> RESOLVING -> READY, until the last turn
/// resolves into SESSION_COMPLETE. Driven by explicit instants so the same code
/// runs on the wall clock and on a virtual one. Leaving CHARGING drops the
/// gauge timer.
pub struct TurnController {
    config: SessionConfig,
    gauge: GaugeOscillator,
    timer: Option<GaugeTimer>,
    phase: TurnPhase,
    speed_ms: f64,
    turn: Turn,
    /// Instant the current turn opened (ball arrived)
    opened: Instant,
    accept_input_at: Instant,
    resolve_until: Option<Instant>,
    /// A release is being resolved; cleared when the next turn opens
    in_flight: bool,
    attempts: u32,
    last_evaluation: Option<Evaluation>,
}

impl TurnController {
    /// Opens turn 1 at `now`
    pub fn new(config: SessionConfig, initial_speed_ms: f64, now: Instant) -> Self {
        let speed_ms = config.speed_bounds.clamp(initial_speed_ms);
        let gauge = GaugeOscillator::new(config.gauge_step);
        let accept_input_at = now + config.timing.ready_delay;
        Self {
            gauge,
            timer: None,
            phase: TurnPhase::Ready,
            speed_ms,
            turn: Turn::open(1, speed_ms),
            opened: now,
            accept_input_at,
            resolve_until: None,
            in_flight: false,
            attempts: 0,
            last_evaluation: None,
            config,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn speed_ms(&self) -> f64 {
        self.speed_ms
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The turn currently open, if any
    pub fn active_turn(&self) -> Option<&Turn> {
        match self.phase {
            TurnPhase::Ready | TurnPhase::Charging => Some(&self.turn),
            _ => None,
        }
    }

    pub fn last_evaluation(&self) -> Option<&Evaluation> {
        self.last_evaluation.as_ref()
    }

    pub fn gauge_state(&self) -> GaugeState {
        GaugeState {
            value: self.gauge.value(),
            direction: self.gauge.direction(),
            speed_ms: self.speed_ms,
        }
    }

    pub fn is_charging(&self) -> bool {
        self.timer.is_some()
    }

    pub fn accepts_input(&self, now: Instant) -> bool {
        self.phase == TurnPhase::Ready && !self.in_flight && now >= self.accept_input_at
    }

    /// Earliest future instant at which something changes without input.
    /// `None` once input is open in READY.
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        match self.phase {
            TurnPhase::Ready if !self.in_flight && now < self.accept_input_at => {
                Some(self.accept_input_at)
            }
            TurnPhase::Charging => self.timer.map(|t| t.next_due()),
            TurnPhase::Resolving => self.resolve_until,
            _ => None,
        }
    }

    pub fn on_press_start(&mut self, now: Instant) -> bool {
        if !self.accepts_input(now) {
            debug!(
                "Ignoring press in {} (turn {}, input open: {})",
                self.phase,
                self.turn.index,
                now >= self.accept_input_at
            );
            return false;
        }

        self.gauge.start();
        self.timer = Some(GaugeTimer::start(self.speed_ms, now));
        self.turn.started_at = Some(Local::now());
        self.phase = TurnPhase::Charging;
        debug!("Turn {} charging at {:.2}ms/tick", self.turn.index, self.speed_ms);
        true
    }

    /// Releases the throw. Returns `None` when the release is not valid now.
    pub fn on_press_end(&mut self, now: Instant) -> Option<TurnResolution> {
        if self.in_flight || self.phase != TurnPhase::Charging {
            debug!("Ignoring release in {}", self.phase);
            return None;
        }
        self.in_flight = true;

        // Catch up on ticks due before the release, then cancel the timer
        self.run_due_ticks(now);
        self.timer = None;
        let power = self.gauge.stop();
        self.phase = TurnPhase::Evaluating;

        let evaluation = evaluate(power, self.config.perfect_range);
        let previous_speed_ms = self.speed_ms;
        self.speed_ms = adapt_speed(
            &evaluation,
            previous_speed_ms,
            self.config.speed_bounds,
            &self.config.tuning,
        );
        info!(
            "Turn {}: power {:.1} -> {} (speed {:.2} -> {:.2}ms)",
            self.turn.index, power, evaluation.outcome, previous_speed_ms, self.speed_ms
        );

        self.turn.power = Some(power);
        self.turn.outcome = Some(evaluation.outcome);
        self.turn.margin = Some(evaluation.margin);
        self.turn.response_time_ms = Some(now.saturating_duration_since(self.opened).as_millis() as u64);
        self.attempts += 1;
        self.last_evaluation = Some(evaluation);

        self.phase = TurnPhase::Resolving;
        self.resolve_until = Some(now + self.config.timing.resolve_duration());

        Some(TurnResolution {
            turn: self.turn.clone(),
            evaluation,
            previous_speed_ms,
            next_speed_ms: self.speed_ms,
            last_turn: self.attempts >= self.config.total_turns,
        })
    }

    /// Runs due gauge ticks and finishes timed phases. Returns the phase after.
    pub fn advance(&mut self, now: Instant) -> TurnPhase {
        match self.phase {
            TurnPhase::Charging => self.run_due_ticks(now),
            TurnPhase::Resolving => {
                if let Some(until) = self.resolve_until {
                    if now >= until {
                        self.finish_resolving(until);
                    }
                }
            }
            _ => {}
        }
        self.phase
    }

    /// Stops the gauge timer immediately; used on abort and teardown
    pub fn halt(&mut self) {
        if self.timer.take().is_some() {
            self.gauge.stop();
            debug!("Gauge timer cancelled on turn {}", self.turn.index);
        }
    }

    /// Ends the session early. Terminal: presses, releases and advances are
    /// ignored from here on.
    pub fn abort(&mut self) {
        self.halt();
        self.resolve_until = None;
        debug!("Turn controller stopped on turn {}", self.turn.index);
        self.phase = TurnPhase::Aborted;
    }

    fn run_due_ticks(&mut self, now: Instant) {
        if let Some(timer) = self.timer.as_mut() {
            for _ in 0..timer.due_ticks(now) {
                self.gauge.tick();
            }
        }
    }

    fn finish_resolving(&mut self, at: Instant) {
        self.resolve_until = None;
        self.in_flight = false;

        if self.attempts >= self.config.total_turns {
            self.phase = TurnPhase::SessionComplete;
            info!("Session complete after {} turns", self.attempts);
            return;
        }

        self.turn = Turn::open(self.turn.index + 1, self.speed_ms);
        self.opened = at;
        self.accept_input_at = at + self.config.timing.ready_delay;
        self.phase = TurnPhase::Ready;
        debug!("Turn {} ready", self.turn.index);
    }
}

impl Drop for TurnController {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TurnTiming;
    use assert_matches::assert_matches;

    fn config() -> SessionConfig {
        SessionConfig {
            gauge_step: 1.0,
            ..SessionConfig::default()
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_starts_ready_on_turn_one() {
        let t0 = Instant::now();
        let ctrl = TurnController::new(config(), 25.0, t0);

        assert_eq!(ctrl.phase(), TurnPhase::Ready);
        assert_eq!(ctrl.active_turn().unwrap().index, 1);
        assert_eq!(ctrl.speed_ms(), 25.0);
        assert!(!ctrl.is_charging());
    }

    #[test]
    fn test_initial_speed_is_clamped() {
        let ctrl = TurnController::new(config(), 3.0, Instant::now());
        assert_eq!(ctrl.speed_ms(), 15.0);
    }

    #[test]
    fn test_press_during_ready_delay_is_ignored() {
        let t0 = Instant::now();
        let mut ctrl = TurnController::new(config(), 25.0, t0);

        assert!(!ctrl.on_press_start(t0 + ms(500)));
        assert_eq!(ctrl.phase(), TurnPhase::Ready);

        // Not queued: nothing happens once the delay passes either
        ctrl.advance(t0 + ms(1_100));
        assert_eq!(ctrl.phase(), TurnPhase::Ready);

        assert!(ctrl.on_press_start(t0 + ms(1_100)));
        assert_eq!(ctrl.phase(), TurnPhase::Charging);
    }

    #[test]
    fn test_release_without_press_is_ignored() {
        let t0 = Instant::now();
        let mut ctrl = TurnController::new(config(), 25.0, t0);

        assert!(ctrl.on_press_end(t0 + ms(2_000)).is_none());
        assert_eq!(ctrl.attempts(), 0);
    }

    #[test]
    fn test_gauge_ticks_at_speed() {
        let t0 = Instant::now();
        let mut ctrl = TurnController::new(config(), 25.0, t0);
        let press = t0 + ms(1_000);
        ctrl.on_press_start(press);

        ctrl.advance(press + ms(250));
        assert_eq!(ctrl.gauge_state().value, 10.0);

        // Between ticks nothing moves
        ctrl.advance(press + ms(260));
        assert_eq!(ctrl.gauge_state().value, 10.0);
    }

    #[test]
    fn test_release_catches_up_and_resolves() {
        let t0 = Instant::now();
        let mut ctrl = TurnController::new(config(), 25.0, t0);
        let press = t0 + ms(1_000);
        ctrl.on_press_start(press);

        // 80 ticks of 25ms = 2000ms, gauge at 80
        let release = press + ms(2_000);
        let resolution = ctrl.on_press_end(release).unwrap();

        assert_eq!(resolution.turn.power, Some(80.0));
        assert_eq!(resolution.evaluation.outcome, Outcome::Perfect);
        assert_eq!(resolution.previous_speed_ms, 25.0);
        assert_eq!(resolution.next_speed_ms, 22.5);
        assert_eq!(resolution.turn.response_time_ms, Some(3_000));
        assert!(!resolution.last_turn);
        assert_eq!(ctrl.phase(), TurnPhase::Resolving);
        assert!(!ctrl.is_charging());
    }

    #[test]
    fn test_gauge_frozen_after_release() {
        let t0 = Instant::now();
        let mut ctrl = TurnController::new(config(), 25.0, t0);
        ctrl.on_press_start(t0 + ms(1_000));
        let resolution = ctrl.on_press_end(t0 + ms(1_500)).unwrap();

        ctrl.advance(t0 + ms(2_000));
        assert_eq!(Some(ctrl.gauge_state().value), resolution.turn.power);
    }

    #[test]
    fn test_double_release_resolves_once() {
        let t0 = Instant::now();
        let mut ctrl = TurnController::new(config(), 25.0, t0);
        ctrl.on_press_start(t0 + ms(1_000));

        let first = ctrl.on_press_end(t0 + ms(3_000));
        let second = ctrl.on_press_end(t0 + ms(3_001));

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(ctrl.attempts(), 1);
    }

    #[test]
    fn test_press_while_resolving_is_ignored() {
        let t0 = Instant::now();
        let mut ctrl = TurnController::new(config(), 25.0, t0);
        ctrl.on_press_start(t0 + ms(1_000));
        ctrl.on_press_end(t0 + ms(2_000));

        assert!(!ctrl.on_press_start(t0 + ms(2_100)));
        assert_eq!(ctrl.phase(), TurnPhase::Resolving);
    }

    #[test]
    fn test_next_turn_opens_after_resolving() {
        let t0 = Instant::now();
        let mut ctrl = TurnController::new(config(), 25.0, t0);
        ctrl.on_press_start(t0 + ms(1_000));
        // 2000ms hold reaches 80, a perfect throw
        let release = t0 + ms(3_000);
        ctrl.on_press_end(release);

        let resolve = TurnTiming::default().resolve_duration();
        assert_eq!(ctrl.advance(release + resolve - ms(1)), TurnPhase::Resolving);
        assert_eq!(ctrl.advance(release + resolve), TurnPhase::Ready);
        assert_eq!(ctrl.active_turn().unwrap().index, 2);
        assert_eq!(ctrl.active_turn().unwrap().speed_ms, 22.5);

        // Ready delay applies to the new turn
        assert!(!ctrl.accepts_input(release + resolve + ms(10)));
        assert!(ctrl.accepts_input(release + resolve + ms(1_000)));
    }

    #[test]
    fn test_session_completes_after_total_turns() {
        let cfg = SessionConfig {
            total_turns: 2,
            ..config()
        };
        let mut now = Instant::now();
        let mut ctrl = TurnController::new(cfg, 25.0, now);

        for _ in 0..2 {
            now += ms(1_000);
            assert!(ctrl.on_press_start(now));
            now += ms(500);
            let resolution = ctrl.on_press_end(now);
            assert_matches!(resolution, Some(_));
            now += ms(3_000);
            ctrl.advance(now);
        }

        assert_eq!(ctrl.phase(), TurnPhase::SessionComplete);
        assert_eq!(ctrl.attempts(), 2);
        assert!(ctrl.active_turn().is_none());
        assert!(!ctrl.on_press_start(now + ms(5_000)));
        assert_eq!(ctrl.next_deadline(now + ms(5_000)), None);
    }

    #[test]
    fn test_halt_cancels_timer() {
        let t0 = Instant::now();
        let mut ctrl = TurnController::new(config(), 25.0, t0);
        ctrl.on_press_start(t0 + ms(1_000));
        ctrl.advance(t0 + ms(1_100));
        let before = ctrl.gauge_state().value;

        ctrl.halt();
        ctrl.advance(t0 + ms(5_000));

        assert!(!ctrl.is_charging());
        assert_eq!(ctrl.gauge_state().value, before);
    }

    #[test]
    fn test_gauge_never_leaves_bounds_while_charging() {
        let t0 = Instant::now();
        let mut ctrl = TurnController::new(SessionConfig::default(), 15.0, t0);
        ctrl.on_press_start(t0 + ms(1_000));

        for step in 1..2_000u64 {
            ctrl.advance(t0 + ms(1_000 + step * 7));
            let v = ctrl.gauge_state().value;
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn test_next_deadline_follows_phase() {
        let t0 = Instant::now();
        let mut ctrl = TurnController::new(config(), 25.0, t0);
        assert_eq!(ctrl.next_deadline(t0), Some(t0 + ms(1_000)));

        ctrl.on_press_start(t0 + ms(1_000));
        assert_eq!(ctrl.next_deadline(t0 + ms(1_000)), Some(t0 + ms(1_025)));
    }

    #[test]
    fn test_no_deadline_while_waiting_for_press() {
        let t0 = Instant::now();
        let ctrl = TurnController::new(config(), 25.0, t0);

        assert_eq!(ctrl.next_deadline(t0 + ms(999)), Some(t0 + ms(1_000)));
        assert_eq!(ctrl.next_deadline(t0 + ms(1_000)), None);
        assert_eq!(ctrl.next_deadline(t0 + ms(3_000)), None);
    }

    #[test]
    fn test_abort_ignores_later_input() {
        let t0 = Instant::now();
        let mut ctrl = TurnController::new(config(), 25.0, t0);
        assert!(ctrl.on_press_start(t0 + ms(1_000)));
        ctrl.advance(t0 + ms(1_100));

        ctrl.abort();
        assert_eq!(ctrl.phase(), TurnPhase::Aborted);
        assert!(!ctrl.is_charging());

        assert!(ctrl.on_press_end(t0 + ms(1_500)).is_none());
        assert!(!ctrl.on_press_start(t0 + ms(2_000)));
        assert_eq!(ctrl.advance(t0 + ms(10_000)), TurnPhase::Aborted);
        assert_eq!(ctrl.attempts(), 0);
        assert!(ctrl.active_turn().is_none());
        assert_eq!(ctrl.next_deadline(t0 + ms(2_000)), None);
    }

    #[test]
    fn test_abort_while_resolving_never_opens_next_turn() {
        let t0 = Instant::now();
        let mut ctrl = TurnController::new(config(), 25.0, t0);
        ctrl.on_press_start(t0 + ms(1_000));
        ctrl.on_press_end(t0 + ms(2_000));

        ctrl.abort();
        assert_eq!(ctrl.advance(t0 + ms(20_000)), TurnPhase::Aborted);
        assert!(!ctrl.accepts_input(t0 + ms(20_000)));
        assert_eq!(ctrl.attempts(), 1);
    }

    #[test]
    fn test_timer_due_ticks() {
        let t0 = Instant::now();
        let mut timer = GaugeTimer::start(40.0, t0);

        assert_eq!(timer.due_ticks(t0 + ms(39)), 0);
        assert_eq!(timer.due_ticks(t0 + ms(40)), 1);
        assert_eq!(timer.due_ticks(t0 + ms(200)), 4);
        assert_eq!(timer.next_due(), t0 + ms(240));
    }
}
