use crate::backend::{
    AssistanceLevel, GameBackend, GameId, InteractionLog, RlUpdate, SessionEnd, SessionId, UserId,
};
use crate::difficulty::{DifficultySeed, TierSpeeds};
use crate::evaluator::{AdaptationTuning, PerfectRange, SpeedBounds};
use crate::gauge::{GaugeState, GAUGE_MAX, GAUGE_MIN};
use crate::report::{BestEffortBatch, CallStatus, InteractionLogger, ReportCall, ReportSummary};
use crate::turn::{Turn, TurnController, TurnPhase, TurnResolution};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Game id of ball toss on the backend
pub const BALL_TOSS_GAME_ID: GameId = 3;

/// Fixed delays of the turn cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnTiming {
    /// Input is ignored for this long after the ball arrives
    pub ready_delay: Duration,
    /// Outcome shown to the player
    pub feedback: Duration,
    /// Ball travelling back before the next turn
    pub ball_return: Duration,
}

impl TurnTiming {
    pub fn resolve_duration(&self) -> Duration {
        self.feedback + self.ball_return
    }
}

impl Default for TurnTiming {
    fn default() -> Self {
        Self {
            ready_delay: Duration::from_millis(1_000),
            feedback: Duration::from_millis(1_200),
            ball_return: Duration::from_millis(1_500),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub total_turns: u32,
    pub perfect_range: PerfectRange,
    /// Gauge period used when no difficulty recommendation is available
    pub initial_speed_ms: f64,
    pub speed_bounds: SpeedBounds,
    pub gauge_step: f64,
    pub tier_speeds: TierSpeeds,
    pub timing: TurnTiming,
    pub tuning: AdaptationTuning,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let tier_speeds = TierSpeeds::default();
        Self {
            total_turns: 5,
            perfect_range: PerfectRange::default(),
            initial_speed_ms: tier_speeds.normal,
            speed_bounds: tier_speeds.bounds(),
            gauge_step: 0.7,
            tier_speeds,
            timing: TurnTiming::default(),
            tuning: AdaptationTuning::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("a session needs at least one turn")]
    NoTurns,
    #[error("perfect range [{low}, {high}] must be an ordered interval within [0, 100]")]
    PerfectRange { low: f64, high: f64 },
    #[error("speed bounds [{min_ms}, {max_ms}] must be positive and ordered")]
    SpeedBounds { min_ms: f64, max_ms: f64 },
    #[error("gauge step {0} must be positive")]
    GaugeStep(f64),
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_turns == 0 {
            return Err(ConfigError::NoTurns);
        }

        let PerfectRange { low, high } = self.perfect_range;
        let in_gauge = |v: f64| v.is_finite() && (GAUGE_MIN..=GAUGE_MAX).contains(&v);
        if !in_gauge(low) || !in_gauge(high) || low > high {
            return Err(ConfigError::PerfectRange { low, high });
        }

        let SpeedBounds { min_ms, max_ms } = self.speed_bounds;
        if !(min_ms.is_finite() && max_ms.is_finite()) || min_ms <= 0.0 || min_ms > max_ms {
            return Err(ConfigError::SpeedBounds { min_ms, max_ms });
        }

        if !self.gauge_step.is_finite() || self.gauge_step <= 0.0 {
            return Err(ConfigError::GaugeStep(self.gauge_step));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid session config: {0}")]
    Config(#[from] ConfigError),
    #[error("session still in progress ({played} of {total} turns played)")]
    Incomplete { played: u32, total: u32 },
    #[error("session was already reported")]
    AlreadyReported,
}

/// Who is playing which game
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Player {
    pub user_id: UserId,
    pub game_id: GameId,
}

impl Player {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            game_id: BALL_TOSS_GAME_ID,
        }
    }
}

/// Outcome of a session, frozen once it ends
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionResult {
    pub successful_throws: u32,
    pub total_attempts: u32,
    pub turns: Vec<Turn>,
    pub final_speed_ms: f64,
}

impl SessionResult {
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_attempts == 0 {
            None
        } else {
            Some(self.successful_throws as f64 / self.total_attempts as f64)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionExit {
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub exit: SessionExit,
    pub result: SessionResult,
    pub session_id: Option<SessionId>,
    pub reporting: ReportSummary,
}

/// A fixed-length run of turns and everything reported about it.
///
/// The controller decides turn by turn; the session keeps the record and talks
/// to the backend. Backend failures are logged and never change gameplay.
pub struct Session {
    backend: Arc<dyn GameBackend>,
    player: Player,
    session_id: Option<SessionId>,
    seed: DifficultySeed,
    controller: TurnController,
    turns: Vec<Turn>,
    successful_throws: u32,
    logger: InteractionLogger,
    unlogged_turns: usize,
    reported: bool,
}

impl Session {
    pub fn start(
        backend: Arc<dyn GameBackend>,
        player: Player,
        config: SessionConfig,
        seed: DifficultySeed,
        now: Instant,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let initial_speed_ms = seed.initial_speed_ms(&config);
        let session_id = match backend.start_session(player.user_id, player.game_id) {
            Ok(id) => {
                info!("Session {} started for user {}", id, player.user_id);
                Some(id)
            }
            Err(e) => {
                warn!("Failed to start session on backend, playing unreported: {}", e);
                None
            }
        };
        info!(
            "{} turns at {:.2}ms/tick ({})",
            config.total_turns,
            initial_speed_ms,
            seed.tier().map_or("default speed".to_string(), |t| t.to_string())
        );

        let logger = InteractionLogger::spawn(backend.clone());
        let controller = TurnController::new(config, initial_speed_ms, now);

        Ok(Self {
            backend,
            player,
            session_id,
            seed,
            controller,
            turns: Vec::new(),
            successful_throws: 0,
            logger,
            unlogged_turns: 0,
            reported: false,
        })
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn player(&self) -> Player {
        self.player
    }

    pub fn seed(&self) -> &DifficultySeed {
        &self.seed
    }

    pub fn controller(&self) -> &TurnController {
        &self.controller
    }

    pub fn phase(&self) -> TurnPhase {
        self.controller.phase()
    }

    pub fn gauge(&self) -> GaugeState {
        self.controller.gauge_state()
    }

    pub fn is_complete(&self) -> bool {
        self.phase() == TurnPhase::SessionComplete
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// (turns played, turns in the session)
    pub fn progress(&self) -> (u32, u32) {
        (self.controller.attempts(), self.controller.config().total_turns)
    }

    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        self.controller.next_deadline(now)
    }

    pub fn press_start(&mut self, now: Instant) -> bool {
        self.controller.on_press_start(now)
    }

    pub fn press_end(&mut self, now: Instant) -> Option<TurnResolution> {
        let resolution = self.controller.on_press_end(now)?;
        self.record(&resolution);
        Some(resolution)
    }

    pub fn advance(&mut self, now: Instant) -> TurnPhase {
        self.controller.advance(now)
    }

    pub fn result(&self) -> SessionResult {
        SessionResult {
            successful_throws: self.successful_throws,
            total_attempts: self.controller.attempts(),
            turns: self.turns.clone(),
            final_speed_ms: self.controller.speed_ms(),
        }
    }

    /// Reports a finished session: session end, RL update and analysis
    pub fn complete(
        &mut self,
        assistance: Option<AssistanceLevel>,
    ) -> Result<SessionReport, SessionError> {
        if !self.is_complete() {
            let (played, total) = self.progress();
            return Err(SessionError::Incomplete { played, total });
        }
        if self.reported {
            return Err(SessionError::AlreadyReported);
        }
        self.reported = true;

        let result = self.result();
        let mut reporting = ReportSummary::new(self.logger.drain(), self.unlogged_turns);
        let backend = self.backend.as_ref();
        let user_id = self.player.user_id;
        let mut batch = BestEffortBatch::new();

        match self.session_id {
            Some(session_id) => {
                let end = SessionEnd {
                    session_id,
                    successful_throws: result.successful_throws,
                    assistance_level: assistance,
                };
                batch.add(ReportCall::SessionEnd, move || backend.end_session(&end));

                match &self.seed.recommendation {
                    Some(recommendation) => {
                        let update = RlUpdate {
                            session_id,
                            initial_state: recommendation.state.clone(),
                            action: recommendation.action.clone(),
                        };
                        batch.add(ReportCall::RlUpdate, move || backend.update_rl_model(&update));
                    }
                    None => reporting.record(
                        ReportCall::RlUpdate,
                        CallStatus::skipped("no difficulty recommendation"),
                    ),
                }
                batch.add(ReportCall::Analysis, move || backend.trigger_analysis(user_id));
            }
            None => {
                for call in [ReportCall::SessionEnd, ReportCall::RlUpdate, ReportCall::Analysis] {
                    reporting.record(call, CallStatus::skipped("no session id"));
                }
            }
        }

        for (call, status) in batch.run() {
            reporting.record(call, status);
        }
        info!(
            "Session finished: {}/{} successful, {}",
            result.successful_throws,
            result.total_attempts,
            reporting.render()
        );

        Ok(SessionReport {
            exit: SessionExit::Completed,
            result,
            session_id: self.session_id,
            reporting,
        })
    }

    /// Stops play and persists the partial result. No RL update or analysis.
    pub fn abort(&mut self) -> Result<SessionReport, SessionError> {
        if self.reported {
            return Err(SessionError::AlreadyReported);
        }
        self.reported = true;
        self.controller.abort();

        let result = self.result();
        let mut reporting = ReportSummary::new(self.logger.drain(), self.unlogged_turns);
        reporting.record(ReportCall::RlUpdate, CallStatus::skipped("session aborted"));
        reporting.record(ReportCall::Analysis, CallStatus::skipped("session aborted"));

        let status = match self.session_id {
            Some(session_id) => {
                let end = SessionEnd {
                    session_id,
                    successful_throws: result.successful_throws,
                    assistance_level: None,
                };
                match self.backend.end_session(&end) {
                    Ok(()) => CallStatus::Succeeded,
                    Err(e) => {
                        warn!("Failed to end aborted session: {}", e);
                        CallStatus::Failed(e.to_string())
                    }
                }
            }
            None => CallStatus::skipped("no session id"),
        };
        reporting.record(ReportCall::SessionEnd, status);
        info!(
            "Session aborted after {} turns, {}",
            result.total_attempts,
            reporting.render()
        );

        Ok(SessionReport {
            exit: SessionExit::Aborted,
            result,
            session_id: self.session_id,
            reporting,
        })
    }

    fn record(&mut self, resolution: &TurnResolution) {
        let turn = resolution.turn.clone();
        if turn.is_success() {
            self.successful_throws += 1;
        }

        match self.session_id {
            Some(session_id) => self.logger.submit(InteractionLog {
                session_id,
                is_successful: turn.is_success(),
                response_time_ms: turn.response_time_ms.unwrap_or_default(),
                details: json!({
                    "throw_power": resolution.evaluation.power,
                    "result": resolution.evaluation.outcome.to_string(),
                }),
            }),
            None => {
                self.unlogged_turns += 1;
                debug!("No session id, turn {} not logged", turn.index);
            }
        }
        self.turns.push(turn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Endpoint, OfflineBackend, RecordingBackend};
    use assert_matches::assert_matches;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.total_turns, 5);
        assert_eq!(config.speed_bounds, SpeedBounds::new(15.0, 40.0));
        assert_eq!(config.timing.resolve_duration(), Duration::from_millis(2_700));
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let base = SessionConfig::default();

        let zero_turns = SessionConfig {
            total_turns: 0,
            ..base.clone()
        };
        assert_eq!(zero_turns.validate(), Err(ConfigError::NoTurns));

        let inverted = SessionConfig {
            perfect_range: PerfectRange::new(90.0, 70.0),
            ..base.clone()
        };
        assert_matches!(inverted.validate(), Err(ConfigError::PerfectRange { .. }));

        let outside = SessionConfig {
            perfect_range: PerfectRange::new(70.0, 120.0),
            ..base.clone()
        };
        assert_matches!(outside.validate(), Err(ConfigError::PerfectRange { .. }));

        let zero_speed = SessionConfig {
            speed_bounds: SpeedBounds::new(0.0, 40.0),
            ..base.clone()
        };
        assert_matches!(zero_speed.validate(), Err(ConfigError::SpeedBounds { .. }));

        let no_step = SessionConfig {
            gauge_step: 0.0,
            ..base
        };
        assert_eq!(no_step.validate(), Err(ConfigError::GaugeStep(0.0)));
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let config = SessionConfig {
            total_turns: 0,
            ..SessionConfig::default()
        };
        let result = Session::start(
            Arc::new(RecordingBackend::new()),
            Player::new(1),
            config,
            DifficultySeed::default(),
            Instant::now(),
        );
        assert_matches!(result.err(), Some(SessionError::Config(ConfigError::NoTurns)));
    }

    #[test]
    fn test_start_without_backend_session_still_plays() {
        let t0 = Instant::now();
        let mut session = Session::start(
            Arc::new(OfflineBackend),
            Player::new(1),
            SessionConfig::default(),
            DifficultySeed::default(),
            t0,
        )
        .unwrap();

        assert_eq!(session.session_id(), None);
        assert!(session.press_start(t0 + Duration::from_millis(1_000)));
        assert!(session.press_end(t0 + Duration::from_millis(2_000)).is_some());
        assert_eq!(session.turns().len(), 1);
    }

    #[test]
    fn test_complete_before_end_is_incomplete() {
        let backend = Arc::new(RecordingBackend::new());
        let mut session = Session::start(
            backend.clone(),
            Player::new(1),
            SessionConfig::default(),
            DifficultySeed::default(),
            Instant::now(),
        )
        .unwrap();

        assert_matches!(
            session.complete(None),
            Err(SessionError::Incomplete { played: 0, total: 5 })
        );
        assert_eq!(backend.count(Endpoint::EndSession), 0);
    }

    #[test]
    fn test_abort_twice_is_rejected() {
        let backend = Arc::new(RecordingBackend::new());
        let mut session = Session::start(
            backend.clone(),
            Player::new(1),
            SessionConfig::default(),
            DifficultySeed::default(),
            Instant::now(),
        )
        .unwrap();

        let report = session.abort().unwrap();
        assert_eq!(report.exit, SessionExit::Aborted);
        assert_matches!(session.abort(), Err(SessionError::AlreadyReported));
        assert_eq!(backend.count(Endpoint::EndSession), 1);
    }

    #[test]
    fn test_aborted_session_ignores_input() {
        let t0 = Instant::now();
        let backend = Arc::new(RecordingBackend::new());
        let mut session = Session::start(
            backend.clone(),
            Player::new(1),
            SessionConfig::default(),
            DifficultySeed::default(),
            t0,
        )
        .unwrap();
        assert!(session.press_start(t0 + Duration::from_millis(1_000)));

        let report = session.abort().unwrap();
        assert_eq!(report.result.total_attempts, 0);

        assert!(session.press_end(t0 + Duration::from_millis(1_500)).is_none());
        assert!(!session.press_start(t0 + Duration::from_millis(6_000)));
        assert_eq!(session.advance(t0 + Duration::from_millis(9_000)), TurnPhase::Aborted);
        assert!(session.turns().is_empty());
        assert_eq!(session.result().total_attempts, 0);
        assert!(backend.logged_interactions().is_empty());
    }

    #[test]
    fn test_complete_without_session_id_skips_analysis() {
        let mut now = Instant::now();
        let mut session = Session::start(
            Arc::new(OfflineBackend),
            Player::new(1),
            SessionConfig {
                total_turns: 1,
                ..SessionConfig::default()
            },
            DifficultySeed::default(),
            now,
        )
        .unwrap();
        now += Duration::from_millis(1_000);
        session.press_start(now);
        now += Duration::from_millis(500);
        session.press_end(now);
        now += Duration::from_millis(3_000);
        assert_eq!(session.advance(now), TurnPhase::SessionComplete);

        let report = session.complete(None).unwrap();
        assert_matches!(report.reporting.analysis, CallStatus::Skipped(_));
        assert_matches!(report.reporting.session_end, CallStatus::Skipped(_));
    }

    #[test]
    fn test_success_rate() {
        let result = SessionResult {
            successful_throws: 2,
            total_attempts: 4,
            turns: Vec::new(),
            final_speed_ms: 25.0,
        };
        assert_eq!(result.success_rate(), Some(0.5));
    }
}
