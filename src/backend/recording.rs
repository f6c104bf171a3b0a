use super::{
    BackendError, Endpoint, GameBackend, GameId, InteractionLog, RlUpdate, SessionEnd, SessionId,
    UserId,
};
use crate::difficulty::Recommendation;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// One call as seen by [`RecordingBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    RecommendDifficulty(UserId),
    StartSession(UserId, GameId),
    LogInteraction(InteractionLog),
    EndSession(SessionEnd),
    UpdateRlModel(RlUpdate),
    TriggerAnalysis(UserId),
}

impl RecordedCall {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            RecordedCall::RecommendDifficulty(_) => Endpoint::RecommendDifficulty,
            RecordedCall::StartSession(..) => Endpoint::StartSession,
            RecordedCall::LogInteraction(_) => Endpoint::LogInteraction,
            RecordedCall::EndSession(_) => Endpoint::EndSession,
            RecordedCall::UpdateRlModel(_) => Endpoint::UpdateRlModel,
            RecordedCall::TriggerAnalysis(_) => Endpoint::TriggerAnalysis,
        }
    }
}

/// In-memory backend for tests: records every call (failed ones too) and
/// fails the endpoints it was told to fail.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<RecordedCall>>,
    failing: HashSet<Endpoint>,
    recommendation: Option<Recommendation>,
    next_session_id: AtomicI64,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            next_session_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    pub fn failing(mut self, endpoints: &[Endpoint]) -> Self {
        self.failing.extend(endpoints.iter().copied());
        self
    }

    pub fn recommending(mut self, recommendation: Recommendation) -> Self {
        self.recommendation = Some(recommendation);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, endpoint: Endpoint) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.endpoint() == endpoint)
            .count()
    }

    pub fn logged_interactions(&self) -> Vec<InteractionLog> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::LogInteraction(log) => Some(log),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: RecordedCall) -> Result<(), BackendError> {
        let endpoint = call.endpoint();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        if self.failing.contains(&endpoint) {
            Err(BackendError::Unavailable(format!("{} rigged to fail", endpoint)))
        } else {
            Ok(())
        }
    }
}

impl GameBackend for RecordingBackend {
    fn recommend_difficulty(&self, user_id: UserId) -> Result<Recommendation, BackendError> {
        self.record(RecordedCall::RecommendDifficulty(user_id))?;
        self.recommendation
            .clone()
            .ok_or_else(|| BackendError::Unavailable("no recommendation configured".into()))
    }

    fn start_session(&self, user_id: UserId, game_id: GameId) -> Result<SessionId, BackendError> {
        self.record(RecordedCall::StartSession(user_id, game_id))?;
        Ok(SessionId(self.next_session_id.fetch_add(1, Ordering::SeqCst)))
    }

    fn log_interaction(&self, log: &InteractionLog) -> Result<(), BackendError> {
        self.record(RecordedCall::LogInteraction(log.clone()))
    }

    fn end_session(&self, end: &SessionEnd) -> Result<(), BackendError> {
        self.record(RecordedCall::EndSession(end.clone()))
    }

    fn update_rl_model(&self, update: &RlUpdate) -> Result<(), BackendError> {
        self.record(RecordedCall::UpdateRlModel(update.clone()))
    }

    fn trigger_analysis(&self, user_id: UserId) -> Result<(), BackendError> {
        self.record(RecordedCall::TriggerAnalysis(user_id))
    }
}
