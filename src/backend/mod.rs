pub mod http;
pub mod local;
pub mod recording;

use crate::difficulty::Recommendation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use http::HttpBackend;
pub use local::LocalStore;
pub use recording::RecordingBackend;

pub type UserId = i64;
pub type GameId = i64;

/// Identifier issued by the backend when a session starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Post-session tag entered by the parent; persisted, never used for adaptation
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    strum_macros::Display,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum AssistanceLevel {
    None,
    Verbal,
    Physical,
}

impl AssistanceLevel {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "NONE" => Some(Self::None),
            "VERBAL" => Some(Self::Verbal),
            "PHYSICAL" => Some(Self::Physical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionLog {
    pub session_id: SessionId,
    pub is_successful: bool,
    pub response_time_ms: u64,
    #[serde(rename = "interaction_data")]
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEnd {
    pub session_id: SessionId,
    pub successful_throws: u32,
    pub assistance_level: Option<AssistanceLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RlUpdate {
    pub session_id: SessionId,
    pub initial_state: Value,
    pub action: Value,
}

/// The six external calls, with where they live on the REST backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum Endpoint {
    RecommendDifficulty,
    StartSession,
    LogInteraction,
    EndSession,
    UpdateRlModel,
    TriggerAnalysis,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::RecommendDifficulty | Endpoint::UpdateRlModel => {
                "/api/data/rl/game3/difficulty/"
            }
            Endpoint::StartSession => "/api/games/session/start/",
            Endpoint::LogInteraction => "/api/games/interaction/log/",
            Endpoint::EndSession => "/api/games/third-game/session/end/",
            Endpoint::TriggerAnalysis => "/api/data/ai-analysis/game3/",
        }
    }

    pub fn method(&self) -> reqwest::Method {
        match self {
            Endpoint::UpdateRlModel => reqwest::Method::PUT,
            _ => reqwest::Method::POST,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("http client setup failed: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: Endpoint,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} responded with status {status}")]
    Status { endpoint: Endpoint, status: u16 },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Services the game reports to.
///
/// All calls are blocking and independent of each other. Callers treat every
/// failure as non-fatal.
pub trait GameBackend: Send + Sync {
    fn recommend_difficulty(&self, user_id: UserId) -> Result<Recommendation, BackendError>;

    fn start_session(&self, user_id: UserId, game_id: GameId) -> Result<SessionId, BackendError>;

    fn log_interaction(&self, log: &InteractionLog) -> Result<(), BackendError>;

    fn end_session(&self, end: &SessionEnd) -> Result<(), BackendError>;

    fn update_rl_model(&self, update: &RlUpdate) -> Result<(), BackendError>;

    fn trigger_analysis(&self, user_id: UserId) -> Result<(), BackendError>;
}

/// Backend for playing with nothing to talk to; every call fails
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineBackend;

impl OfflineBackend {
    fn unavailable<T>(endpoint: Endpoint) -> Result<T, BackendError> {
        Err(BackendError::Unavailable(format!("offline, {} not sent", endpoint)))
    }
}

impl GameBackend for OfflineBackend {
    fn recommend_difficulty(&self, _user_id: UserId) -> Result<Recommendation, BackendError> {
        Self::unavailable(Endpoint::RecommendDifficulty)
    }

    fn start_session(&self, _user_id: UserId, _game_id: GameId) -> Result<SessionId, BackendError> {
        Self::unavailable(Endpoint::StartSession)
    }

    fn log_interaction(&self, _log: &InteractionLog) -> Result<(), BackendError> {
        Self::unavailable(Endpoint::LogInteraction)
    }

    fn end_session(&self, _end: &SessionEnd) -> Result<(), BackendError> {
        Self::unavailable(Endpoint::EndSession)
    }

    fn update_rl_model(&self, _update: &RlUpdate) -> Result<(), BackendError> {
        Self::unavailable(Endpoint::UpdateRlModel)
    }

    fn trigger_analysis(&self, _user_id: UserId) -> Result<(), BackendError> {
        Self::unavailable(Endpoint::TriggerAnalysis)
    }
}
