use super::{
    BackendError, Endpoint, GameBackend, GameId, InteractionLog, RlUpdate, SessionEnd, SessionId,
    UserId,
};
use crate::difficulty::{DifficultyTier, Recommendation};
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("balltoss/", env!("CARGO_PKG_VERSION"));

/// REST client for the game backend
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct UserRequest {
    user_id: UserId,
}

#[derive(Serialize)]
struct StartSessionRequest {
    user_id: UserId,
    game_id: GameId,
}

#[derive(Deserialize)]
struct StartSessionResponse {
    session_id: SessionId,
}

#[derive(Deserialize)]
struct RecommendationResponse {
    recommended_difficulty: String,
    #[serde(default)]
    action: Option<Value>,
    #[serde(default)]
    current_state: Value,
}

impl RecommendationResponse {
    /// Unknown tier labels fall back to normal
    fn into_recommendation(self) -> Recommendation {
        let tier = DifficultyTier::from_label(&self.recommended_difficulty).unwrap_or_else(|| {
            warn!(
                "Unknown difficulty '{}' from backend, using normal",
                self.recommended_difficulty
            );
            DifficultyTier::Normal
        });
        Recommendation::new(tier, self.current_state, self.action)
    }
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(BackendError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }

    fn send<B: Serialize>(&self, endpoint: Endpoint, body: &B) -> Result<Response, BackendError> {
        let url = self.url(endpoint);
        debug!("{} {}", endpoint.method(), url);

        let response = self
            .client
            .request(endpoint.method(), &url)
            .json(body)
            .send()
            .map_err(|source| BackendError::Http { endpoint, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    fn decode<T: for<'de> Deserialize<'de>>(
        endpoint: Endpoint,
        response: Response,
    ) -> Result<T, BackendError> {
        response
            .json()
            .map_err(|source| BackendError::Http { endpoint, source })
    }
}

impl GameBackend for HttpBackend {
    fn recommend_difficulty(&self, user_id: UserId) -> Result<Recommendation, BackendError> {
        let endpoint = Endpoint::RecommendDifficulty;
        let response = self.send(endpoint, &UserRequest { user_id })?;
        let data: RecommendationResponse = Self::decode(endpoint, response)?;
        Ok(data.into_recommendation())
    }

    fn start_session(&self, user_id: UserId, game_id: GameId) -> Result<SessionId, BackendError> {
        let endpoint = Endpoint::StartSession;
        let response = self.send(endpoint, &StartSessionRequest { user_id, game_id })?;
        let data: StartSessionResponse = Self::decode(endpoint, response)?;
        Ok(data.session_id)
    }

    fn log_interaction(&self, log: &InteractionLog) -> Result<(), BackendError> {
        self.send(Endpoint::LogInteraction, log).map(|_| ())
    }

    fn end_session(&self, end: &SessionEnd) -> Result<(), BackendError> {
        self.send(Endpoint::EndSession, end).map(|_| ())
    }

    fn update_rl_model(&self, update: &RlUpdate) -> Result<(), BackendError> {
        self.send(Endpoint::UpdateRlModel, update).map(|_| ())
    }

    fn trigger_analysis(&self, user_id: UserId) -> Result<(), BackendError> {
        self.send(Endpoint::TriggerAnalysis, &UserRequest { user_id })
            .map(|_| ())
    }
}
