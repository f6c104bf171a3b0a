use crate::app_dirs::AppDirs;
use crate::backend::{
    BackendError, GameBackend, GameId, HttpBackend, LocalStore, OfflineBackend, UserId,
};
use crate::difficulty::TierSpeeds;
use crate::evaluator::{AdaptationTuning, PerfectRange};
use crate::session::{Player, SessionConfig, TurnTiming, BALL_TOSS_GAME_ID};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Where session data goes
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
pub enum BackendKind {
    /// SQLite file on this machine
    Local,
    /// The REST backend at `api_url`
    Http,
    /// Nothing is reported
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub user_id: UserId,
    pub game_id: GameId,
    pub total_turns: u32,
    pub perfect_range: PerfectRange,
    pub tier_speeds: TierSpeeds,
    pub gauge_step: f64,
    pub ready_delay_ms: u64,
    pub feedback_ms: u64,
    pub ball_return_ms: u64,
    pub tuning: AdaptationTuning,
    pub backend: BackendKind,
    pub api_url: String,
    pub request_timeout_secs: u64,
    /// SQLite file for the local backend; platform state dir when unset
    pub db_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            user_id: 1,
            game_id: BALL_TOSS_GAME_ID,
            total_turns: session.total_turns,
            perfect_range: session.perfect_range,
            tier_speeds: session.tier_speeds,
            gauge_step: session.gauge_step,
            ready_delay_ms: session.timing.ready_delay.as_millis() as u64,
            feedback_ms: session.timing.feedback.as_millis() as u64,
            ball_return_ms: session.timing.ball_return.as_millis() as u64,
            tuning: session.tuning,
            backend: BackendKind::Local,
            api_url: "http://localhost:8000".to_string(),
            request_timeout_secs: 5,
            db_path: None,
        }
    }
}

impl Config {
    pub fn player(&self) -> Player {
        Player {
            user_id: self.user_id,
            game_id: self.game_id,
        }
    }

    /// Session parameters; speed bounds and the default speed follow the tier speeds
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            total_turns: self.total_turns,
            perfect_range: self.perfect_range,
            initial_speed_ms: self.tier_speeds.normal,
            speed_bounds: self.tier_speeds.bounds(),
            gauge_step: self.gauge_step,
            tier_speeds: self.tier_speeds,
            timing: TurnTiming {
                ready_delay: Duration::from_millis(self.ready_delay_ms),
                feedback: Duration::from_millis(self.feedback_ms),
                ball_return: Duration::from_millis(self.ball_return_ms),
            },
            tuning: self.tuning,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(LocalStore::default_path)
    }

    pub fn connect(&self) -> Result<Arc<dyn GameBackend>, BackendError> {
        debug!("Using {} backend", self.backend);
        let backend: Arc<dyn GameBackend> = match self.backend {
            BackendKind::Local => Arc::new(LocalStore::open(self.db_path())?),
            BackendKind::Http => Arc::new(HttpBackend::new(
                self.api_url.clone(),
                Duration::from_secs(self.request_timeout_secs),
            )?),
            BackendKind::Offline => Arc::new(OfflineBackend),
        };
        Ok(backend)
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = AppDirs::config_path().unwrap_or_else(|| PathBuf::from("balltoss_config.json"));
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(_) => return Config::default(),
        };
        match serde_json::from_slice::<Config>(&bytes) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("Ignoring unreadable config {}: {}", self.path.display(), e);
                Config::default()
            }
        }
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg)?;
        fs::write(&self.path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::SpeedBounds;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config::default();
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn save_and_load_custom_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config {
            user_id: 42,
            total_turns: 7,
            perfect_range: PerfectRange::new(60.0, 85.0),
            backend: BackendKind::Http,
            api_url: "https://therapy.example".into(),
            db_path: Some(dir.path().join("s.db")),
            ..Config::default()
        };
        store.save(&cfg).unwrap();
        assert_eq!(store.load(), cfg);
    }

    #[test]
    fn missing_or_corrupt_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        assert_eq!(store.load(), Config::default());

        fs::write(&path, b"{ not json").unwrap();
        assert_eq!(store.load(), Config::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, br#"{"user_id": 9, "backend": "offline"}"#).unwrap();

        let cfg = FileConfigStore::with_path(&path).load();
        assert_eq!(cfg.user_id, 9);
        assert_eq!(cfg.backend, BackendKind::Offline);
        assert_eq!(cfg.total_turns, 5);
    }

    #[test]
    fn session_config_matches_defaults() {
        let session = Config::default().session_config();
        assert_eq!(session, SessionConfig::default());
        assert_eq!(session.speed_bounds, SpeedBounds::new(15.0, 40.0));
    }

    #[test]
    fn connect_local_creates_database() {
        let dir = tempdir().unwrap();
        let cfg = Config {
            db_path: Some(dir.path().join("state").join("sessions.db")),
            ..Config::default()
        };
        let backend = cfg.connect().unwrap();
        assert!(backend.start_session(1, 3).is_ok());
        assert!(dir.path().join("state").join("sessions.db").exists());
    }
}
