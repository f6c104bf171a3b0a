use super::{
    AssistanceLevel, BackendError, GameBackend, GameId, InteractionLog, RlUpdate, SessionEnd,
    SessionId, UserId,
};
use crate::app_dirs::AppDirs;
use crate::difficulty::{DifficultyTier, Recommendation};
use crate::history::SessionSummary;
use chrono::{DateTime, Local};
use rusqlite::{params, Connection};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Sessions considered by the local difficulty heuristic
const RECENT_WINDOW: i64 = 3;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        game_id INTEGER NOT NULL,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        successful_throws INTEGER,
        assistance_level TEXT
    );
    CREATE TABLE IF NOT EXISTS interactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER NOT NULL REFERENCES sessions(id),
        is_successful BOOLEAN NOT NULL,
        response_time_ms INTEGER NOT NULL,
        details TEXT NOT NULL,
        recorded_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS rl_updates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER NOT NULL,
        initial_state TEXT NOT NULL,
        action TEXT NOT NULL,
        recorded_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS analysis_requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        requested_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_interactions_session ON interactions(session_id);
    CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
"#;

/// SQLite-backed stand-in for the game backend.
///
/// Keeps the same records the REST service would and answers the difficulty
/// request from the player's own recent sessions.
#[derive(Debug)]
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BackendError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(format!("Failed to create directory: {}", e)),
                )
            })?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    /// Opens the store under the user's state directory
    pub fn open_default() -> Result<Self, BackendError> {
        let path = Self::default_path();
        Self::open(path)
    }

    pub fn in_memory() -> Result<Self, BackendError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    pub fn default_path() -> PathBuf {
        AppDirs::db_path().unwrap_or_else(|| PathBuf::from("balltoss.db"))
    }

    fn with_connection(conn: Connection) -> Result<Self, BackendError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, BackendError> {
        self.conn
            .lock()
            .map_err(|_| BackendError::Unavailable("local store lock poisoned".into()))
    }

    /// Success rate over the player's most recent ended sessions, with the
    /// number of sessions it was computed from
    pub fn recent_success_rate(&self, user_id: UserId) -> Result<(Option<f64>, i64), BackendError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT s.successful_throws,
                   (SELECT COUNT(*) FROM interactions i WHERE i.session_id = s.id)
            FROM sessions s
            WHERE s.user_id = ?1 AND s.ended_at IS NOT NULL
            ORDER BY s.id DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![user_id, RECENT_WINDOW], |row| {
            Ok((row.get::<_, Option<i64>>(0)?.unwrap_or(0), row.get::<_, i64>(1)?))
        })?;

        let mut sessions = 0;
        let mut successes = 0;
        let mut attempts = 0;
        for row in rows {
            let (s, a) = row?;
            sessions += 1;
            successes += s;
            attempts += a;
        }

        if attempts == 0 {
            Ok((None, sessions))
        } else {
            Ok((Some(successes as f64 / attempts as f64), sessions))
        }
    }

    /// Most recent sessions first
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>, BackendError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT s.id,
                   s.user_id,
                   s.started_at,
                   s.ended_at,
                   COALESCE(s.successful_throws,
                            SUM(CASE WHEN i.is_successful THEN 1 ELSE 0 END), 0),
                   COUNT(i.id),
                   s.assistance_level,
                   AVG(i.response_time_ms)
            FROM sessions s
            LEFT JOIN interactions i ON i.session_id = s.id
            GROUP BY s.id
            ORDER BY s.id DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let started_at: String = row.get(2)?;
            let ended_at: Option<String> = row.get(3)?;
            let assistance: Option<String> = row.get(6)?;

            Ok(SessionSummary {
                session_id: SessionId(row.get(0)?),
                user_id: row.get(1)?,
                started_at: parse_timestamp(&started_at, 2)?,
                ended_at: ended_at.map(|t| parse_timestamp(&t, 3)).transpose()?,
                successful_throws: row.get::<_, i64>(4)? as u32,
                attempts: row.get::<_, i64>(5)? as u32,
                assistance_level: assistance.as_deref().and_then(AssistanceLevel::from_label),
                avg_response_ms: row.get(7)?,
            })
        })?;

        let mut summaries = Vec::new();
        for summary in rows {
            summaries.push(summary?);
        }
        Ok(summaries)
    }

    pub fn rl_update_count(&self, session_id: SessionId) -> Result<i64, BackendError> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM rl_updates WHERE session_id = ?1",
            [session_id.0],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn analysis_request_count(&self, user_id: UserId) -> Result<i64, BackendError> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM analysis_requests WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn parse_timestamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Local>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Local))
        .map_err(|_| {
            rusqlite::Error::InvalidColumnType(
                column,
                "timestamp".to_string(),
                rusqlite::types::Type::Text,
            )
        })
}

fn now() -> String {
    Local::now().to_rfc3339()
}

impl GameBackend for LocalStore {
    fn recommend_difficulty(&self, user_id: UserId) -> Result<Recommendation, BackendError> {
        let (rate, sessions) = self.recent_success_rate(user_id)?;
        let tier = match rate {
            Some(r) if r >= 0.8 => DifficultyTier::Hard,
            Some(r) if r < 0.4 => DifficultyTier::Easy,
            _ => DifficultyTier::Normal,
        };
        let state = json!({ "recent_sessions": sessions, "success_rate": rate });
        Ok(Recommendation::new(tier, state, None))
    }

    fn start_session(&self, user_id: UserId, game_id: GameId) -> Result<SessionId, BackendError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (user_id, game_id, started_at) VALUES (?1, ?2, ?3)",
            params![user_id, game_id, now()],
        )?;
        Ok(SessionId(conn.last_insert_rowid()))
    }

    fn log_interaction(&self, log: &InteractionLog) -> Result<(), BackendError> {
        let details = serde_json::to_string(&log.details)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO interactions
            (session_id, is_successful, response_time_ms, details, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                log.session_id.0,
                log.is_successful,
                log.response_time_ms as i64,
                details,
                now(),
            ],
        )?;
        Ok(())
    }

    fn end_session(&self, end: &SessionEnd) -> Result<(), BackendError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE sessions
            SET ended_at = ?2, successful_throws = ?3, assistance_level = ?4
            WHERE id = ?1
            "#,
            params![
                end.session_id.0,
                now(),
                end.successful_throws,
                end.assistance_level.map(|a| a.to_string()),
            ],
        )?;
        if updated == 0 {
            return Err(BackendError::Unavailable(format!(
                "unknown session {}",
                end.session_id
            )));
        }
        Ok(())
    }

    fn update_rl_model(&self, update: &RlUpdate) -> Result<(), BackendError> {
        let state = serde_json::to_string(&update.initial_state)?;
        let action = serde_json::to_string(&update.action)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO rl_updates (session_id, initial_state, action, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            params![update.session_id.0, state, action, now()],
        )?;
        Ok(())
    }

    fn trigger_analysis(&self, user_id: UserId) -> Result<(), BackendError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO analysis_requests (user_id, requested_at) VALUES (?1, ?2)",
            params![user_id, now()],
        )?;
        Ok(())
    }
}
