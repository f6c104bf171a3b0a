use crate::backend::{AssistanceLevel, SessionId, UserId};
use chrono::{DateTime, Local};
use itertools::Itertools;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// One stored session as shown on the parent's statistics screen
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub started_at: DateTime<Local>,
    pub ended_at: Option<DateTime<Local>>,
    pub successful_throws: u32,
    pub attempts: u32,
    pub assistance_level: Option<AssistanceLevel>,
    pub avg_response_ms: Option<f64>,
}

impl SessionSummary {
    pub fn success_rate(&self) -> Option<f64> {
        if self.attempts == 0 {
            None
        } else {
            Some(self.successful_throws as f64 / self.attempts as f64)
        }
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn render(&self) -> String {
        let rate = self
            .success_rate()
            .map_or("-".to_string(), |r| format!("{:.0}%", r * 100.0));
        let response = self
            .avg_response_ms
            .map_or("-".to_string(), |ms| format!("{:.0}ms", ms));
        let assistance = self
            .assistance_level
            .map_or("-".to_string(), |a| a.to_string());

        format!(
            "#{:<5} {}  {}/{} ({})  avg response {}  help {}{}",
            self.session_id,
            self.started_at.format("%Y-%m-%d %H:%M"),
            self.successful_throws,
            self.attempts,
            rate,
            response,
            assistance,
            if self.is_finished() { "" } else { "  (unfinished)" },
        )
    }
}

/// Success rate over all attempts across the given sessions
pub fn overall_success_rate(summaries: &[SessionSummary]) -> Option<f64> {
    let attempts: u32 = summaries.iter().map(|s| s.attempts).sum();
    if attempts == 0 {
        return None;
    }
    let successes: u32 = summaries.iter().map(|s| s.successful_throws).sum();
    Some(successes as f64 / attempts as f64)
}

/// Count of finished sessions per assistance level, most common first
pub fn assistance_breakdown(summaries: &[SessionSummary]) -> Vec<(AssistanceLevel, usize)> {
    summaries
        .iter()
        .filter_map(|s| s.assistance_level)
        .counts()
        .into_iter()
        .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.to_string().cmp(&b.0.to_string())))
        .collect()
}

pub fn write_csv<W: Write>(summaries: &[SessionSummary], writer: W) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for summary in summaries {
        wtr.serialize(summary)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn export_csv<P: AsRef<Path>>(summaries: &[SessionSummary], path: P) -> csv::Result<()> {
    let file = std::fs::File::create(path)?;
    write_csv(summaries, file)
}
