use std::sync::Arc;
use std::time::Instant;

use balltoss::backend::{AssistanceLevel, GameBackend, LocalStore};
use balltoss::bot::{simulate_session, BotPlayer};
use balltoss::difficulty::{DifficultySeed, DifficultyTier};
use balltoss::history::{export_csv, overall_success_rate};
use balltoss::session::{Player, Session, SessionConfig};
use tempfile::tempdir;

fn play_session(store: &Arc<LocalStore>, skill: f64, seed: u64) -> balltoss::SessionReport {
    let difficulty = DifficultySeed::request(store.as_ref(), 1);
    let start = Instant::now();
    let mut session = Session::start(
        store.clone(),
        Player::new(1),
        SessionConfig::default(),
        difficulty,
        start,
    )
    .unwrap();
    simulate_session(&mut session, &mut BotPlayer::new(skill, seed), start);
    session.complete(Some(AssistanceLevel::Verbal)).unwrap()
}

#[test]
fn sessions_are_persisted_and_feed_the_recommendation() {
    let dir = tempdir().unwrap();
    let store = Arc::new(LocalStore::open(dir.path().join("sessions.db")).unwrap());

    assert_eq!(
        store.recommend_difficulty(1).unwrap().tier,
        DifficultyTier::Normal
    );

    let mut last = None;
    for seed in 0..3 {
        last = Some(play_session(&store, 1.0, seed));
    }
    let report = last.unwrap();
    let session_id = report.session_id.unwrap();

    // Perfect recent history moves the player up
    assert_eq!(store.recommend_difficulty(1).unwrap().tier, DifficultyTier::Hard);
    assert_eq!(store.rl_update_count(session_id).unwrap(), 1);
    assert_eq!(store.analysis_request_count(1).unwrap(), 3);

    let summaries = store.recent_sessions(10).unwrap();
    assert_eq!(summaries.len(), 3);
    assert_eq!(summaries[0].session_id, session_id);
    for summary in &summaries {
        assert!(summary.is_finished());
        assert_eq!(summary.attempts, 5);
        assert_eq!(summary.successful_throws, 5);
        assert_eq!(summary.assistance_level, Some(AssistanceLevel::Verbal));
        assert!(summary.avg_response_ms.is_some());
    }
    assert_eq!(overall_success_rate(&summaries), Some(1.0));
}

#[test]
fn aborted_session_is_stored_without_rl_update() {
    let dir = tempdir().unwrap();
    let store = Arc::new(LocalStore::open(dir.path().join("sessions.db")).unwrap());
    let difficulty = DifficultySeed::request(store.as_ref(), 1);
    let mut session = Session::start(
        store.clone(),
        Player::new(1),
        SessionConfig::default(),
        difficulty,
        Instant::now(),
    )
    .unwrap();

    let report = session.abort().unwrap();
    let session_id = report.session_id.unwrap();

    assert_eq!(store.rl_update_count(session_id).unwrap(), 0);
    assert_eq!(store.analysis_request_count(1).unwrap(), 0);
    let summaries = store.recent_sessions(5).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].attempts, 0);
    assert_eq!(summaries[0].assistance_level, None);
}

#[test]
fn history_exports_to_csv() {
    let dir = tempdir().unwrap();
    let store = Arc::new(LocalStore::open(dir.path().join("sessions.db")).unwrap());
    play_session(&store, 0.5, 3);
    play_session(&store, 0.5, 4);

    let path = dir.path().join("history.csv");
    export_csv(&store.recent_sessions(10).unwrap(), &path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 3);
    assert!(text.contains("VERBAL"));
}
