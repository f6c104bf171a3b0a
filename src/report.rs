use crate::backend::{BackendError, GameBackend, InteractionLog};
use serde::Serialize;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReportCall {
    SessionEnd,
    RlUpdate,
    Analysis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum CallStatus {
    Succeeded,
    Failed(String),
    Skipped(String),
}

impl CallStatus {
    pub fn skipped(reason: impl Into<String>) -> Self {
        CallStatus::Skipped(reason.into())
    }

    pub fn is_attempted(&self) -> bool {
        !matches!(self, CallStatus::Skipped(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            CallStatus::Succeeded => "ok",
            CallStatus::Failed(_) => "failed",
            CallStatus::Skipped(_) => "skipped",
        }
    }
}

/// Interaction logs sent and failed, as counted by [`InteractionLogger::drain`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InteractionTally {
    pub logged: usize,
    pub failed: usize,
}

/// Sends interaction logs in order from a background thread, so a slow
/// backend never stalls the gauge
pub struct InteractionLogger {
    tx: Option<Sender<InteractionLog>>,
    worker: Option<JoinHandle<InteractionTally>>,
}

impl InteractionLogger {
    pub fn spawn(backend: Arc<dyn GameBackend>) -> Self {
        let (tx, rx) = mpsc::channel::<InteractionLog>();

        let worker = thread::spawn(move || {
            let mut tally = InteractionTally::default();
            for log in rx {
                match backend.log_interaction(&log) {
                    Ok(()) => {
                        tally.logged += 1;
                        debug!("Interaction logged for session {}", log.session_id);
                    }
                    Err(e) => {
                        tally.failed += 1;
                        warn!("Failed to log interaction: {}", e);
                    }
                }
            }
            tally
        });

        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    pub fn submit(&self, log: InteractionLog) {
        let sent = self.tx.as_ref().map(|tx| tx.send(log).is_ok());
        if sent != Some(true) {
            warn!("Interaction logger is closed, dropping log");
        }
    }

    /// Closes the queue and waits for every queued log to be sent
    pub fn drain(&mut self) -> InteractionTally {
        self.tx.take();
        match self.worker.take().map(|w| w.join()) {
            Some(Ok(tally)) => tally,
            Some(Err(_)) => {
                warn!("Interaction logger worker panicked");
                InteractionTally::default()
            }
            None => InteractionTally::default(),
        }
    }
}

impl Drop for InteractionLogger {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish what is queued on its own
        self.tx.take();
    }
}

type Call<'a> = Box<dyn FnOnce() -> Result<(), BackendError> + Send + 'a>;

/// Independent calls issued together and joined. A failed call never fails
/// the session.
#[derive(Default)]
pub struct BestEffortBatch<'a> {
    calls: Vec<(ReportCall, Call<'a>)>,
}

impl<'a> BestEffortBatch<'a> {
    pub fn new() -> Self {
        Self { calls: Vec::new() }
    }

    pub fn add<F>(&mut self, call: ReportCall, f: F)
    where
        F: FnOnce() -> Result<(), BackendError> + Send + 'a,
    {
        self.calls.push((call, Box::new(f)));
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Runs all calls concurrently and waits for every one of them
    pub fn run(self) -> Vec<(ReportCall, CallStatus)> {
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .calls
                .into_iter()
                .map(|(call, f)| (call, scope.spawn(f)))
                .collect();

            handles
                .into_iter()
                .map(|(call, handle)| {
                    let status = match handle.join() {
                        Ok(Ok(())) => {
                            info!("{} reported", call);
                            CallStatus::Succeeded
                        }
                        Ok(Err(e)) => {
                            warn!("{} failed: {}", call, e);
                            CallStatus::Failed(e.to_string())
                        }
                        Err(_) => {
                            warn!("{} panicked", call);
                            CallStatus::Failed("panicked".to_string())
                        }
                    };
                    (call, status)
                })
                .collect()
        })
    }
}

/// What happened to each external call for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub session_end: CallStatus,
    pub rl_update: CallStatus,
    pub analysis: CallStatus,
    pub interactions: InteractionTally,
    /// Turns that had no session id to log against
    pub interactions_skipped: usize,
}

impl ReportSummary {
    pub fn new(interactions: InteractionTally, interactions_skipped: usize) -> Self {
        Self {
            session_end: CallStatus::skipped("not issued"),
            rl_update: CallStatus::skipped("not issued"),
            analysis: CallStatus::skipped("not issued"),
            interactions,
            interactions_skipped,
        }
    }

    pub fn record(&mut self, call: ReportCall, status: CallStatus) {
        match call {
            ReportCall::SessionEnd => self.session_end = status,
            ReportCall::RlUpdate => self.rl_update = status,
            ReportCall::Analysis => self.analysis = status,
        }
    }

    pub fn status(&self, call: ReportCall) -> &CallStatus {
        match call {
            ReportCall::SessionEnd => &self.session_end,
            ReportCall::RlUpdate => &self.rl_update,
            ReportCall::Analysis => &self.analysis,
        }
    }

    pub fn render(&self) -> String {
        format!(
            "session end {}, rl update {}, analysis {}, interactions {}/{} logged",
            self.session_end.label(),
            self.rl_update.label(),
            self.analysis.label(),
            self.interactions.logged,
            self.interactions.logged + self.interactions.failed + self.interactions_skipped,
        )
    }
}
