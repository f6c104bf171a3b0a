// Library surface for the binary, headless simulation and integration tests.
pub mod app_dirs;
pub mod backend;
pub mod bot;
pub mod config;
pub mod difficulty;
pub mod evaluator;
pub mod gauge;
pub mod history;
pub mod report;
pub mod runtime;
pub mod session;
pub mod turn;

pub use session::{Player, Session, SessionConfig, SessionReport, SessionResult};
