pub mod auth;
pub mod controller;
pub mod instrumentation;
pub mod loop_worker;
pub mod session_sync;
pub mod supervisor;

pub use auth::{AuthOutcome, Authenticator, SkipReason};
pub use controller::CollectorController;
pub use loop_worker::{poll_once, DomDeduper, PollReport, PollSettings, RunState, DOM_SELECTORS};
pub use supervisor::{CollectorState, CollectorStatus, Supervisor, SupervisorSettings};
