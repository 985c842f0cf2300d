//! Narrative orchestration and safety validation engine.
//!
//! Coordinates therapeutic narrative sessions: scene lifecycle, choice
//! validation, and a bounded-latency safety pipeline that fails closed. The
//! crisis intervention controller can suspend any session's narrative flow
//! and only releases it on an authorized resolution signal.
//!
//! The [`app::App`] composition root wires ports (generator, safety
//! classifiers, session store, crisis resources, audit sink) into a running
//! engine; [`orchestrator::Orchestrator`] is the operation surface.

pub mod app;
pub mod choice;
pub mod config;
pub mod crisis;
pub mod infrastructure;
pub mod orchestrator;
pub mod safety;
pub mod scene;
pub mod testing;

pub use app::{App, AppPorts};
pub use config::EngineConfig;
pub use orchestrator::{EngineError, Orchestrator, SubmissionOutcome};
