//! Agent iteration controllers.
//!
//! An agent binds an LLM provider, an iteration strategy, and a set of tool
//! servers. The engine drives the reasoning loop (ReAct or native-thinking)
//! against the session's tool dispatcher until the agent produces a final
//! answer, the iteration budget forces a conclusion or a pause, or the task
//! is cancelled. Outcomes are plain variants, never control-flow exceptions.

pub mod cancel;
pub mod engine;
pub mod native;
pub mod outcome;
pub mod parser;
pub mod prompt;
pub mod react;
pub mod spec;

pub use cancel::{CancelToken, CancellationTracker};
pub use engine::IterationEngine;
pub use outcome::AgentOutcome;
pub use spec::AgentSpec;
