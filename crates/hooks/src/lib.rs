//! Typed interaction-capture fabric.
//!
//! Every LLM call, tool call, and stage transition is framed by a capture
//! scope that stamps timing and outcome onto a typed interaction record and
//! fans it out to the registered hooks (durable history, live dashboard).
//! The capture layer is strictly one-way: a failing hook can never break the
//! wrapped call, and a hook that keeps failing disables itself.

pub mod hook;
pub mod manager;
pub mod scope;
pub mod truncate;

pub use hook::{Hook, HookState, MAX_HOOK_ERRORS};
pub use manager::HookManager;
pub use scope::{LlmCaptureScope, LlmResultPatch, McpCaptureScope, McpResultPatch, StageCaptureScope};
pub use truncate::truncate_conversation_for_capture;
