//! LLM provider capability layer.
//!
//! The engine talks to models through the [`LlmProvider`] trait; concrete
//! wire adapters are supplied by the embedding application through the
//! registry's constructor table. Providers whose credentials are missing or
//! whose construction fails are recorded as unavailable rather than aborting
//! startup; a lookup then yields the structured "client not available"
//! error at session start.

pub mod registry;
pub mod traits;

pub use registry::{ProviderCtor, ProviderRegistry};
pub use traits::{ChatRequest, ChatResponse, LlmProvider, ToolInvocation};
