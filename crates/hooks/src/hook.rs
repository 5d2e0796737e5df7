//! The `Hook` capability and its error-isolating wrapper.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tarsy_domain::Result;

/// Consecutive failures after which a hook is permanently disabled.
pub const MAX_HOOK_ERRORS: u32 = 5;

/// A side-effecting captor registered against one interaction type.
///
/// Implementations receive fully built interaction records; they must not
/// mutate shared state the wrapped call depends on. Failures are reported
/// through the `Result`; they are counted against the hook, never surfaced
/// to the wrapped call.
#[async_trait::async_trait]
pub trait Hook<T>: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, interaction: &T) -> Result<()>;
}

/// A registered hook plus its error-isolation state.
///
/// `error_count` tracks consecutive failures; a success resets it. Once the
/// count reaches [`MAX_HOOK_ERRORS`] the hook is disabled for the remainder
/// of the process lifetime.
pub struct HookState<T> {
    hook: Arc<dyn Hook<T>>,
    enabled: AtomicBool,
    error_count: AtomicU32,
}

impl<T: Send + Sync> HookState<T> {
    pub fn new(hook: Arc<dyn Hook<T>>) -> Self {
        Self {
            hook,
            enabled: AtomicBool::new(true),
            error_count: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &str {
        self.hook.name()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Run the hook with full error containment.
    ///
    /// Returns `false` when the hook is disabled or its `execute` failed;
    /// the error itself never escapes.
    pub async fn safe_execute(&self, interaction: &T) -> bool {
        if !self.is_enabled() {
            return false;
        }

        match self.hook.execute(interaction).await {
            Ok(()) => {
                self.error_count.store(0, Ordering::Release);
                true
            }
            Err(e) => {
                let count = self.error_count.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::error!(
                    hook = self.hook.name(),
                    error = %e,
                    error_count = count,
                    max_errors = MAX_HOOK_ERRORS,
                    "hook execution failed"
                );
                if count >= MAX_HOOK_ERRORS && self.enabled.swap(false, Ordering::AcqRel) {
                    tracing::warn!(
                        hook = self.hook.name(),
                        "hook disabled due to excessive errors"
                    );
                }
                false
            }
        }
    }
}
