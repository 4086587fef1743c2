//! Task lifecycle hooks.
//!
//! A fetch iterator registers a completion hook with the task that owns it. When the task ends,
//! successfully or not, the hook cancels the iterator and releases whatever it still buffers.

use std::sync::Mutex;

/// Callback run once when the owning task completes
pub type CompletionHook = Box<dyn FnOnce() + Send + 'static>;

/// Registration point for task completion callbacks
pub trait TaskLifecycle: Send + Sync {
    /// Run `hook` when the task completes. If the task already completed, run it immediately.
    fn add_completion_hook(&self, hook: CompletionHook);
}

/// Minimal [`TaskLifecycle`] for callers that drive completion themselves.
///
/// Hooks run in reverse registration order, so resources acquired later are released first.
#[derive(Default)]
pub struct TaskContext {
    state: Mutex<HookState>,
}

#[derive(Default)]
struct HookState {
    hooks: Vec<CompletionHook>,
    completed: bool,
}

impl TaskContext {
    /// Create a task context with no hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the task complete and run every registered hook.
    ///
    /// Calling this again is a no-op.
    pub fn complete(&self) {
        let hooks = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.completed {
                return;
            }
            state.completed = true;
            std::mem::take(&mut state.hooks)
        };
        tracing::debug!(hooks = hooks.len(), "Running task completion hooks");
        for hook in hooks.into_iter().rev() {
            hook();
        }
    }

    /// Whether [`complete`](Self::complete) has run
    pub fn is_completed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .completed
    }
}

impl TaskLifecycle for TaskContext {
    fn add_completion_hook(&self, hook: CompletionHook) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.completed {
            drop(state);
            hook();
            return;
        }
        state.hooks.push(hook);
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("TaskContext")
            .field("hooks", &state.hooks.len())
            .field("completed", &state.completed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn hooks_run_once_in_reverse_order() {
        let ctx = TaskContext::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            ctx.add_completion_hook(Box::new(move || {
                order.lock().unwrap_or_else(|e| e.into_inner()).push(i);
            }));
        }

        ctx.complete();
        ctx.complete();

        assert!(ctx.is_completed());
        assert_eq!(
            *order.lock().unwrap_or_else(|e| e.into_inner()),
            vec![2, 1, 0]
        );
    }

    #[test]
    fn hook_added_after_completion_runs_immediately() {
        let ctx = TaskContext::new();
        ctx.complete();

        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        ctx.add_completion_hook(Box::new(move || {
            *flag.lock().unwrap_or_else(|e| e.into_inner()) = true;
        }));

        assert!(*ran.lock().unwrap_or_else(|e| e.into_inner()));
    }
}
