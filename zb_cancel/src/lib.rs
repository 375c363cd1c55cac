use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why an invocation stopped dispatching work.
#[derive(Debug, Clone, Error)]
pub enum CancelReason {
    #[error("a sibling task failed with exit code {0}")]
    TaskFailed(i32),
    #[error("interrupted by user")]
    Interrupted,
}

impl CancelReason {
    /// The process exit code this reason maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            CancelReason::TaskFailed(code) => *code,
            CancelReason::Interrupted => 1,
        }
    }
}

/// Token plus the first recorded reason. Later reasons are ignored.
#[derive(Debug)]
struct SharedState {
    token: CancellationToken,
    reason: OnceLock<CancelReason>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: OnceLock::new(),
        }
    }

    fn cancel(&self, reason: CancelReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }
}

/// The write end. Held by whoever may stop the invocation (the scheduler
/// on first failure, a signal handler).
#[derive(Clone, Debug)]
pub struct CancelSource {
    state: Arc<SharedState>,
}

impl CancelSource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SharedState::new()),
        }
    }

    pub fn cancel(&self, reason: CancelReason) {
        self.state.cancel(reason);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            state: self.state.clone(),
        }
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// The read end. Tasks only ever observe, they cannot cancel siblings
/// through it.
#[derive(Clone, Debug)]
pub struct CancelToken {
    state: Arc<SharedState>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.state.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.state.token.cancelled().await;
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.state.reason.get().cloned()
    }
}
