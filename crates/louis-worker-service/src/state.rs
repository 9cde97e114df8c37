//! Worker readiness.
//!
//! ```text
//! Uninitialized ──INIT──▶ Initializing ──ok──▶ Ready
//!                               │
//!                               └──error──▶ Failed (terminal)
//! ```
//!
//! Only `Ready` serves translations. A failed worker stays failed; a new
//! worker has to be spawned to try again.

use louis_worker_common::ProtocolError;

use crate::protocol::ErrorPayload;

/// Readiness of a worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReadinessState {
    /// No INIT received yet.
    #[default]
    Uninitialized,
    /// Loading the engine and installing default tables.
    Initializing,
    /// Serving translations.
    Ready,
    /// Initialization failed with the recorded error.
    Failed(ErrorPayload),
}

/// What to do with an INIT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitAction {
    /// Begin initialization; the state is now `Initializing`.
    Start,
    /// Initialization is in progress; reply when it completes.
    Wait,
    /// Already ready; reply `READY` immediately.
    AlreadyReady,
    /// Initialization failed earlier; reply with the original error.
    AlreadyFailed(ErrorPayload),
}

impl ReadinessState {
    /// Apply an INIT request.
    pub fn on_init(&mut self) -> InitAction {
        match self {
            Self::Uninitialized => {
                *self = Self::Initializing;
                InitAction::Start
            }
            Self::Initializing => InitAction::Wait,
            Self::Ready => InitAction::AlreadyReady,
            Self::Failed(error) => InitAction::AlreadyFailed(error.clone()),
        }
    }

    /// Record the outcome of initialization.
    ///
    /// Ignored unless the state is `Initializing`.
    pub fn complete(&mut self, outcome: Result<(), ErrorPayload>) {
        if *self != Self::Initializing {
            return;
        }
        *self = match outcome {
            Ok(()) => Self::Ready,
            Err(error) => Self::Failed(error),
        };
    }

    /// Fail with [`ProtocolError::NotReady`] unless `Ready`.
    pub fn ensure_ready(&self) -> Result<(), ProtocolError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(ProtocolError::NotReady {
                state: self.name().to_string(),
            })
        }
    }

    /// Whether translations are served.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// State name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Initializing => "Initializing",
            Self::Ready => "Ready",
            Self::Failed(_) => "Failed",
        }
    }
}

impl std::fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
