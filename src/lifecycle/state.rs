//! Server lifecycle states.

/// Lifecycle state of a [`crate::Server`].
///
/// ```text
/// Created ──bind──▶ Binding ──start──▶ Running ──stop──▶ Stopping ──▶ Stopped
///     │                │                                              ▲
///     │                └────── bind/listen error ──▶ FailedToStart    │
///     └──────────────── start (no listeners) ──────────────▶ Running ─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed; nothing bound.
    Created,
    /// All sockets bound; none listening yet.
    Binding,
    /// Accept loops running.
    Running,
    /// Teardown in progress.
    Stopping,
    /// Fully torn down. Terminal.
    Stopped,
    /// Bind or listen failed; resources released. Terminal.
    FailedToStart,
}

impl LifecycleState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::FailedToStart)
    }

    /// States from which `start` may be attempted.
    pub fn can_start(&self) -> bool {
        matches!(self, LifecycleState::Created | LifecycleState::Binding)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Binding => "binding",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::FailedToStart => "failed-to-start",
        };
        write!(f, "{name}")
    }
}
