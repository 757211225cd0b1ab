use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Service lifecycle: `Constructed → Initialized → Running → Closing → Closed`.
///
/// `Initialized` is held while `init` is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LifecycleState {
    Constructed = 0,
    Initialized = 1,
    Running = 2,
    Closing = 3,
    Closed = 4,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Constructed,
            1 => Self::Initialized,
            2 => Self::Running,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Constructed => "constructed",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic lifecycle cell. State only moves through [`Lifecycle::transition`]
/// or the unconditional [`Lifecycle::finish`].
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Constructed as u8),
        }
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move `from → to` if the current state is `from`.
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enter the terminal state.
    pub fn finish(&self) {
        self.state
            .store(LifecycleState::Closed as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_compare_and_swap() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.get(), LifecycleState::Constructed);
        assert!(!lifecycle.transition(LifecycleState::Running, LifecycleState::Closing));
        assert!(lifecycle.transition(LifecycleState::Constructed, LifecycleState::Initialized));
        assert!(!lifecycle.transition(LifecycleState::Constructed, LifecycleState::Initialized));
        assert!(lifecycle.transition(LifecycleState::Initialized, LifecycleState::Running));
        lifecycle.finish();
        assert_eq!(lifecycle.get(), LifecycleState::Closed);
        assert_eq!(lifecycle.get().to_string(), "closed");
    }
}
