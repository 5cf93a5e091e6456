use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle states shared by connections and listeners.
///
/// `Failed` and `Cancelled` are terminal: a dead handle is replaced,
/// never revived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// Constructed; the underlying transport has not started.
    Setup = 0,
    /// Handshake or registration in flight.
    Preparing = 1,
    /// Operational: messages flow / connections are accepted.
    Ready = 2,
    /// A transport-level error occurred. Terminal.
    Failed = 3,
    /// Stopped locally or closed by the peer. Terminal.
    Cancelled = 4,
}

impl LifecycleState {
    /// True for `Failed` and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Failed | LifecycleState::Cancelled)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecycleState::Setup,
            1 => LifecycleState::Preparing,
            2 => LifecycleState::Ready,
            3 => LifecycleState::Failed,
            _ => LifecycleState::Cancelled,
        }
    }
}

/// Lock-free lifecycle cell shared between a handle and its driver
/// task.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(LifecycleState::Setup as u8))
    }

    pub(crate) fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; false if another transition won.
    pub(crate) fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to a terminal state unless already terminal. Returns true
    /// exactly once per cell, which gates the single terminal event.
    pub(crate) fn terminate(&self, to: LifecycleState) -> bool {
        debug_assert!(to.is_terminal());
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if LifecycleState::from_u8(current).is_terminal() {
                return false;
            }
            match self.0.compare_exchange(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_setup() {
        assert_eq!(StateCell::new().get(), LifecycleState::Setup);
    }

    #[test]
    fn transition_follows_lifecycle() {
        let cell = StateCell::new();
        assert!(cell.transition(LifecycleState::Setup, LifecycleState::Preparing));
        assert!(cell.transition(LifecycleState::Preparing, LifecycleState::Ready));
        // A stale transition loses.
        assert!(!cell.transition(LifecycleState::Setup, LifecycleState::Preparing));
    }

    #[test]
    fn terminate_wins_exactly_once() {
        let cell = StateCell::new();
        assert!(cell.transition(LifecycleState::Setup, LifecycleState::Preparing));
        assert!(cell.terminate(LifecycleState::Cancelled));
        assert!(!cell.terminate(LifecycleState::Cancelled));
        assert!(!cell.terminate(LifecycleState::Failed));
        assert_eq!(cell.get(), LifecycleState::Cancelled);
    }

    #[test]
    fn terminal_states_are_terminal() {
        assert!(LifecycleState::Failed.is_terminal());
        assert!(LifecycleState::Cancelled.is_terminal());
        assert!(!LifecycleState::Ready.is_terminal());
        assert!(!LifecycleState::Setup.is_terminal());
        assert!(!LifecycleState::Preparing.is_terminal());
    }
}
