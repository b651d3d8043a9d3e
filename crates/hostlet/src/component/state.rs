//! Component lifecycle states.

use serde::Serialize;

/// Lifecycle of one component, ordered along the happy path.
///
/// `Failed` is terminal and sorts after every other state so that no
/// forward request can leave it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    #[default]
    Unloaded,
    ClassLoaded,
    Instantiated,
    Initialized,
    Started,
    Stopped,
    Destroyed,
    Failed,
}

impl LifecycleState {
    /// State code reported in `LifecycleNotify`.
    pub fn wire_code(self) -> u8 {
        match self {
            Self::Unloaded => 0,
            Self::ClassLoaded => 1,
            Self::Instantiated => 2,
            Self::Initialized => 3,
            Self::Started => 4,
            Self::Stopped => 5,
            Self::Destroyed => 6,
            Self::Failed => 8,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed | Self::Failed)
    }

    /// Whether queued scripting actions may run in this state.
    pub fn accepts_actions(self) -> bool {
        self >= Self::Initialized && self < Self::Stopped
    }

    /// The state a worker moves to next when heading for `target`.
    ///
    /// Loading steps are never skipped while the component is still being
    /// brought up, and `Started` always passes through `Stopped` on its way to
    /// `Destroyed`. A component that never started is destroyed directly.
    pub fn next_toward(self, target: Self) -> Option<Self> {
        if target <= self || self.is_terminal() {
            return None;
        }
        let next = match (self, target) {
            (Self::Unloaded | Self::ClassLoaded | Self::Instantiated, Self::Destroyed) => {
                Self::Destroyed
            }
            (Self::Unloaded, _) => Self::ClassLoaded,
            (Self::ClassLoaded, _) => Self::Instantiated,
            (Self::Instantiated, _) => Self::Initialized,
            (Self::Started, Self::Destroyed) => Self::Stopped,
            (_, target) => target,
        };
        Some(next)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unloaded => "unloaded",
            Self::ClassLoaded => "class_loaded",
            Self::Instantiated => "instantiated",
            Self::Initialized => "initialized",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Destroyed => "destroyed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(from: LifecycleState, target: LifecycleState) -> Vec<LifecycleState> {
        let mut path = Vec::new();
        let mut current = from;
        while let Some(next) = current.next_toward(target) {
            path.push(next);
            current = next;
        }
        path
    }

    #[test]
    fn creation_walks_every_loading_step() {
        use LifecycleState::*;
        assert_eq!(walk(Unloaded, Initialized), vec![ClassLoaded, Instantiated, Initialized]);
    }

    #[test]
    fn started_passes_through_stopped() {
        use LifecycleState::*;
        assert_eq!(walk(Started, Destroyed), vec![Stopped, Destroyed]);
    }

    #[test]
    fn initialized_may_stop_or_destroy_directly() {
        use LifecycleState::*;
        assert_eq!(walk(Initialized, Stopped), vec![Stopped]);
        assert_eq!(walk(Initialized, Destroyed), vec![Destroyed]);
    }

    #[test]
    fn destroy_during_load_skips_remaining_steps() {
        use LifecycleState::*;
        assert_eq!(walk(ClassLoaded, Destroyed), vec![Destroyed]);
    }

    #[test]
    fn never_moves_backward_or_out_of_terminal_states() {
        use LifecycleState::*;
        assert_eq!(Stopped.next_toward(Started), None);
        assert_eq!(Failed.next_toward(Destroyed), None);
        assert_eq!(Destroyed.next_toward(Failed), None);
    }

    #[test]
    fn every_walk_is_monotonic() {
        use LifecycleState::*;
        let all = [Unloaded, ClassLoaded, Instantiated, Initialized, Started, Stopped, Destroyed];
        for from in all {
            for target in all {
                let path = walk(from, target);
                let mut previous = from;
                for step in &path {
                    assert!(*step > previous, "{from} -> {target}: {path:?}");
                    previous = *step;
                }
                if from == Started && target == Destroyed {
                    assert_eq!(path.first(), Some(&Stopped));
                }
            }
        }
    }

    #[test]
    fn wire_codes() {
        assert_eq!(LifecycleState::ClassLoaded.wire_code(), 1);
        assert_eq!(LifecycleState::Destroyed.wire_code(), 6);
    }
}
