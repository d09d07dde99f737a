//! Capability contract an agent learns against, plus a small reference world.

/// A finite MDP with deterministic transitions.
///
/// `next_state_distribution` keeps its historical name but returns a single
/// successor state; callers treat every transition as deterministic.
pub trait Environment {
    fn num_states(&self) -> usize;

    /// Upper bound on action ids; not every action is valid in every state.
    fn max_num_actions(&self) -> usize;

    /// Valid actions in `state`, in a stable order.
    fn allowed_actions(&self, state: usize) -> Vec<usize>;

    fn next_state_distribution(&self, state: usize, action: usize) -> usize;

    fn reward(&self, state: usize, action: usize, next_state: usize) -> f64;

    fn start_state(&self) -> usize {
        0
    }

    fn is_terminal(&self, _state: usize) -> bool {
        false
    }
}

/// Line world of `length` cells. Action 0 moves left, 1 moves right. Walking
/// into the last cell pays 1; the last cell is absorbing and pays nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corridor {
    length: usize,
}

impl Corridor {
    pub const LEFT: usize = 0;
    pub const RIGHT: usize = 1;

    pub fn new(length: usize) -> Self {
        assert!(length >= 2, "corridor needs at least two cells");
        Corridor { length }
    }

    pub fn goal(&self) -> usize {
        self.length - 1
    }
}

impl Environment for Corridor {
    fn num_states(&self) -> usize {
        self.length
    }

    fn max_num_actions(&self) -> usize {
        2
    }

    fn allowed_actions(&self, _state: usize) -> Vec<usize> {
        vec![Self::LEFT, Self::RIGHT]
    }

    fn next_state_distribution(&self, state: usize, action: usize) -> usize {
        if state == self.goal() {
            return state;
        }
        match action {
            Self::LEFT => state.saturating_sub(1),
            _ => state + 1,
        }
    }

    fn reward(&self, state: usize, _action: usize, next_state: usize) -> f64 {
        if next_state == self.goal() && state != self.goal() {
            1.0
        } else {
            0.0
        }
    }

    fn is_terminal(&self, state: usize) -> bool {
        state == self.goal()
    }
}

/// Error unless every state of `env` has at least one allowed action.
pub(crate) fn check_allowed_actions<E: Environment + ?Sized>(
    env: &E,
) -> Result<(), crate::error::AgentError> {
    for s in 0..env.num_states() {
        if env.allowed_actions(s).is_empty() {
            return Err(crate::error::AgentError::NoAllowedActions { state: s });
        }
    }
    Ok(())
}
