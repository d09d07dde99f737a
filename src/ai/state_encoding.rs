use crate::ai::agent::{Observation, ObservationKind};

/// One-hot encode `state` as a vector of length `num_states`.
pub fn one_hot(state: usize, num_states: usize) -> Vec<f64> {
    assert!(
        state < num_states,
        "state {} out of range for {} states",
        state,
        num_states
    );
    let mut v = vec![0.0; num_states];
    v[state] = 1.0;
    v
}

/// Build the observation an agent of the given kind expects for `state`.
pub fn observe(state: usize, num_states: usize, kind: ObservationKind) -> Observation {
    match kind {
        ObservationKind::StateIndex => Observation::State(state),
        ObservationKind::Features => Observation::Features(one_hot(state, num_states)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_hot() {
        assert_eq!(one_hot(2, 4), vec![0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_one_hot_out_of_range() {
        one_hot(4, 4);
    }

    #[test]
    fn test_observe_by_kind() {
        assert_eq!(observe(1, 3, ObservationKind::StateIndex), Observation::State(1));
        assert_eq!(
            observe(1, 3, ObservationKind::Features),
            Observation::Features(vec![0.0, 1.0, 0.0])
        );
    }
}
