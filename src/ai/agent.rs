use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// What an agent is shown before it acts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Observation {
    /// Index of a state in a finite environment.
    State(usize),
    /// Real-valued feature vector (one-hot state encodings, sensors, ...).
    Features(Vec<f64>),
}

/// The observation form an agent consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationKind {
    StateIndex,
    Features,
}

/// Output of [`Agent::act`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Discrete(usize),
    Continuous(Vec<f64>),
}

impl Action {
    /// The discrete action id, if this is one.
    pub fn discrete(&self) -> Option<usize> {
        match self {
            Action::Discrete(a) => Some(*a),
            Action::Continuous(_) => None,
        }
    }
}

/// Serializable agent snapshot, tagged with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub algorithm: String,
    pub payload: serde_json::Value,
}

impl AgentState {
    pub fn new<T: Serialize>(algorithm: &str, payload: &T) -> Result<Self, AgentError> {
        Ok(AgentState {
            algorithm: algorithm.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Decode the payload, refusing snapshots written by another algorithm.
    pub fn decode<T: DeserializeOwned>(self, expected: &str) -> Result<T, AgentError> {
        if self.algorithm != expected {
            return Err(AgentError::StateMismatch {
                expected: expected.to_string(),
                found: self.algorithm,
            });
        }
        Ok(serde_json::from_value(self.payload)?)
    }
}

/// Universal interface for all learning agents.
///
/// The caller alternates `act` and `learn`: `learn(r)` delivers the reward
/// for the action returned by the most recent `act`.
pub trait Agent {
    /// Return the agent's display name.
    fn name(&self) -> &'static str;

    fn observation_kind(&self) -> ObservationKind;

    /// Choose an action for the observation and remember it for the next
    /// `learn` call.
    fn act(&mut self, observation: &Observation) -> Result<Action, AgentError>;

    /// Apply the reward earned by the previous action.
    fn learn(&mut self, reward: f64) -> Result<(), AgentError>;

    /// An episode finished.
    fn reset_episode(&mut self) {}

    /// Most recent TD error (or baseline MSE), if the agent tracks one.
    fn last_td_error(&self) -> Option<f64> {
        None
    }

    fn save_state(&self) -> Result<AgentState, AgentError>;

    fn load_state(&mut self, state: AgentState) -> Result<(), AgentError>;
}

impl Observation {
    pub(crate) fn state_index(&self, agent: &'static str) -> Result<usize, AgentError> {
        match self {
            Observation::State(s) => Ok(*s),
            Observation::Features(_) => Err(AgentError::UnsupportedObservation {
                agent,
                expected: "state index",
            }),
        }
    }

    pub(crate) fn features(&self, agent: &'static str) -> Result<&[f64], AgentError> {
        match self {
            Observation::Features(f) => Ok(f),
            Observation::State(_) => Err(AgentError::UnsupportedObservation {
                agent,
                expected: "feature vector",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        values: Vec<f64>,
    }

    #[test]
    fn test_state_roundtrip() {
        let p = Payload {
            values: vec![1.0, 2.5],
        };
        let state = AgentState::new("TD", &p).unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let back: AgentState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.decode::<Payload>("TD").unwrap(), p);
    }

    #[test]
    fn test_state_rejects_other_algorithm() {
        let state = AgentState::new("DP", &Payload { values: vec![] }).unwrap();
        let err = state.decode::<Payload>("TD").unwrap_err();
        assert!(matches!(err, AgentError::StateMismatch { .. }));
    }

    #[test]
    fn test_observation_accessors() {
        assert_eq!(Observation::State(3).state_index("TD").unwrap(), 3);
        assert!(Observation::State(3).features("DQN").is_err());
        let f = Observation::Features(vec![0.0, 1.0]);
        assert_eq!(f.features("DQN").unwrap(), &[0.0, 1.0]);
        assert!(matches!(
            f.state_index("DP"),
            Err(AgentError::UnsupportedObservation { agent: "DP", .. })
        ));
    }

    #[test]
    fn test_action_discrete() {
        assert_eq!(Action::Discrete(2).discrete(), Some(2));
        assert_eq!(Action::Continuous(vec![0.1]).discrete(), None);
    }
}
