use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ai::agent::{Action, Agent, AgentState, Observation, ObservationKind};
use crate::ai::networks::MlpConfig;
use crate::ai::sampling::{argmax, make_rng};
use crate::autodiff::{Graph, Model, Solver, Tensor};
use crate::error::AgentError;
use crate::training::replay_buffer::ReplayBuffer;

/// DQN hyperparameters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DqnConfig {
    pub gamma: f64,
    pub epsilon: f64,
    pub alpha: f64,
    /// Store the live transition every this many learning ticks.
    pub experience_add_every: usize,
    pub experience_size: usize,
    /// Replayed transitions per `learn` call.
    pub learning_steps_per_iteration: usize,
    pub td_error_clamp: f64,
    pub num_hidden_units: usize,
    pub regularization: f64,
    pub gradient_clip: f64,
    pub seed: Option<u64>,
}

impl Default for DqnConfig {
    fn default() -> Self {
        DqnConfig {
            gamma: 0.75,
            epsilon: 0.1,
            alpha: 0.01,
            experience_add_every: 25,
            experience_size: 5000,
            learning_steps_per_iteration: 10,
            td_error_clamp: 1.0,
            num_hidden_units: 100,
            regularization: 0.0,
            gradient_clip: 5.0,
            seed: None,
        }
    }
}

/// One stored `(s0, a0, r0, s1)` transition. `a1` rides along for parity
/// with the tabular agents but is not used by the Q-learning target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub s0: Vec<f64>,
    pub a0: usize,
    pub r0: f64,
    pub s1: Vec<f64>,
    pub a1: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct DqnSnapshot {
    ns: usize,
    na: usize,
    nh: usize,
    net: Model,
    experience: Vec<Experience>,
    experience_index: usize,
    t: usize,
}

/// Q-learning with a two-layer tanh network over feature observations,
/// plus uniform experience replay.
pub struct DqnAgent {
    config: DqnConfig,
    ns: usize,
    na: usize,
    net: Model,
    solver: Solver,
    experience: ReplayBuffer<Experience>,
    t: usize,
    r0: Option<f64>,
    s0: Option<Vec<f64>>,
    a0: Option<usize>,
    s1: Option<Vec<f64>>,
    a1: Option<usize>,
    last_td_error: Option<f64>,
    rng: StdRng,
}

impl DqnAgent {
    /// `ns` is the feature length, `na` the number of actions.
    pub fn new(ns: usize, na: usize, config: DqnConfig) -> Self {
        let mut rng = make_rng(config.seed);
        let net = MlpConfig::new(ns, config.num_hidden_units, na).init(&mut rng);
        let experience = ReplayBuffer::new(config.experience_size, config.seed);
        DqnAgent {
            ns,
            na,
            net,
            solver: Solver::new(),
            experience,
            config,
            t: 0,
            r0: None,
            s0: None,
            a0: None,
            s1: None,
            a1: None,
            last_td_error: None,
            rng,
        }
    }

    pub fn network(&self) -> &Model {
        &self.net
    }

    pub fn experience(&self) -> &ReplayBuffer<Experience> {
        &self.experience
    }

    /// Q values for every action, without recording a graph.
    pub fn q_values(&self, features: &[f64]) -> Vec<f64> {
        MlpConfig::predict(&self.net, features)
    }

    /// Epsilon-greedy action, shifting the one-step memory.
    pub fn select_action(&mut self, features: &[f64]) -> usize {
        let a = if self.rng.random::<f64>() < self.config.epsilon {
            self.rng.random_range(0..self.na)
        } else {
            argmax(&self.q_values(features))
        };
        self.s0 = self.s1.take();
        self.a0 = self.a1;
        self.s1 = Some(features.to_vec());
        self.a1 = Some(a);
        a
    }

    /// One gradient step toward `r0 + gamma * max Q(s1)`. Returns the
    /// unclamped TD error.
    pub fn learn_from_tuple(&mut self, exp: &Experience) -> Result<f64, AgentError> {
        let next = self.q_values(&exp.s1);
        let q_max = exp.r0 + self.config.gamma * next[argmax(&next)];
        AgentError::check_finite("DQN", "td target", q_max)?;

        let mut g = Graph::new(true);
        let x = g.input(Tensor::column(&exp.s0));
        let out = MlpConfig::forward(&mut g, &self.net, x);
        let td_error = g.value(out).w[exp.a0] - q_max;
        AgentError::check_finite("DQN", "td error", td_error)?;

        let clamp = self.config.td_error_clamp;
        g.grad_mut(out)[exp.a0] = td_error.clamp(-clamp, clamp);
        g.backward();
        g.accumulate_grads(&mut self.net);
        let mut stepped = self.net.clone();
        self.solver.step(
            &mut stepped,
            self.config.alpha,
            self.config.regularization,
            self.config.gradient_clip,
        );
        self.net.zero_grads();
        if !stepped.is_finite() {
            return Err(AgentError::NumericDivergence {
                agent: "DQN",
                quantity: "network weights",
                value: f64::NAN,
            });
        }
        self.net = stepped;
        Ok(td_error)
    }
}

impl Agent for DqnAgent {
    fn name(&self) -> &'static str {
        "DQN"
    }

    fn observation_kind(&self) -> ObservationKind {
        ObservationKind::Features
    }

    fn act(&mut self, observation: &Observation) -> Result<Action, AgentError> {
        let features = observation.features(self.name())?;
        assert_eq!(
            features.len(),
            self.ns,
            "DQN expects {} features, got {}",
            self.ns,
            features.len()
        );
        Ok(Action::Discrete(self.select_action(features)))
    }

    fn learn(&mut self, reward: f64) -> Result<(), AgentError> {
        if let (Some(r0), Some(s0), Some(a0), Some(s1), Some(a1)) =
            (self.r0, &self.s0, self.a0, &self.s1, self.a1)
        {
            if self.config.alpha > 0.0 {
                let exp = Experience {
                    s0: s0.clone(),
                    a0,
                    r0,
                    s1: s1.clone(),
                    a1,
                };
                let td_error = self.learn_from_tuple(&exp)?;
                self.last_td_error = Some(td_error);

                if self.t % self.config.experience_add_every.max(1) == 0 {
                    self.experience.push(exp);
                }
                self.t += 1;

                for _ in 0..self.config.learning_steps_per_iteration {
                    if let Some(replay) = self.experience.sample_one() {
                        self.learn_from_tuple(&replay)?;
                    }
                }
            }
        }
        self.r0 = Some(reward);
        Ok(())
    }

    fn reset_episode(&mut self) {
        self.r0 = None;
        self.s0 = None;
        self.a0 = None;
        self.s1 = None;
        self.a1 = None;
    }

    fn last_td_error(&self) -> Option<f64> {
        self.last_td_error
    }

    fn save_state(&self) -> Result<AgentState, AgentError> {
        AgentState::new(
            self.name(),
            &DqnSnapshot {
                ns: self.ns,
                na: self.na,
                nh: self.config.num_hidden_units,
                net: self.net.clone(),
                experience: self.experience.entries().to_vec(),
                experience_index: self.experience.position(),
                t: self.t,
            },
        )
    }

    fn load_state(&mut self, state: AgentState) -> Result<(), AgentError> {
        let snap: DqnSnapshot = state.decode(self.name())?;
        if snap.ns != self.ns || snap.na != self.na {
            return Err(AgentError::StateMismatch {
                expected: format!("{} inputs x {} actions", self.ns, self.na),
                found: format!("{} inputs x {} actions", snap.ns, snap.na),
            });
        }
        self.config.num_hidden_units = snap.nh;
        self.net = snap.net;
        self.solver = Solver::new();
        self.experience = ReplayBuffer::from_parts(
            self.config.experience_size,
            snap.experience,
            snap.experience_index,
            self.config.seed,
        );
        self.t = snap.t;
        self.reset_episode();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::state_encoding::one_hot;

    fn config() -> DqnConfig {
        DqnConfig {
            num_hidden_units: 8,
            seed: Some(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_network_shape() {
        let agent = DqnAgent::new(4, 2, config());
        assert_eq!(agent.q_values(&one_hot(1, 4)).len(), 2);
        let w1 = agent.network().get("W1").unwrap();
        assert_eq!((w1.rows(), w1.cols()), (8, 4));
    }

    #[test]
    fn test_update_moves_q_toward_target() {
        let mut agent = DqnAgent::new(3, 2, config());
        let exp = Experience {
            s0: one_hot(0, 3),
            a0: 1,
            r0: 1.0,
            s1: one_hot(2, 3),
            a1: 0,
        };
        let before = agent.q_values(&exp.s0)[1];
        let td = agent.learn_from_tuple(&exp).unwrap();
        assert!(td < 0.0);
        let after = agent.q_values(&exp.s0)[1];
        assert!(after > before, "{} should exceed {}", after, before);
    }

    #[test]
    fn test_experience_buffer_wraps() {
        let mut agent = DqnAgent::new(
            4,
            2,
            DqnConfig {
                experience_add_every: 1,
                experience_size: 3,
                learning_steps_per_iteration: 2,
                ..config()
            },
        );
        for step in 0..20 {
            agent.act(&Observation::Features(one_hot(step % 4, 4))).unwrap();
            agent.learn(if step % 4 == 3 { 1.0 } else { 0.0 }).unwrap();
            assert!(agent.experience().len() <= 3);
        }
        // 19 transitions stored in a ring of three
        assert_eq!(agent.experience().len(), 3);
        assert_eq!(agent.experience().position(), 19 % 3);
    }

    #[test]
    fn test_learning_stays_finite() {
        let mut agent = DqnAgent::new(
            5,
            2,
            DqnConfig {
                experience_add_every: 2,
                ..config()
            },
        );
        for step in 0..200 {
            agent.act(&Observation::Features(one_hot(step % 5, 5))).unwrap();
            agent.learn(if step % 5 == 4 { 1.0 } else { 0.0 }).unwrap();
        }
        assert!(agent.network().is_finite());
        assert!(agent.last_td_error().unwrap().is_finite());
    }

    #[test]
    fn test_divergent_step_keeps_last_finite_weights() {
        let mut agent = DqnAgent::new(
            3,
            2,
            DqnConfig {
                alpha: f64::MAX,
                ..config()
            },
        );
        let before = agent.network().clone();
        let exp = Experience {
            s0: one_hot(0, 3),
            a0: 1,
            r0: 1.0,
            s1: one_hot(2, 3),
            a1: 0,
        };
        let err = agent.learn_from_tuple(&exp).unwrap_err();
        assert!(matches!(err, AgentError::NumericDivergence { agent: "DQN", .. }));
        assert_eq!(agent.network(), &before);
    }

    #[test]
    fn test_rejects_state_index() {
        let mut agent = DqnAgent::new(3, 2, config());
        let err = agent.act(&Observation::State(0)).unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedObservation { .. }));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut agent = DqnAgent::new(
            3,
            2,
            DqnConfig {
                experience_add_every: 1,
                ..config()
            },
        );
        for step in 0..6 {
            agent.act(&Observation::Features(one_hot(step % 3, 3))).unwrap();
            agent.learn(1.0).unwrap();
        }
        let state = agent.save_state().unwrap();
        let mut fresh = DqnAgent::new(3, 2, config());
        fresh.load_state(state).unwrap();
        let x = one_hot(1, 3);
        assert_eq!(fresh.q_values(&x), agent.q_values(&x));
        assert_eq!(fresh.experience().len(), agent.experience().len());
    }
}
