use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ai::agent::{Action, Agent, AgentState, Observation, ObservationKind};
use crate::ai::networks::MlpConfig;
use crate::ai::sampling::{make_rng, randn};
use crate::autodiff::{Graph, Model, Tensor};
use crate::error::AgentError;

/// Deterministic policy gradient hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DpgConfig {
    pub gamma: f64,
    /// Probability of replacing the actor's action with noise.
    pub epsilon: f64,
    /// Actor step size.
    pub alpha: f64,
    /// Critic step size.
    pub beta: f64,
    pub num_hidden_units: usize,
    pub action_clamp: f64,
    pub td_error_clamp: f64,
    pub action_noise_std: f64,
    pub seed: Option<u64>,
}

impl Default for DpgConfig {
    fn default() -> Self {
        DpgConfig {
            gamma: 0.5,
            epsilon: 0.5,
            alpha: 0.001,
            beta: 0.01,
            num_hidden_units: 100,
            action_clamp: 0.25,
            td_error_clamp: 0.5,
            action_noise_std: 0.02,
            seed: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DpgSnapshot {
    ns: usize,
    na: usize,
    actor: Model,
    critic: Tensor,
}

/// Deterministic actor with a linear compatible critic.
///
/// The critic scores `(s, a)` through the feature `psi = J(s) * a`, where
/// `J(s)` is the Jacobian of the actor output with respect to every actor
/// parameter. The actor then moves along the critic weights directly.
/// Experimental: no convergence guarantee.
pub struct DpgAgent {
    config: DpgConfig,
    ns: usize,
    na: usize,
    actor: Model,
    /// Row vector with one weight per actor parameter.
    critic: Tensor,
    r0: Option<f64>,
    s0: Option<Vec<f64>>,
    a0: Option<Vec<f64>>,
    s1: Option<Vec<f64>>,
    a1: Option<Vec<f64>>,
    last_td_error: Option<f64>,
    rng: StdRng,
}

impl DpgAgent {
    pub fn new(ns: usize, na: usize, config: DpgConfig) -> Self {
        let mut rng = make_rng(config.seed);
        let actor = MlpConfig::new(ns, config.num_hidden_units, na)
            .with_output_std(0.1)
            .init(&mut rng);
        let critic = Tensor::random_normal(1, actor.num_parameters(), 0.0, 0.01, &mut rng);
        DpgAgent {
            config,
            ns,
            na,
            actor,
            critic,
            r0: None,
            s0: None,
            a0: None,
            s1: None,
            a1: None,
            last_td_error: None,
            rng,
        }
    }

    pub fn actor(&self) -> &Model {
        &self.actor
    }

    pub fn critic(&self) -> &Tensor {
        &self.critic
    }

    /// Jacobian of the actor output at `s`: one column per action
    /// dimension, one row per flattened actor parameter.
    pub fn jacobian_at(&mut self, s: &[f64]) -> Tensor {
        let mut jacobian = Tensor::zeros(self.actor.num_parameters(), self.na);
        for a in 0..self.na {
            self.actor.zero_grads();
            let mut g = Graph::new(true);
            let x = g.input(Tensor::column(s));
            let out = MlpConfig::forward(&mut g, &self.actor, x);
            g.grad_mut(out)[a] = 1.0;
            g.backward();
            g.accumulate_grads(&mut self.actor);
            jacobian.set_column(&self.actor.flatten_grads(), a);
        }
        self.actor.zero_grads();
        jacobian
    }

    /// Critic estimate `w . (J(s) a)` plus the feature it was computed from.
    fn critic_value(&mut self, s: &[f64], a: &[f64]) -> (f64, Tensor) {
        let psi = self.jacobian_at(s).matmul(&Tensor::column(a));
        let q = self.critic.matmul(&psi).w[0];
        (q, psi)
    }

    fn learn_from_tuple(&mut self, r0: f64, s0: &[f64], a0: &[f64], s1: &[f64]) -> Result<(), AgentError> {
        let (qw0, psi0) = self.critic_value(s0, a0);
        let mu1 = MlpConfig::predict(&self.actor, s1);
        let (qw1, _) = self.critic_value(s1, &mu1);

        let td_error = r0 + self.config.gamma * qw1 - qw0;
        AgentError::check_finite("DPG", "td error", td_error)?;
        let clamp = self.config.td_error_clamp;
        let td_error = td_error.clamp(-clamp, clamp);
        self.last_td_error = Some(td_error);

        // natural gradient step: actor weights follow the critic weights
        let mut actor = self.actor.clone();
        let mut ix = 0;
        for (_, param) in actor.iter_mut() {
            for w in param.w.iter_mut() {
                *w += self.config.alpha * self.critic.w[ix];
                ix += 1;
            }
        }
        let mut critic = self.critic.clone();
        for (w, psi) in critic.w.iter_mut().zip(psi0.w.iter()) {
            *w += self.config.beta * td_error * psi;
        }
        for (finite, quantity) in [
            (actor.is_finite(), "actor weights"),
            (critic.is_finite(), "critic weights"),
        ] {
            if !finite {
                return Err(AgentError::NumericDivergence {
                    agent: "DPG",
                    quantity,
                    value: f64::NAN,
                });
            }
        }
        self.actor = actor;
        self.critic = critic;
        Ok(())
    }
}

impl Agent for DpgAgent {
    fn name(&self) -> &'static str {
        "DPG"
    }

    fn observation_kind(&self) -> ObservationKind {
        ObservationKind::Features
    }

    fn act(&mut self, observation: &Observation) -> Result<Action, AgentError> {
        let features = observation.features(self.name())?;
        assert_eq!(features.len(), self.ns, "DPG feature length mismatch");

        let mut action = MlpConfig::predict(&self.actor, features);
        if self.rng.random::<f64>() < self.config.epsilon {
            let std = self.config.action_noise_std;
            for a in action.iter_mut() {
                *a = randn(&mut self.rng, 0.0, std);
            }
        }
        let clamp = self.config.action_clamp;
        for a in action.iter_mut() {
            *a = a.clamp(-clamp, clamp);
        }

        self.s0 = self.s1.take();
        self.a0 = self.a1.take();
        self.s1 = Some(features.to_vec());
        self.a1 = Some(action.clone());
        Ok(Action::Continuous(action))
    }

    fn learn(&mut self, reward: f64) -> Result<(), AgentError> {
        if let (Some(r0), Some(s0), Some(a0), Some(s1)) = (
            self.r0,
            self.s0.clone(),
            self.a0.clone(),
            self.s1.clone(),
        ) {
            self.learn_from_tuple(r0, &s0, &a0, &s1)?;
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
            &DpgSnapshot {
                ns: self.ns,
                na: self.na,
                actor: self.actor.clone(),
                critic: self.critic.clone(),
            },
        )
    }

    fn load_state(&mut self, state: AgentState) -> Result<(), AgentError> {
        let snap: DpgSnapshot = state.decode(self.name())?;
        if snap.ns != self.ns || snap.na != self.na {
            return Err(AgentError::StateMismatch {
                expected: format!("{} inputs x {} actions", self.ns, self.na),
                found: format!("{} inputs x {} actions", snap.ns, snap.na),
            });
        }
        self.actor = snap.actor;
        self.critic = snap.critic;
        self.reset_episode();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::state_encoding::one_hot;

    fn small() -> DpgConfig {
        DpgConfig {
            num_hidden_units: 4,
            seed: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn test_critic_covers_every_actor_parameter() {
        let agent = DpgAgent::new(3, 2, small());
        // W1 4x3, b1 4, W2 2x4, b2 2
        assert_eq!(agent.actor().num_parameters(), 12 + 4 + 8 + 2);
        assert_eq!(agent.critic().cols(), agent.actor().num_parameters());
    }

    #[test]
    fn test_jacobian_output_bias_rows() {
        let mut agent = DpgAgent::new(3, 2, small());
        let j = agent.jacobian_at(&one_hot(1, 3));
        let n = agent.actor().num_parameters();
        assert_eq!((j.rows(), j.cols()), (n, 2));
        // b2 is last: d out_a / d b2_a = 1, cross terms 0
        assert_eq!(j.get(n - 2, 0), 1.0);
        assert_eq!(j.get(n - 1, 0), 0.0);
        assert_eq!(j.get(n - 1, 1), 1.0);
        assert!(agent.actor().flatten_grads().iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_actions_are_clamped() {
        let mut agent = DpgAgent::new(
            2,
            2,
            DpgConfig {
                epsilon: 1.0,
                action_noise_std: 10.0,
                ..small()
            },
        );
        for _ in 0..20 {
            let Action::Continuous(a) = agent.act(&Observation::Features(vec![1.0, 0.0])).unwrap()
            else {
                panic!("expected continuous action");
            };
            assert!(a.iter().all(|x| x.abs() <= 0.25));
        }
    }

    #[test]
    fn test_learning_updates_and_stays_finite() {
        let mut agent = DpgAgent::new(3, 2, small());
        let critic_before = agent.critic().w.clone();
        for step in 0..30 {
            agent.act(&Observation::Features(one_hot(step % 3, 3))).unwrap();
            agent.learn(if step % 3 == 2 { 1.0 } else { 0.0 }).unwrap();
        }
        let td = agent.last_td_error().unwrap();
        assert!(td.abs() <= 0.5);
        assert_ne!(agent.critic().w, critic_before);
        assert!(agent.actor().is_finite() && agent.critic().is_finite());
    }

    #[test]
    fn test_divergent_actor_step_is_rejected() {
        let mut agent = DpgAgent::new(
            3,
            2,
            DpgConfig {
                alpha: f64::MAX,
                ..small()
            },
        );
        // alpha * critic overflows on the actor step
        agent.critic.w.iter_mut().for_each(|w| *w = 2.0);
        let (actor, critic) = (agent.actor().clone(), agent.critic().clone());
        let err = agent
            .learn_from_tuple(1.0, &one_hot(0, 3), &[0.1, -0.1], &one_hot(1, 3))
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::NumericDivergence {
                quantity: "actor weights",
                ..
            }
        ));
        assert_eq!(agent.actor(), &actor);
        assert_eq!(agent.critic(), &critic);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut agent = DpgAgent::new(3, 2, small());
        for step in 0..5 {
            agent.act(&Observation::Features(one_hot(step % 3, 3))).unwrap();
            agent.learn(0.5).unwrap();
        }
        let mut fresh = DpgAgent::new(3, 2, DpgConfig { seed: Some(4), ..small() });
        fresh.load_state(agent.save_state().unwrap()).unwrap();
        assert_eq!(fresh.critic().w, agent.critic().w);
        assert_eq!(fresh.actor().flatten_values(), agent.actor().flatten_values());
    }
}
