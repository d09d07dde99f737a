use rand::rngs::StdRng;

use crate::ai::agent::{Action, Agent, AgentState, Observation, ObservationKind};
use crate::ai::algorithms::reinforce::{
    actor_updates, return_to_go, ActorBaselineSnapshot, ReinforceConfig, UPDATE_CLAMP,
};
use crate::ai::networks::{LstmConfig, LstmState};
use crate::ai::sampling::{make_rng, randn};
use crate::autodiff::{Graph, Model, NodeId, Solver, Tensor};
use crate::error::AgentError;

/// REINFORCE with LSTM actor and baseline.
///
/// The whole trajectory is unrolled on one graph per network, carrying the
/// hidden state from step to step. After each update the graphs and the
/// carried state start over.
pub struct RecurrentReinforceAgent {
    config: ReinforceConfig,
    ns: usize,
    na: usize,
    actor_net: LstmConfig,
    baseline_net: LstmConfig,
    actor: Model,
    baseline: Model,
    actor_solver: Solver,
    baseline_solver: Solver,
    actor_graph: Graph,
    baseline_graph: Graph,
    actor_prev: Option<LstmState>,
    baseline_prev: Option<LstmState>,
    actor_outputs: Vec<NodeId>,
    baseline_outputs: Vec<NodeId>,
    actor_actions: Vec<Vec<f64>>,
    reward_history: Vec<f64>,
    last_td_error: Option<f64>,
    rng: StdRng,
}

impl RecurrentReinforceAgent {
    pub fn new(ns: usize, na: usize, config: ReinforceConfig) -> Self {
        let mut rng = make_rng(config.seed);
        let nh = config.num_hidden_units;
        let actor_net = LstmConfig::new(ns, vec![nh], na);
        let baseline_net = LstmConfig::new(ns, vec![nh], 1);
        let actor = actor_net.init(&mut rng);
        let baseline = baseline_net.init(&mut rng);
        RecurrentReinforceAgent {
            config,
            ns,
            na,
            actor_net,
            baseline_net,
            actor,
            baseline,
            actor_solver: Solver::new(),
            baseline_solver: Solver::new(),
            actor_graph: Graph::new(true),
            baseline_graph: Graph::new(true),
            actor_prev: None,
            baseline_prev: None,
            actor_outputs: Vec::new(),
            baseline_outputs: Vec::new(),
            actor_actions: Vec::new(),
            reward_history: Vec::new(),
            last_td_error: None,
            rng,
        }
    }

    pub fn actor(&self) -> &Model {
        &self.actor
    }

    pub fn baseline(&self) -> &Model {
        &self.baseline
    }

    pub fn pending_steps(&self) -> usize {
        self.actor_outputs.len()
    }

    fn flush(&mut self) {
        self.actor_graph = Graph::new(true);
        self.baseline_graph = Graph::new(true);
        self.actor_prev = None;
        self.baseline_prev = None;
        self.actor_outputs.clear();
        self.baseline_outputs.clear();
        self.actor_actions.clear();
        self.reward_history.clear();
    }

    fn update(&mut self) -> Result<(), AgentError> {
        let n_use = self.config.n_use.min(self.actor_outputs.len());
        let mut baseline_mse = 0.0;
        for t in 0..n_use {
            let v = return_to_go(&self.reward_history, t, self.config.gamma);
            let b_out = self.baseline_outputs[t];
            let b = self.baseline_graph.value(b_out).w[0];
            let a_out = self.actor_outputs[t];
            let updates = actor_updates(
                v - b,
                &self.actor_actions[t],
                &self.actor_graph.value(a_out).w,
            );
            for (dw, u) in self.actor_graph.grad_mut(a_out).iter_mut().zip(updates) {
                *dw += u;
            }
            self.baseline_graph.grad_mut(b_out)[0] +=
                (-(v - b)).clamp(-UPDATE_CLAMP, UPDATE_CLAMP);
            baseline_mse += (v - b) * (v - b);
        }
        baseline_mse /= n_use.max(1) as f64;
        AgentError::check_finite("RecurrentREINFORCE", "baseline mse", baseline_mse)?;

        self.actor_graph.backward();
        self.actor_graph.accumulate_grads(&mut self.actor);
        self.baseline_graph.backward();
        self.baseline_graph.accumulate_grads(&mut self.baseline);
        let clip = self.config.gradient_clip;
        self.actor_solver
            .step(&mut self.actor, self.config.alpha, 0.0, clip);
        self.baseline_solver
            .step(&mut self.baseline, self.config.beta, 0.0, clip);

        tracing::debug!(steps = n_use, baseline_mse, "recurrent REINFORCE update");
        self.flush();
        self.last_td_error = Some(baseline_mse);
        Ok(())
    }
}

impl Agent for RecurrentReinforceAgent {
    fn name(&self) -> &'static str {
        "RecurrentREINFORCE"
    }

    fn observation_kind(&self) -> ObservationKind {
        ObservationKind::Features
    }

    fn act(&mut self, observation: &Observation) -> Result<Action, AgentError> {
        let features = observation.features(self.name())?;
        assert_eq!(features.len(), self.ns, "RecurrentREINFORCE feature length mismatch");

        let x = self.actor_graph.input(Tensor::column(features));
        let step = self.actor_net.forward(
            &mut self.actor_graph,
            &self.actor,
            x,
            self.actor_prev.as_ref(),
        );
        let mean = self.actor_graph.value(step.output).w.clone();
        self.actor_outputs.push(step.output);
        self.actor_prev = Some(step.state);

        let x = self.baseline_graph.input(Tensor::column(features));
        let step = self.baseline_net.forward(
            &mut self.baseline_graph,
            &self.baseline,
            x,
            self.baseline_prev.as_ref(),
        );
        self.baseline_outputs.push(step.output);
        self.baseline_prev = Some(step.state);

        let std = self.config.action_noise_std;
        let action: Vec<f64> = mean
            .iter()
            .map(|&mu| mu + randn(&mut self.rng, 0.0, std))
            .collect();
        self.actor_actions.push(action.clone());
        Ok(Action::Continuous(action))
    }

    fn learn(&mut self, reward: f64) -> Result<(), AgentError> {
        self.reward_history.push(reward);
        if self.reward_history.len() >= self.config.n_up {
            self.update()?;
        }
        Ok(())
    }

    fn last_td_error(&self) -> Option<f64> {
        self.last_td_error
    }

    fn save_state(&self) -> Result<AgentState, AgentError> {
        AgentState::new(
            self.name(),
            &ActorBaselineSnapshot {
                ns: self.ns,
                na: self.na,
                actor: self.actor.clone(),
                baseline: self.baseline.clone(),
            },
        )
    }

    fn load_state(&mut self, state: AgentState) -> Result<(), AgentError> {
        let snap: ActorBaselineSnapshot = state.decode(self.name())?;
        if snap.ns != self.ns || snap.na != self.na {
            return Err(AgentError::StateMismatch {
                expected: format!("{} inputs x {} actions", self.ns, self.na),
                found: format!("{} inputs x {} actions", snap.ns, snap.na),
            });
        }
        self.actor = snap.actor;
        self.baseline = snap.baseline;
        self.actor_solver = Solver::new();
        self.baseline_solver = Solver::new();
        self.flush();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::state_encoding::one_hot;

    fn small() -> ReinforceConfig {
        ReinforceConfig {
            num_hidden_units: 5,
            n_up: 6,
            n_use: 4,
            seed: Some(8),
            ..ReinforceConfig::recurrent()
        }
    }

    #[test]
    fn test_recurrent_defaults() {
        let config = ReinforceConfig::recurrent();
        assert_eq!(config.num_hidden_units, 40);
        assert_eq!(config.action_noise_std, 0.05);
    }

    #[test]
    fn test_act_shape_and_carried_state() {
        let mut agent = RecurrentReinforceAgent::new(3, 2, small());
        for step in 0..3 {
            match agent.act(&Observation::Features(one_hot(step, 3))).unwrap() {
                Action::Continuous(a) => assert_eq!(a.len(), 2),
                other => panic!("unexpected action {:?}", other),
            }
            agent.learn(0.0).unwrap();
        }
        assert_eq!(agent.pending_steps(), 3);
        assert!(agent.actor_prev.is_some());
    }

    #[test]
    fn test_update_resets_graphs_and_state() {
        let mut agent = RecurrentReinforceAgent::new(3, 2, small());
        let before = agent.actor().flatten_values();
        for step in 0..6 {
            agent.act(&Observation::Features(one_hot(step % 3, 3))).unwrap();
            agent.learn(1.0).unwrap();
        }
        assert_eq!(agent.pending_steps(), 0);
        assert!(agent.actor_prev.is_none() && agent.baseline_prev.is_none());
        assert_eq!(agent.actor_graph.num_ops(), 0);
        assert_ne!(agent.actor().flatten_values(), before);
        assert!(agent.actor().is_finite() && agent.baseline().is_finite());
        assert!(agent.last_td_error().unwrap().is_finite());
    }

    #[test]
    fn test_load_rejects_feed_forward_state() {
        let ff = crate::ai::algorithms::ReinforceAgent::new(3, 2, ReinforceConfig::default());
        let mut agent = RecurrentReinforceAgent::new(3, 2, small());
        let err = agent.load_state(ff.save_state().unwrap()).unwrap_err();
        assert!(matches!(err, AgentError::StateMismatch { .. }));
    }
}
