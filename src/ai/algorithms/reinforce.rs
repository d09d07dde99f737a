use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::ai::agent::{Action, Agent, AgentState, Observation, ObservationKind};
use crate::ai::networks::MlpConfig;
use crate::ai::sampling::{make_rng, randn};
use crate::autodiff::{Graph, Model, NodeId, Solver, Tensor};
use crate::error::AgentError;

/// Per-output gradient pushed onto actor and baseline is capped at this.
pub(crate) const UPDATE_CLAMP: f64 = 0.1;

/// Discount factors below this end the return-to-go accumulation.
const MIN_DISCOUNT: f64 = 1e-5;

/// Discounted return-to-go from step `t`.
pub(crate) fn return_to_go(rewards: &[f64], t: usize, gamma: f64) -> f64 {
    let mut mul = 1.0;
    let mut v = 0.0;
    for &r in &rewards[t..] {
        v += mul * r;
        mul *= gamma;
        if mul < MIN_DISCOUNT {
            break;
        }
    }
    v
}

/// Clamped `-(V - b) * (a_i - mu_i)` for every action dimension.
pub(crate) fn actor_updates(advantage: f64, action: &[f64], mean: &[f64]) -> Vec<f64> {
    action
        .iter()
        .zip(mean)
        .map(|(a, mu)| (-advantage * (a - mu)).clamp(-UPDATE_CLAMP, UPDATE_CLAMP))
        .collect()
}

/// REINFORCE hyperparameters, shared by the feed-forward and recurrent agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReinforceConfig {
    pub gamma: f64,
    /// Actor step size.
    pub alpha: f64,
    /// Baseline step size.
    pub beta: f64,
    pub num_hidden_units: usize,
    /// Trajectory length that triggers an update.
    pub n_up: usize,
    /// Leading steps of the trajectory that receive gradient.
    pub n_use: usize,
    pub action_noise_std: f64,
    pub gradient_clip: f64,
    pub seed: Option<u64>,
}

impl Default for ReinforceConfig {
    fn default() -> Self {
        ReinforceConfig {
            gamma: 0.5,
            alpha: 0.001,
            beta: 0.01,
            num_hidden_units: 100,
            n_up: 100,
            n_use: 80,
            action_noise_std: 0.02,
            gradient_clip: 5.0,
            seed: None,
        }
    }
}

impl ReinforceConfig {
    /// Defaults for the LSTM variant.
    pub fn recurrent() -> Self {
        ReinforceConfig {
            num_hidden_units: 40,
            action_noise_std: 0.05,
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ActorBaselineSnapshot {
    pub ns: usize,
    pub na: usize,
    pub actor: Model,
    pub baseline: Model,
}

/// Gaussian-policy REINFORCE with a learned baseline, both two-layer MLPs.
///
/// Every `act` records one actor graph and one baseline graph. When `n_up`
/// rewards have been collected the first `n_use` steps are pushed through
/// backprop and all buffers are flushed.
///
/// Experimental: the sampled action replaces the
/// network mean with pure exploration noise, so there is no convergence
/// guarantee.
pub struct ReinforceAgent {
    config: ReinforceConfig,
    ns: usize,
    na: usize,
    actor: Model,
    baseline: Model,
    actor_solver: Solver,
    baseline_solver: Solver,
    actor_graphs: Vec<(Graph, NodeId)>,
    baseline_graphs: Vec<(Graph, NodeId)>,
    actor_actions: Vec<Vec<f64>>,
    reward_history: Vec<f64>,
    t: usize,
    last_td_error: Option<f64>,
    rng: StdRng,
}

impl ReinforceAgent {
    pub fn new(ns: usize, na: usize, config: ReinforceConfig) -> Self {
        let mut rng = make_rng(config.seed);
        let nh = config.num_hidden_units;
        let actor = MlpConfig::new(ns, nh, na).with_output_std(0.1).init(&mut rng);
        let baseline = MlpConfig::new(ns, nh, na).init(&mut rng);
        ReinforceAgent {
            config,
            ns,
            na,
            actor,
            baseline,
            actor_solver: Solver::new(),
            baseline_solver: Solver::new(),
            actor_graphs: Vec::new(),
            baseline_graphs: Vec::new(),
            actor_actions: Vec::new(),
            reward_history: Vec::new(),
            t: 0,
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

    /// Steps buffered since the last update.
    pub fn pending_steps(&self) -> usize {
        self.actor_graphs.len()
    }

    fn flush(&mut self) {
        self.actor_graphs.clear();
        self.baseline_graphs.clear();
        self.actor_actions.clear();
        self.reward_history.clear();
    }

    fn update(&mut self) -> Result<(), AgentError> {
        let n_use = self.config.n_use.min(self.actor_graphs.len());
        let mut baseline_mse = 0.0;
        for t in 0..n_use {
            let v = return_to_go(&self.reward_history, t, self.config.gamma);
            let (bg, b_out) = &mut self.baseline_graphs[t];
            let b = bg.value(*b_out).w[0];
            let (ag, a_out) = &mut self.actor_graphs[t];
            let updates = actor_updates(v - b, &self.actor_actions[t], &ag.value(*a_out).w);
            for (dw, u) in ag.grad_mut(*a_out).iter_mut().zip(updates) {
                *dw += u;
            }
            bg.grad_mut(*b_out)[0] += (-(v - b)).clamp(-UPDATE_CLAMP, UPDATE_CLAMP);
            baseline_mse += (v - b) * (v - b);
        }
        baseline_mse /= n_use.max(1) as f64;
        AgentError::check_finite("REINFORCE", "baseline mse", baseline_mse)?;

        for t in 0..n_use {
            let (ag, _) = &mut self.actor_graphs[t];
            ag.backward();
            ag.accumulate_grads(&mut self.actor);
            let (bg, _) = &mut self.baseline_graphs[t];
            bg.backward();
            bg.accumulate_grads(&mut self.baseline);
        }
        let clip = self.config.gradient_clip;
        self.actor_solver
            .step(&mut self.actor, self.config.alpha, 0.0, clip);
        self.baseline_solver
            .step(&mut self.baseline, self.config.beta, 0.0, clip);

        tracing::debug!(steps = n_use, baseline_mse, "REINFORCE update");
        self.flush();
        self.last_td_error = Some(baseline_mse);
        Ok(())
    }
}

impl Agent for ReinforceAgent {
    fn name(&self) -> &'static str {
        "REINFORCE"
    }

    fn observation_kind(&self) -> ObservationKind {
        ObservationKind::Features
    }

    fn act(&mut self, observation: &Observation) -> Result<Action, AgentError> {
        let features = observation.features(self.name())?;
        assert_eq!(features.len(), self.ns, "REINFORCE feature length mismatch");

        let mut ag = Graph::new(true);
        let x = ag.input(Tensor::column(features));
        let a_out = MlpConfig::forward(&mut ag, &self.actor, x);
        let mut bg = Graph::new(true);
        let x = bg.input(Tensor::column(features));
        let b_out = MlpConfig::forward(&mut bg, &self.baseline, x);

        let std = self.config.action_noise_std;
        let action: Vec<f64> = (0..self.na).map(|_| randn(&mut self.rng, 0.0, std)).collect();

        self.actor_graphs.push((ag, a_out));
        self.baseline_graphs.push((bg, b_out));
        self.actor_actions.push(action.clone());
        Ok(Action::Continuous(action))
    }

    fn learn(&mut self, reward: f64) -> Result<(), AgentError> {
        self.reward_history.push(reward);
        if self.reward_history.len() >= self.config.n_up {
            self.update()?;
        }
        self.t += 1;
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
