use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::ai::agent::{Action, Agent, AgentState, Observation, ObservationKind};
use crate::ai::sampling::{make_rng, sample_weighted};
use crate::env::{check_allowed_actions, Environment};
use crate::error::AgentError;

/// Value-iteration hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DpConfig {
    pub gamma: f64,
    pub seed: Option<u64>,
}

impl Default for DpConfig {
    fn default() -> Self {
        DpConfig {
            gamma: 0.75,
            seed: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DpSnapshot {
    v: Vec<f64>,
    p: Vec<f64>,
}

/// Planning agent that runs value iteration against a known environment model.
///
/// Tables are indexed action-major: `P[a * ns + s]`.
pub struct DpAgent<E> {
    env: E,
    config: DpConfig,
    ns: usize,
    na: usize,
    v: Vec<f64>,
    p: Vec<f64>,
    rng: StdRng,
}

impl<E: Environment> DpAgent<E> {
    pub fn new(env: E, config: DpConfig) -> Result<Self, AgentError> {
        check_allowed_actions(&env)?;
        let rng = make_rng(config.seed);
        let mut agent = DpAgent {
            ns: env.num_states(),
            na: env.max_num_actions(),
            env,
            config,
            v: Vec::new(),
            p: Vec::new(),
            rng,
        };
        agent.reset();
        Ok(agent)
    }

    /// Zero values and a uniform policy over each state's allowed actions.
    pub fn reset(&mut self) {
        self.v = vec![0.0; self.ns];
        self.p = vec![0.0; self.ns * self.na];
        for s in 0..self.ns {
            let poss = self.env.allowed_actions(s);
            let prob = 1.0 / poss.len() as f64;
            for a in poss {
                self.p[a * self.ns + s] = prob;
            }
        }
    }

    pub fn value(&self, s: usize) -> f64 {
        self.v[s]
    }

    pub fn values(&self) -> &[f64] {
        &self.v
    }

    pub fn policy(&self, s: usize, a: usize) -> f64 {
        self.p[a * self.ns + s]
    }

    /// Sample an allowed action from the current policy.
    pub fn select_action(&mut self, s: usize) -> usize {
        let poss = self.env.allowed_actions(s);
        let probs: Vec<f64> = poss.iter().map(|&a| self.p[a * self.ns + s]).collect();
        poss[sample_weighted(&mut self.rng, &probs)]
    }

    /// One synchronous Bellman expectation sweep. Every new value is computed
    /// from the previous value array.
    pub fn evaluate_policy(&mut self) {
        let mut v_new = vec![0.0; self.ns];
        for (s, slot) in v_new.iter_mut().enumerate() {
            let mut v = 0.0;
            for a in self.env.allowed_actions(s) {
                let prob = self.p[a * self.ns + s];
                if prob == 0.0 {
                    continue;
                }
                let ns = self.env.next_state_distribution(s, a);
                let rs = self.env.reward(s, a, ns);
                v += prob * (rs + self.config.gamma * self.v[ns]);
            }
            *slot = v;
        }
        self.v = v_new;
    }

    /// Make the policy greedy with respect to `V`, splitting ties evenly.
    pub fn update_policy(&mut self) {
        for s in 0..self.ns {
            let poss = self.env.allowed_actions(s);
            let vs: Vec<f64> = poss
                .iter()
                .map(|&a| {
                    let ns = self.env.next_state_distribution(s, a);
                    self.env.reward(s, a, ns) + self.config.gamma * self.v[ns]
                })
                .collect();
            let vmax = vs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let nmax = vs.iter().filter(|&&v| v == vmax).count();
            for (&a, &v) in poss.iter().zip(vs.iter()) {
                self.p[a * self.ns + s] = if v == vmax { 1.0 / nmax as f64 } else { 0.0 };
            }
        }
    }

    /// One round of value iteration: evaluate, then improve.
    pub fn sweep(&mut self) -> Result<(), AgentError> {
        self.evaluate_policy();
        self.update_policy();
        for &v in &self.v {
            AgentError::check_finite("DP", "state value", v)?;
        }
        tracing::debug!(
            mean_value = self.v.iter().sum::<f64>() / self.ns.max(1) as f64,
            "value iteration sweep"
        );
        Ok(())
    }
}

impl<E: Environment> Agent for DpAgent<E> {
    fn name(&self) -> &'static str {
        "DP"
    }

    fn observation_kind(&self) -> ObservationKind {
        ObservationKind::StateIndex
    }

    fn act(&mut self, observation: &Observation) -> Result<Action, AgentError> {
        let s = observation.state_index(self.name())?;
        Ok(Action::Discrete(self.select_action(s)))
    }

    /// The reward is not used; each call performs one sweep.
    fn learn(&mut self, _reward: f64) -> Result<(), AgentError> {
        self.sweep()
    }

    fn save_state(&self) -> Result<AgentState, AgentError> {
        AgentState::new(
            self.name(),
            &DpSnapshot {
                v: self.v.clone(),
                p: self.p.clone(),
            },
        )
    }

    fn load_state(&mut self, state: AgentState) -> Result<(), AgentError> {
        let snap: DpSnapshot = state.decode(self.name())?;
        if snap.v.len() != self.ns || snap.p.len() != self.ns * self.na {
            return Err(AgentError::StateMismatch {
                expected: format!("{} states x {} actions", self.ns, self.na),
                found: format!("{} values, {} policy entries", snap.v.len(), snap.p.len()),
            });
        }
        self.v = snap.v;
        self.p = snap.p;
        Ok(())
    }
}
