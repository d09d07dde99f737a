use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ai::agent::{Action, Agent, AgentState, Observation, ObservationKind};
use crate::ai::sampling::{make_rng, sample_weighted};
use crate::env::{check_allowed_actions, Environment};
use crate::error::AgentError;

/// Updates smaller than this are treated as no change.
const MIN_UPDATE: f64 = 1e-5;

/// Bootstrap rule used for the TD target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TdUpdate {
    /// Off-policy: bootstrap from the best next action.
    Qlearn,
    /// On-policy: bootstrap from the next action actually taken.
    Sarsa,
}

/// Tabular TD hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TdConfig {
    pub update: TdUpdate,
    pub gamma: f64,
    pub epsilon: f64,
    pub alpha: f64,
    /// Nudge the policy toward the greedy target at rate `beta` instead of
    /// replacing it outright.
    pub smooth_policy_update: bool,
    pub beta: f64,
    /// Eligibility trace decay; 0 disables traces.
    pub lambda: f64,
    pub replacing_traces: bool,
    pub q_init_val: f64,
    /// Planning backups per learning step; 0 disables planning.
    pub plan_n: usize,
    pub seed: Option<u64>,
}

impl Default for TdConfig {
    fn default() -> Self {
        TdConfig {
            update: TdUpdate::Qlearn,
            gamma: 0.75,
            epsilon: 0.1,
            alpha: 0.01,
            smooth_policy_update: false,
            beta: 0.01,
            lambda: 0.0,
            replacing_traces: true,
            q_init_val: 0.0,
            plan_n: 0,
            seed: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TdSnapshot {
    ns: usize,
    na: usize,
    q: Vec<f64>,
    p: Vec<f64>,
    env_model_s: Vec<Option<usize>>,
    env_model_r: Vec<f64>,
    sa_seen: Vec<usize>,
    pq: Vec<f64>,
}

impl TdSnapshot {
    /// First table whose shape or indices do not fit `ns * na`.
    fn malformed_table(&self) -> Option<&'static str> {
        let n = self.ns * self.na;
        if self.q.len() != n {
            Some("q")
        } else if self.p.len() != n {
            Some("p")
        } else if self.env_model_r.len() != n {
            Some("env_model_r")
        } else if self.pq.len() != n {
            Some("pq")
        } else if self.env_model_s.len() != n
            || self.env_model_s.iter().flatten().any(|&s| s >= self.ns)
        {
            Some("env_model_s")
        } else if self.sa_seen.iter().any(|&sa| sa >= n) {
            Some("sa_seen")
        } else {
            None
        }
    }
}

/// Tabular Q-learning / SARSA agent with optional eligibility traces and
/// prioritized-sweeping planning over a learned deterministic model.
///
/// All tables are `ns * na` long and indexed action-major (`a * ns + s`).
/// Behaviour is epsilon-greedy over the separate policy table `P`.
pub struct TdAgent<E> {
    env: E,
    config: TdConfig,
    ns: usize,
    na: usize,
    q: Vec<f64>,
    p: Vec<f64>,
    e: Vec<f64>,
    env_model_s: Vec<Option<usize>>,
    env_model_r: Vec<f64>,
    sa_seen: Vec<usize>,
    pq: Vec<f64>,
    explored: bool,
    r0: Option<f64>,
    s0: Option<usize>,
    a0: Option<usize>,
    s1: Option<usize>,
    a1: Option<usize>,
    last_td_error: Option<f64>,
    rng: StdRng,
}

impl<E: Environment> TdAgent<E> {
    pub fn new(env: E, config: TdConfig) -> Result<Self, AgentError> {
        check_allowed_actions(&env)?;
        let rng = make_rng(config.seed);
        let mut agent = TdAgent {
            ns: env.num_states(),
            na: env.max_num_actions(),
            env,
            config,
            q: Vec::new(),
            p: Vec::new(),
            e: Vec::new(),
            env_model_s: Vec::new(),
            env_model_r: Vec::new(),
            sa_seen: Vec::new(),
            pq: Vec::new(),
            explored: false,
            r0: None,
            s0: None,
            a0: None,
            s1: None,
            a1: None,
            last_td_error: None,
            rng,
        };
        agent.reset();
        Ok(agent)
    }

    /// Reset tables, learned model and one-step memory.
    pub fn reset(&mut self) {
        let n = self.ns * self.na;
        self.q = vec![self.config.q_init_val; n];
        self.p = vec![0.0; n];
        self.e = vec![0.0; n];
        self.env_model_s = vec![None; n];
        self.env_model_r = vec![0.0; n];
        self.sa_seen.clear();
        self.pq = vec![0.0; n];
        for s in 0..self.ns {
            let poss = self.env.allowed_actions(s);
            let prob = 1.0 / poss.len() as f64;
            for a in poss {
                self.p[a * self.ns + s] = prob;
            }
        }
        self.clear_memory();
    }

    fn clear_memory(&mut self) {
        self.r0 = None;
        self.s0 = None;
        self.a0 = None;
        self.s1 = None;
        self.a1 = None;
        self.explored = false;
    }

    pub fn q(&self, s: usize, a: usize) -> f64 {
        self.q[a * self.ns + s]
    }

    pub fn policy(&self, s: usize, a: usize) -> f64 {
        self.p[a * self.ns + s]
    }

    pub fn trace(&self, s: usize, a: usize) -> f64 {
        self.e[a * self.ns + s]
    }

    pub fn priority(&self, s: usize, a: usize) -> f64 {
        self.pq[a * self.ns + s]
    }

    /// Allowed action with the highest Q value, first on ties.
    pub fn greedy_action(&self, s: usize) -> usize {
        let poss = self.env.allowed_actions(s);
        let mut best = poss[0];
        for &a in &poss[1..] {
            if self.q(s, a) > self.q(s, best) {
                best = a;
            }
        }
        best
    }

    /// Epsilon-greedy draw over `P`, shifting the one-step memory.
    pub fn select_action(&mut self, s: usize) -> usize {
        let poss = self.env.allowed_actions(s);
        let a = if self.rng.random::<f64>() < self.config.epsilon {
            self.explored = true;
            poss[self.rng.random_range(0..poss.len())]
        } else {
            self.explored = false;
            let probs: Vec<f64> = poss.iter().map(|&a| self.p[a * self.ns + s]).collect();
            poss[sample_weighted(&mut self.rng, &probs)]
        };
        self.s0 = self.s1;
        self.a0 = self.a1;
        self.s1 = Some(s);
        self.a1 = Some(a);
        a
    }

    /// Record the observed transition `(s0, a0) -> (r0, s1)`.
    fn update_model(&mut self, s0: usize, a0: usize, r0: f64, s1: usize) {
        let sa = a0 * self.ns + s0;
        if self.env_model_s[sa].is_none() {
            self.sa_seen.push(sa);
        }
        self.env_model_s[sa] = Some(s1);
        self.env_model_r[sa] = r0;
    }

    /// Back up the highest-priority remembered transitions.
    fn plan(&mut self) -> Result<(), AgentError> {
        let mut spq: Vec<(usize, f64)> = self
            .sa_seen
            .iter()
            .map(|&sa| (sa, self.pq[sa]))
            .filter(|&(_, p)| p > MIN_UPDATE)
            .collect();
        spq.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let n_steps = self.config.plan_n.min(spq.len());
        for &(s0a0, _) in spq.iter().take(n_steps) {
            let Some(s1) = self.env_model_s[s0a0] else {
                continue;
            };
            let s0 = s0a0 % self.ns;
            let a0 = s0a0 / self.ns;
            let r0 = self.env_model_r[s0a0];
            self.pq[s0a0] = 0.0;

            // q-learning ignores the next action
            let a1 = match self.config.update {
                TdUpdate::Sarsa => {
                    let poss = self.env.allowed_actions(s1);
                    poss[self.rng.random_range(0..poss.len())]
                }
                TdUpdate::Qlearn => 0,
            };
            self.learn_from_tuple(s0, a0, r0, s1, a1, 0.0)?;
        }
        Ok(())
    }

    fn td_target(&self, r0: f64, s1: usize, a1: usize) -> f64 {
        match self.config.update {
            TdUpdate::Qlearn => {
                let q_max = self
                    .env
                    .allowed_actions(s1)
                    .iter()
                    .map(|&a| self.q[a * self.ns + s1])
                    .fold(f64::NEG_INFINITY, f64::max);
                r0 + self.config.gamma * q_max
            }
            TdUpdate::Sarsa => r0 + self.config.gamma * self.q[a1 * self.ns + s1],
        }
    }

    fn learn_from_tuple(
        &mut self,
        s0: usize,
        a0: usize,
        r0: f64,
        s1: usize,
        a1: usize,
        lambda: f64,
    ) -> Result<(), AgentError> {
        let sa = a0 * self.ns + s0;
        let target = self.td_target(r0, s1, a1);
        AgentError::check_finite("TD", "td target", target)?;
        self.last_td_error = Some(target - self.q[sa]);

        if lambda > 0.0 {
            if self.config.replacing_traces {
                self.e[sa] = 1.0;
            } else {
                self.e[sa] += 1.0;
            }
            let e_decay = lambda * self.config.gamma;
            let mut state_update = vec![0.0; self.ns];
            for s in 0..self.ns {
                for a in self.env.allowed_actions(s) {
                    let sa_loop = a * self.ns + s;
                    let update = self.config.alpha * self.e[sa_loop] * (target - self.q[sa_loop]);
                    self.q[sa_loop] += update;
                    self.update_priority(s, update);
                    self.e[sa_loop] *= e_decay;
                    state_update[s] = f64::max(state_update[s], update.abs());
                }
            }
            for (s, &u) in state_update.iter().enumerate() {
                if u > MIN_UPDATE {
                    self.update_policy(s);
                }
            }
            if self.explored && self.config.update == TdUpdate::Qlearn {
                // traces are invalid for an off-policy learner after exploring
                self.e.iter_mut().for_each(|e| *e = 0.0);
            }
        } else {
            let update = self.config.alpha * (target - self.q[sa]);
            self.q[sa] += update;
            self.update_priority(s0, update);
            self.update_policy(s0);
        }
        AgentError::check_finite("TD", "q value", self.q[sa])
    }

    /// Raise the priority of every remembered pair that leads into `s`.
    fn update_priority(&mut self, s: usize, update: f64) {
        let u = update.abs();
        if u < MIN_UPDATE || self.config.plan_n == 0 {
            return;
        }
        for (sa, next) in self.env_model_s.iter().enumerate() {
            if *next == Some(s) {
                self.pq[sa] += u;
            }
        }
    }

    /// Move the policy at `s` toward an even split over the maximizing actions.
    fn update_policy(&mut self, s: usize) {
        let poss = self.env.allowed_actions(s);
        let qs: Vec<f64> = poss.iter().map(|&a| self.q[a * self.ns + s]).collect();
        let q_max = qs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let n_max = qs.iter().filter(|&&q| q == q_max).count() as f64;

        let mut p_sum = 0.0;
        for (&a, &q) in poss.iter().zip(qs.iter()) {
            let target = if q == q_max { 1.0 / n_max } else { 0.0 };
            let ix = a * self.ns + s;
            if self.config.smooth_policy_update {
                self.p[ix] += self.config.beta * (target - self.p[ix]);
                p_sum += self.p[ix];
            } else {
                self.p[ix] = target;
            }
        }
        if self.config.smooth_policy_update {
            for &a in &poss {
                self.p[a * self.ns + s] /= p_sum;
            }
        }
    }
}

impl<E: Environment> Agent for TdAgent<E> {
    fn name(&self) -> &'static str {
        "TD"
    }

    fn observation_kind(&self) -> ObservationKind {
        ObservationKind::StateIndex
    }

    fn act(&mut self, observation: &Observation) -> Result<Action, AgentError> {
        let s = observation.state_index(self.name())?;
        Ok(Action::Discrete(self.select_action(s)))
    }

    fn learn(&mut self, reward: f64) -> Result<(), AgentError> {
        if let (Some(r0), Some(s0), Some(a0), Some(s1), Some(a1)) =
            (self.r0, self.s0, self.a0, self.s1, self.a1)
        {
            self.learn_from_tuple(s0, a0, r0, s1, a1, self.config.lambda)?;
            if self.config.plan_n > 0 {
                self.update_model(s0, a0, r0, s1);
                self.plan()?;
            }
        }
        self.r0 = Some(reward);
        Ok(())
    }

    /// Forget the one-step memory and traces so the next episode does not
    /// bootstrap from this one.
    fn reset_episode(&mut self) {
        self.clear_memory();
        self.e.iter_mut().for_each(|e| *e = 0.0);
    }

    fn last_td_error(&self) -> Option<f64> {
        self.last_td_error
    }

    fn save_state(&self) -> Result<AgentState, AgentError> {
        AgentState::new(
            self.name(),
            &TdSnapshot {
                ns: self.ns,
                na: self.na,
                q: self.q.clone(),
                p: self.p.clone(),
                env_model_s: self.env_model_s.clone(),
                env_model_r: self.env_model_r.clone(),
                sa_seen: self.sa_seen.clone(),
                pq: self.pq.clone(),
            },
        )
    }

    fn load_state(&mut self, state: AgentState) -> Result<(), AgentError> {
        let snap: TdSnapshot = state.decode(self.name())?;
        if snap.ns != self.ns || snap.na != self.na {
            return Err(AgentError::StateMismatch {
                expected: format!("{} states x {} actions", self.ns, self.na),
                found: format!("{} states x {} actions", snap.ns, snap.na),
            });
        }
        if let Some(table) = snap.malformed_table() {
            return Err(AgentError::StateMismatch {
                expected: format!("{} entries per table", self.ns * self.na),
                found: format!("malformed {table} table"),
            });
        }
        self.q = snap.q;
        self.p = snap.p;
        self.env_model_s = snap.env_model_s;
        self.env_model_r = snap.env_model_r;
        self.sa_seen = snap.sa_seen;
        self.pq = snap.pq;
        self.e = vec![0.0; self.ns * self.na];
        self.clear_memory();
        Ok(())
    }
}
