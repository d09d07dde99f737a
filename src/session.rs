//! Request/response command loop around a single agent.
//!
//! The transport (stdin, a socket, a browser bridge) belongs to the caller;
//! a [`Session`] only turns typed [`Command`]s into [`Response`]s, one at a
//! time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ai::algorithms::{
    DpAgent, DpgAgent, DqnAgent, RecurrentReinforceAgent, ReinforceAgent, TdAgent,
};
use crate::ai::{Action, Agent, AgentState, Observation};
use crate::config::AppConfig;
use crate::env::Environment;
use crate::error::SessionError;

/// Agents a session can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Dp,
    Td,
    Dqn,
    Reinforce,
    RecurrentReinforce,
    Dpg,
}

impl Algorithm {
    pub const ALL: [Algorithm; 6] = [
        Algorithm::Dp,
        Algorithm::Td,
        Algorithm::Dqn,
        Algorithm::Reinforce,
        Algorithm::RecurrentReinforce,
        Algorithm::Dpg,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Dp => "dp",
            Algorithm::Td => "td",
            Algorithm::Dqn => "dqn",
            Algorithm::Reinforce => "reinforce",
            Algorithm::RecurrentReinforce => "recurrent_reinforce",
            Algorithm::Dpg => "dpg",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown algorithm '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Build a fresh agent, replacing any current one.
    Init { algorithm: Algorithm },
    Act(Observation),
    Learn(f64),
    Load(AgentState),
    Save,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Ready,
    Action(Action),
    State(AgentState),
    Stopped,
}

pub struct Session<E> {
    env: E,
    config: AppConfig,
    agent: Option<Box<dyn Agent>>,
    stopped: bool,
}

impl<E: Environment + Clone + 'static> Session<E> {
    pub fn new(env: E, config: AppConfig) -> Self {
        Session {
            env,
            config,
            agent: None,
            stopped: false,
        }
    }

    pub fn agent(&self) -> Option<&dyn Agent> {
        self.agent.as_deref()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn handle(&mut self, command: Command) -> Result<Response, SessionError> {
        if self.stopped {
            return Err(SessionError::Stopped);
        }
        match command {
            Command::Init { algorithm } => {
                self.agent = Some(self.build(algorithm)?);
                tracing::debug!(%algorithm, "agent initialized");
                Ok(Response::Ready)
            }
            Command::Act(observation) => {
                let action = self.agent_mut()?.act(&observation)?;
                Ok(Response::Action(action))
            }
            Command::Learn(reward) => {
                self.agent_mut()?.learn(reward)?;
                Ok(Response::Ready)
            }
            Command::Load(state) => {
                self.agent_mut()?.load_state(state)?;
                Ok(Response::Ready)
            }
            Command::Save => {
                let agent = self.agent.as_deref().ok_or(SessionError::NotInitialized)?;
                Ok(Response::State(agent.save_state()?))
            }
            Command::Stop => {
                self.stopped = true;
                self.agent = None;
                Ok(Response::Stopped)
            }
        }
    }

    fn agent_mut(&mut self) -> Result<&mut (dyn Agent + 'static), SessionError> {
        self.agent.as_deref_mut().ok_or(SessionError::NotInitialized)
    }

    fn build(&self, algorithm: Algorithm) -> Result<Box<dyn Agent>, SessionError> {
        let ns = self.env.num_states();
        let na = self.env.max_num_actions();
        let c = &self.config;
        let agent: Box<dyn Agent> = match algorithm {
            Algorithm::Dp => Box::new(DpAgent::new(self.env.clone(), c.dp.clone())?),
            Algorithm::Td => Box::new(TdAgent::new(self.env.clone(), c.td.clone())?),
            Algorithm::Dqn => Box::new(DqnAgent::new(ns, na, c.dqn.clone())),
            Algorithm::Reinforce => Box::new(ReinforceAgent::new(ns, na, c.reinforce.clone())),
            Algorithm::RecurrentReinforce => Box::new(RecurrentReinforceAgent::new(
                ns,
                na,
                c.recurrent_reinforce.clone(),
            )),
            Algorithm::Dpg => Box::new(DpgAgent::new(ns, na, c.dpg.clone())),
        };
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Corridor;
    use crate::error::AgentError;

    fn seeded_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.td.seed = Some(1);
        config.dp.seed = Some(1);
        config.dqn.seed = Some(1);
        config.reinforce.seed = Some(1);
        config.recurrent_reinforce.seed = Some(1);
        config.dpg.seed = Some(1);
        config
    }

    #[test]
    fn test_algorithm_names_roundtrip() {
        for a in Algorithm::ALL {
            assert_eq!(a.to_string().parse::<Algorithm>(), Ok(a));
        }
        assert!("sarsa".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_commands_before_init_fail() {
        let mut session = Session::new(Corridor::new(4), seeded_config());
        let err = session.handle(Command::Learn(1.0)).unwrap_err();
        assert!(matches!(err, SessionError::NotInitialized));
        assert!(matches!(
            session.handle(Command::Save),
            Err(SessionError::NotInitialized)
        ));
    }

    #[test]
    fn test_every_algorithm_initializes_and_acts() {
        let env = Corridor::new(4);
        for algorithm in Algorithm::ALL {
            let mut session = Session::new(env, seeded_config());
            assert_eq!(
                session.handle(Command::Init { algorithm }).unwrap(),
                Response::Ready
            );
            let kind = session.agent().unwrap().observation_kind();
            let obs = crate::ai::state_encoding::observe(0, 4, kind);
            let response = session.handle(Command::Act(obs)).unwrap();
            assert!(matches!(response, Response::Action(_)), "{algorithm}");
            session.handle(Command::Learn(0.0)).unwrap();
        }
    }

    #[test]
    fn test_wrong_observation_surfaces_agent_error() {
        let mut session = Session::new(Corridor::new(4), seeded_config());
        session
            .handle(Command::Init {
                algorithm: Algorithm::Dqn,
            })
            .unwrap();
        let err = session.handle(Command::Act(Observation::State(0))).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Agent(AgentError::UnsupportedObservation { agent: "DQN", .. })
        ));
    }

    #[test]
    fn test_save_then_load_into_fresh_agent() {
        let mut session = Session::new(Corridor::new(4), seeded_config());
        session
            .handle(Command::Init {
                algorithm: Algorithm::Td,
            })
            .unwrap();
        session.handle(Command::Act(Observation::State(2))).unwrap();
        session.handle(Command::Learn(1.0)).unwrap();
        let Response::State(state) = session.handle(Command::Save).unwrap() else {
            panic!("expected saved state");
        };

        session
            .handle(Command::Init {
                algorithm: Algorithm::Td,
            })
            .unwrap();
        assert_eq!(session.handle(Command::Load(state.clone())).unwrap(), Response::Ready);
        assert_eq!(session.handle(Command::Save).unwrap(), Response::State(state));
    }

    #[test]
    fn test_load_rejects_foreign_state() {
        let mut session = Session::new(Corridor::new(4), seeded_config());
        session
            .handle(Command::Init {
                algorithm: Algorithm::Dp,
            })
            .unwrap();
        let Response::State(dp_state) = session.handle(Command::Save).unwrap() else {
            panic!("expected saved state");
        };
        session
            .handle(Command::Init {
                algorithm: Algorithm::Td,
            })
            .unwrap();
        let err = session.handle(Command::Load(dp_state)).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Agent(AgentError::StateMismatch { .. })
        ));
    }

    #[test]
    fn test_stop_ends_session() {
        let mut session = Session::new(Corridor::new(4), seeded_config());
        assert_eq!(session.handle(Command::Stop).unwrap(), Response::Stopped);
        assert!(session.is_stopped());
        assert!(matches!(
            session.handle(Command::Init {
                algorithm: Algorithm::Td
            }),
            Err(SessionError::Stopped)
        ));
    }
}
