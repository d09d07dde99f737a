mod agent;
pub mod algorithms;
pub mod networks;
pub mod sampling;
pub mod state_encoding;

pub use agent::{Action, Agent, AgentState, Observation, ObservationKind};
pub use algorithms::{
    DpAgent, DpConfig, DpgAgent, DpgConfig, DqnAgent, DqnConfig, Experience,
    RecurrentReinforceAgent, ReinforceAgent, ReinforceConfig, TdAgent, TdConfig, TdUpdate,
};
