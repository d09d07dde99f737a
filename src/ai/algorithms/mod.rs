mod dp;
mod dpg;
mod dqn;
mod recurrent_reinforce;
mod reinforce;
mod td;

pub use dp::{DpAgent, DpConfig};
pub use dpg::{DpgAgent, DpgConfig};
pub use dqn::{DqnAgent, DqnConfig, Experience};
pub use recurrent_reinforce::RecurrentReinforceAgent;
pub use reinforce::{ReinforceAgent, ReinforceConfig};
pub use td::{TdAgent, TdConfig, TdUpdate};
