//! Network builders over the autodiff tape.

mod lstm;
mod mlp;

pub use lstm::{LstmConfig, LstmState, LstmStep};
pub use mlp::MlpConfig;
