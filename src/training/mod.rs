//! Training infrastructure: the episode runner, replay memory and metrics
//! collection.

pub mod metrics;
pub mod replay_buffer;
pub mod runner;
