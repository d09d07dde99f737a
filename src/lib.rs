//! # ML Reinforce
//!
//! Reinforcement learning and neuroevolution on a small reverse-mode
//! autodiff engine over dense `f64` matrices.
//!
//! ## Modules
//!
//! - [`autodiff`]: Tensors, parameter models, the recording graph and the RMSProp solver
//! - [`env`]: Environment contract and the `Corridor` reference world
//! - [`ai`]: Agent trait and algorithms (DP, TD, DQN, REINFORCE, DPG), networks
//! - [`evolution`]: Genetic algorithm and enforced sub-populations
//! - [`training`]: Episode runner, replay memory, metrics collection
//! - [`checkpoint`]: Agent state persistence and retention
//! - [`session`]: Typed init/act/learn/load/save/stop command dispatch
//! - [`config`]: TOML configuration loading and validation
//! - [`error`]: Structured error types

pub mod ai;
pub mod autodiff;
pub mod checkpoint;
pub mod config;
pub mod env;
pub mod error;
pub mod evolution;
pub mod session;
pub mod training;
