//! Gradient-free optimizers: a conventional genetic algorithm over a flat
//! parameter vector, and enforced sub-populations (ESP) for co-evolving the
//! recurrent sub-networks of an [`EspNet`].

pub mod chromosome;
pub mod esp;
pub mod ga;
pub mod network;

pub use chromosome::Chromosome;
pub use esp::{EspConfig, EspNet, EspTrainer};
pub use ga::{GaConfig, GaTrainer};
pub use network::{randomize_network, Activation, FeedForwardNet, Genome, Layer};
