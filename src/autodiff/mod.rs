//! Dense matrices, an arena-backed reverse-mode tape, and the adaptive
//! solver that consumes its gradients.

pub mod graph;
pub mod model;
pub mod solver;
pub mod tensor;

pub use graph::{sigmoid, softmax, Graph, NodeId, Op};
pub use model::Model;
pub use solver::Solver;
pub use tensor::{Tensor, TensorRecord};
