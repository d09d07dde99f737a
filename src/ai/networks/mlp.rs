use rand::Rng;

use crate::autodiff::{Graph, Model, NodeId, Tensor};

/// Two-layer network with a tanh hidden layer and a linear output.
///
/// ```text
/// Input:  [input_size x 1]
/// Hidden: tanh(W1 x + b1)   W1: hidden_size x input_size
/// Output: W2 h + b2         W2: output_size x hidden_size
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MlpConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,
    pub hidden_std: f64,
    pub output_std: f64,
}

impl MlpConfig {
    pub fn new(input_size: usize, hidden_size: usize, output_size: usize) -> Self {
        MlpConfig {
            input_size,
            hidden_size,
            output_size,
            hidden_std: 0.01,
            output_std: 0.01,
        }
    }

    pub fn with_output_std(mut self, std: f64) -> Self {
        self.output_std = std;
        self
    }

    /// Gaussian weights, zero biases. Parameters are declared W1, b1, W2, b2.
    pub fn init<R: Rng + ?Sized>(&self, rng: &mut R) -> Model {
        let mut model = Model::new();
        model.insert(
            "W1",
            Tensor::random_normal(self.hidden_size, self.input_size, 0.0, self.hidden_std, rng),
        );
        model.insert("b1", Tensor::zeros(self.hidden_size, 1));
        model.insert(
            "W2",
            Tensor::random_normal(self.output_size, self.hidden_size, 0.0, self.output_std, rng),
        );
        model.insert("b2", Tensor::zeros(self.output_size, 1));
        model
    }

    /// Append the forward pass for input node `x` to `g`.
    pub fn forward(g: &mut Graph, model: &Model, x: NodeId) -> NodeId {
        let w1 = g.param(model, "W1");
        let b1 = g.param(model, "b1");
        let w2 = g.param(model, "W2");
        let b2 = g.param(model, "b2");
        let a1 = g.mul(w1, x);
        let a1 = g.add(a1, b1);
        let h1 = g.tanh(a1);
        let a2 = g.mul(w2, h1);
        g.add(a2, b2)
    }

    /// Non-recording forward pass on a feature vector.
    pub fn predict(model: &Model, features: &[f64]) -> Vec<f64> {
        let mut g = Graph::new(false);
        let x = g.input(Tensor::column(features));
        let out = Self::forward(&mut g, model, x);
        g.value(out).w.clone()
    }
}
