use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::autodiff::sigmoid;
use crate::evolution::chromosome::Chromosome;

/// A parameter container that can be written from and read back as a flat
/// gene. The traversal order is fixed per implementation.
pub trait Genome {
    fn gene_len(&self) -> usize;

    /// Overwrite every parameter from `gene`, which must be `gene_len` long.
    fn push_gene(&mut self, gene: &[f64]);

    fn gene(&self) -> Vec<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    Linear,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => sigmoid(x),
            Activation::Tanh => x.tanh(),
            Activation::Linear => x,
        }
    }
}

/// Fully connected layer; `weights` is `outputs x inputs`, one neuron's
/// incoming weights per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub inputs: usize,
    pub outputs: usize,
    pub weights: Vec<f64>,
    pub biases: Vec<f64>,
    pub activation: Activation,
}

/// Small feed-forward network evolved rather than trained by gradient.
///
/// Gene order: for each layer, every neuron's weights, then that layer's
/// biases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedForwardNet {
    pub input_size: usize,
    pub layers: Vec<Layer>,
}

impl FeedForwardNet {
    /// Zero-initialized network; `layers` lists `(neurons, activation)`.
    pub fn new(input_size: usize, layers: &[(usize, Activation)]) -> Self {
        let mut inputs = input_size;
        let layers = layers
            .iter()
            .map(|&(outputs, activation)| {
                let layer = Layer {
                    inputs,
                    outputs,
                    weights: vec![0.0; outputs * inputs],
                    biases: vec![0.0; outputs],
                    activation,
                };
                inputs = outputs;
                layer
            })
            .collect();
        FeedForwardNet { input_size, layers }
    }

    /// 1 -> 12 relu -> 8 sigmoid -> 1 linear.
    pub fn ga_default() -> Self {
        Self::new(
            1,
            &[
                (12, Activation::Relu),
                (8, Activation::Sigmoid),
                (1, Activation::Linear),
            ],
        )
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(self.input_size, |l| l.outputs)
    }

    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        assert_eq!(
            input.len(),
            self.input_size,
            "network expects {} inputs, got {}",
            self.input_size,
            input.len()
        );
        let mut x = input.to_vec();
        for layer in &self.layers {
            x = (0..layer.outputs)
                .map(|j| {
                    let row = &layer.weights[j * layer.inputs..(j + 1) * layer.inputs];
                    let z: f64 = row.iter().zip(&x).map(|(w, v)| w * v).sum();
                    layer.activation.apply(z + layer.biases[j])
                })
                .collect();
        }
        x
    }
}

impl Genome for FeedForwardNet {
    fn gene_len(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.weights.len() + l.biases.len())
            .sum()
    }

    fn push_gene(&mut self, gene: &[f64]) {
        assert_eq!(gene.len(), self.gene_len(), "gene length mismatch");
        let mut values = gene.iter().copied();
        for layer in self.layers.iter_mut() {
            for (w, v) in layer.weights.iter_mut().zip(values.by_ref()) {
                *w = v;
            }
            for (b, v) in layer.biases.iter_mut().zip(values.by_ref()) {
                *b = v;
            }
        }
    }

    fn gene(&self) -> Vec<f64> {
        self.layers
            .iter()
            .flat_map(|l| l.weights.iter().chain(l.biases.iter()).copied())
            .collect()
    }
}

/// Fill `net` with N(0, 1) parameters and return the gene used.
pub fn randomize_network<G: Genome, R: Rng + ?Sized>(net: &mut G, rng: &mut R) -> Chromosome {
    let mut chromosome = Chromosome::zeros(net.gene_len());
    chromosome.randomize(rng, 1.0);
    net.push_gene(&chromosome.gene);
    chromosome
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_ga_default_size() {
        let net = FeedForwardNet::ga_default();
        assert_eq!(net.gene_len(), (12 + 12) + (8 * 12 + 8) + (8 + 1));
        assert_eq!(net.forward(&[0.3]).len(), 1);
    }

    #[test]
    fn test_gene_roundtrip_order() {
        let mut net = FeedForwardNet::new(2, &[(2, Activation::Linear)]);
        net.push_gene(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(net.layers[0].weights, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(net.layers[0].biases, vec![5.0, 6.0]);
        assert_eq!(net.gene(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        // rows are neurons
        assert_eq!(net.forward(&[1.0, 1.0]), vec![8.0, 13.0]);
    }

    #[test]
    fn test_activations() {
        let mut net = FeedForwardNet::new(1, &[(1, Activation::Relu)]);
        net.push_gene(&[1.0, 0.0]);
        assert_eq!(net.forward(&[-2.0]), vec![0.0]);
        let mut net = FeedForwardNet::new(1, &[(1, Activation::Sigmoid)]);
        net.push_gene(&[0.0, 0.0]);
        assert_eq!(net.forward(&[5.0]), vec![0.5]);
        let mut net = FeedForwardNet::new(1, &[(1, Activation::Tanh)]);
        net.push_gene(&[1.0, 0.0]);
        assert!((net.forward(&[0.5])[0] - 0.5f64.tanh()).abs() < 1e-15);
    }

    #[test]
    fn test_randomize_network_pushes_gene() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut net = FeedForwardNet::ga_default();
        let c = randomize_network(&mut net, &mut rng);
        assert_eq!(net.gene(), c.gene);
    }
}
