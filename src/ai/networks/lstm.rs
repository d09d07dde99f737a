use rand::Rng;

use crate::autodiff::{Graph, Model, NodeId, Tensor};

const INIT_STD: f64 = 0.08;

/// Stacked LSTM with a linear decoder on the last hidden layer.
///
/// Layer `d` declares input, forget, output and cell-write gates, each with
/// an input weight `W?x{d}`, a recurrent weight `W?h{d}` and a bias `b?{d}`.
/// The decoder is `Whd`, `bd`.
#[derive(Debug, Clone, PartialEq)]
pub struct LstmConfig {
    pub input_size: usize,
    pub hidden_sizes: Vec<usize>,
    pub output_size: usize,
}

/// Hidden and cell nodes for every layer after one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct LstmState {
    pub hidden: Vec<NodeId>,
    pub cell: Vec<NodeId>,
}

/// Result of one tick: the carried state plus the decoded output.
#[derive(Debug, Clone, PartialEq)]
pub struct LstmStep {
    pub state: LstmState,
    pub output: NodeId,
}

impl LstmConfig {
    pub fn new(input_size: usize, hidden_sizes: Vec<usize>, output_size: usize) -> Self {
        assert!(!hidden_sizes.is_empty(), "LSTM needs at least one hidden layer");
        LstmConfig {
            input_size,
            hidden_sizes,
            output_size,
        }
    }

    pub fn init<R: Rng + ?Sized>(&self, rng: &mut R) -> Model {
        let mut model = Model::new();
        for (d, &hidden) in self.hidden_sizes.iter().enumerate() {
            let prev = if d == 0 {
                self.input_size
            } else {
                self.hidden_sizes[d - 1]
            };
            for gate in ["i", "f", "o", "c"] {
                model.insert(
                    format!("W{}x{}", gate, d),
                    Tensor::random_normal(hidden, prev, 0.0, INIT_STD, rng),
                );
                model.insert(
                    format!("W{}h{}", gate, d),
                    Tensor::random_normal(hidden, hidden, 0.0, INIT_STD, rng),
                );
                model.insert(format!("b{}{}", gate, d), Tensor::zeros(hidden, 1));
            }
        }
        let last = self.hidden_sizes[self.hidden_sizes.len() - 1];
        model.insert(
            "Whd",
            Tensor::random_normal(self.output_size, last, 0.0, INIT_STD, rng),
        );
        model.insert("bd", Tensor::zeros(self.output_size, 1));
        model
    }

    /// gate = act(Wx * x + Wh * h + b)
    fn gate(
        g: &mut Graph,
        model: &Model,
        name: &str,
        d: usize,
        x: NodeId,
        h: NodeId,
    ) -> NodeId {
        let wx = g.param(model, &format!("W{}x{}", name, d));
        let wh = g.param(model, &format!("W{}h{}", name, d));
        let b = g.param(model, &format!("b{}{}", name, d));
        let a = g.mul(wx, x);
        let r = g.mul(wh, h);
        let s = g.add(a, r);
        let s = g.add(s, b);
        if name == "c" {
            g.tanh(s)
        } else {
            g.sigmoid(s)
        }
    }

    /// Run one tick on input node `x`. Without a previous state the hidden
    /// and cell vectors start at zero.
    pub fn forward(
        &self,
        g: &mut Graph,
        model: &Model,
        x: NodeId,
        prev: Option<&LstmState>,
    ) -> LstmStep {
        let (hidden_prev, cell_prev) = match prev {
            Some(state) => (state.hidden.clone(), state.cell.clone()),
            None => {
                let h = self
                    .hidden_sizes
                    .iter()
                    .map(|&n| g.input(Tensor::zeros(n, 1)))
                    .collect();
                let c = self
                    .hidden_sizes
                    .iter()
                    .map(|&n| g.input(Tensor::zeros(n, 1)))
                    .collect();
                (h, c)
            }
        };

        let mut hidden: Vec<NodeId> = Vec::with_capacity(self.hidden_sizes.len());
        let mut cell = Vec::with_capacity(self.hidden_sizes.len());
        for d in 0..self.hidden_sizes.len() {
            let input = if d == 0 { x } else { hidden[d - 1] };
            let hp = hidden_prev[d];

            let input_gate = Self::gate(g, model, "i", d, input, hp);
            let forget_gate = Self::gate(g, model, "f", d, input, hp);
            let output_gate = Self::gate(g, model, "o", d, input, hp);
            let cell_write = Self::gate(g, model, "c", d, input, hp);

            let retain = g.eltmul(forget_gate, cell_prev[d]);
            let write = g.eltmul(input_gate, cell_write);
            let cell_d = g.add(retain, write);
            let squashed = g.tanh(cell_d);
            let hidden_d = g.eltmul(output_gate, squashed);

            hidden.push(hidden_d);
            cell.push(cell_d);
        }

        let whd = g.param(model, "Whd");
        let bd = g.param(model, "bd");
        let last = hidden[hidden.len() - 1];
        let decoded = g.mul(whd, last);
        let output = g.add(decoded, bd);

        LstmStep {
            state: LstmState { hidden, cell },
            output,
        }
    }
}
