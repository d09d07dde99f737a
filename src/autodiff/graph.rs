use super::model::Model;
use super::tensor::Tensor;

/// Handle to a tensor living in a [`Graph`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A single recorded forward operation.
///
/// Records are appended in execution order, so replaying them back to front
/// visits every node after all of its consumers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    /// out = row `ix` of `input`, as a column vector
    RowPluck { input: NodeId, ix: usize, out: NodeId },
    Tanh { input: NodeId, out: NodeId },
    Sigmoid { input: NodeId, out: NodeId },
    Relu { input: NodeId, out: NodeId },
    /// out = a * b (matrix product)
    Mul { a: NodeId, b: NodeId, out: NodeId },
    Add { a: NodeId, b: NodeId, out: NodeId },
    /// out (1x1) = sum(a .* b)
    Dot { a: NodeId, b: NodeId, out: NodeId },
    /// out = a .* b
    EltMul { a: NodeId, b: NodeId, out: NodeId },
}

/// Reverse-mode autodiff tape over dense matrices.
///
/// Forward calls compute their output immediately. When the graph was created
/// with `needs_backprop`, each call also appends an [`Op`] that [`Graph::backward`]
/// replays in reverse, accumulating into operand gradients.
///
/// Model parameters enter the graph as named leaves via [`Graph::param`]; their
/// gradients are handed back with [`Graph::accumulate_grads`].
#[derive(Debug, Clone)]
pub struct Graph {
    needs_backprop: bool,
    nodes: Vec<Tensor>,
    ops: Vec<Op>,
    params: Vec<(String, NodeId)>,
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl Graph {
    pub fn new(needs_backprop: bool) -> Self {
        Graph {
            needs_backprop,
            nodes: Vec::new(),
            ops: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn needs_backprop(&self) -> bool {
        self.needs_backprop
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    fn push(&mut self, tensor: Tensor) -> NodeId {
        self.nodes.push(tensor);
        NodeId(self.nodes.len() - 1)
    }

    fn record(&mut self, op: Op) {
        if self.needs_backprop {
            self.ops.push(op);
        }
    }

    /// Add a constant leaf (an observation, a hidden state seed, ...).
    pub fn input(&mut self, tensor: Tensor) -> NodeId {
        self.push(tensor)
    }

    /// Add the named parameter of `model` as a leaf. Registering the same name
    /// twice returns the existing node so that gradients from every use land
    /// in one place.
    pub fn param(&mut self, model: &Model, name: &str) -> NodeId {
        if let Some(&(_, id)) = self.params.iter().find(|(n, _)| n == name) {
            return id;
        }
        let tensor = model
            .get(name)
            .unwrap_or_else(|| panic!("model has no parameter named '{}'", name))
            .detached();
        let id = self.push(tensor);
        self.params.push((name.to_string(), id));
        id
    }

    pub fn value(&self, id: NodeId) -> &Tensor {
        &self.nodes[id.0]
    }

    pub fn tensor_mut(&mut self, id: NodeId) -> &mut Tensor {
        &mut self.nodes[id.0]
    }

    pub fn grad(&self, id: NodeId) -> &[f64] {
        &self.nodes[id.0].dw
    }

    pub fn grad_mut(&mut self, id: NodeId) -> &mut [f64] {
        &mut self.nodes[id.0].dw
    }

    /// Add the gradients gathered on parameter leaves into `model`.
    pub fn accumulate_grads(&self, model: &mut Model) {
        for (name, id) in &self.params {
            if let Some(target) = model.get_mut(name) {
                for (g, &d) in target.dw.iter_mut().zip(self.nodes[id.0].dw.iter()) {
                    *g += d;
                }
            }
        }
    }

    pub fn row_pluck(&mut self, input: NodeId, ix: usize) -> NodeId {
        let m = self.value(input);
        assert!(ix < m.rows(), "row {} out of range for {} rows", ix, m.rows());
        let d = m.cols();
        let values = m.w[d * ix..d * (ix + 1)].to_vec();
        let out = self.push(Tensor::from_vec(d, 1, values));
        self.record(Op::RowPluck { input, ix, out });
        out
    }

    fn unary(&mut self, input: NodeId, f: impl Fn(f64) -> f64) -> NodeId {
        let m = self.value(input);
        let values = m.w.iter().map(|&x| f(x)).collect();
        let t = Tensor::from_vec(m.rows(), m.cols(), values);
        self.push(t)
    }

    pub fn tanh(&mut self, input: NodeId) -> NodeId {
        let out = self.unary(input, f64::tanh);
        self.record(Op::Tanh { input, out });
        out
    }

    pub fn sigmoid(&mut self, input: NodeId) -> NodeId {
        let out = self.unary(input, sigmoid);
        self.record(Op::Sigmoid { input, out });
        out
    }

    pub fn relu(&mut self, input: NodeId) -> NodeId {
        let out = self.unary(input, |x| x.max(0.0));
        self.record(Op::Relu { input, out });
        out
    }

    pub fn mul(&mut self, a: NodeId, b: NodeId) -> NodeId {
        let t = self.value(a).matmul(self.value(b));
        let out = self.push(t);
        self.record(Op::Mul { a, b, out });
        out
    }

    fn assert_same_len(&self, a: NodeId, b: NodeId, op: &str) {
        let (ta, tb) = (self.value(a), self.value(b));
        assert_eq!(
            ta.len(),
            tb.len(),
            "{} dimensions misaligned: {}x{} vs {}x{}",
            op,
            ta.rows(),
            ta.cols(),
            tb.rows(),
            tb.cols()
        );
    }

    /// Elementwise ops also require matching rows and cols.
    fn assert_same_shape(&self, a: NodeId, b: NodeId, op: &str) {
        self.assert_same_len(a, b, op);
        let (ta, tb) = (self.value(a), self.value(b));
        assert!(
            ta.rows() == tb.rows() && ta.cols() == tb.cols(),
            "{} shapes differ: {}x{} vs {}x{}",
            op,
            ta.rows(),
            ta.cols(),
            tb.rows(),
            tb.cols()
        );
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.assert_same_shape(a, b, "add");
        let (ta, tb) = (self.value(a), self.value(b));
        let values = ta.w.iter().zip(tb.w.iter()).map(|(x, y)| x + y).collect();
        let t = Tensor::from_vec(ta.rows(), ta.cols(), values);
        let out = self.push(t);
        self.record(Op::Add { a, b, out });
        out
    }

    pub fn dot(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.assert_same_len(a, b, "dot");
        let (ta, tb) = (self.value(a), self.value(b));
        let dot: f64 = ta.w.iter().zip(tb.w.iter()).map(|(x, y)| x * y).sum();
        let out = self.push(Tensor::from_vec(1, 1, vec![dot]));
        self.record(Op::Dot { a, b, out });
        out
    }

    pub fn eltmul(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.assert_same_shape(a, b, "eltmul");
        let (ta, tb) = (self.value(a), self.value(b));
        let values = ta.w.iter().zip(tb.w.iter()).map(|(x, y)| x * y).collect();
        let t = Tensor::from_vec(ta.rows(), ta.cols(), values);
        let out = self.push(t);
        self.record(Op::EltMul { a, b, out });
        out
    }

    /// Replay the tape in reverse. The caller seeds the terminal gradient
    /// first; without a seed every contribution is zero.
    pub fn backward(&mut self) {
        for i in (0..self.ops.len()).rev() {
            let op = self.ops[i];
            self.backprop(op);
        }
    }

    fn add_grad(&mut self, id: NodeId, delta: &[f64]) {
        for (g, d) in self.nodes[id.0].dw.iter_mut().zip(delta) {
            *g += d;
        }
    }

    // Contributions are computed into scratch buffers before being added, so
    // an op whose operands alias (mul(a, a)) still gets both terms.
    fn backprop(&mut self, op: Op) {
        match op {
            Op::RowPluck { input, ix, out } => {
                let d = self.value(input).cols();
                let dy = self.nodes[out.0].dw.clone();
                let target = &mut self.nodes[input.0].dw[d * ix..d * (ix + 1)];
                for (g, v) in target.iter_mut().zip(dy) {
                    *g += v;
                }
            }
            Op::Tanh { input, out } => {
                let o = &self.nodes[out.0];
                let delta: Vec<f64> = o
                    .w
                    .iter()
                    .zip(o.dw.iter())
                    .map(|(y, dy)| (1.0 - y * y) * dy)
                    .collect();
                self.add_grad(input, &delta);
            }
            Op::Sigmoid { input, out } => {
                let o = &self.nodes[out.0];
                let delta: Vec<f64> = o
                    .w
                    .iter()
                    .zip(o.dw.iter())
                    .map(|(y, dy)| y * (1.0 - y) * dy)
                    .collect();
                self.add_grad(input, &delta);
            }
            Op::Relu { input, out } => {
                let x = &self.nodes[input.0].w;
                let dy = &self.nodes[out.0].dw;
                let delta: Vec<f64> = x
                    .iter()
                    .zip(dy.iter())
                    .map(|(&x, &dy)| if x > 0.0 { dy } else { 0.0 })
                    .collect();
                self.add_grad(input, &delta);
            }
            Op::Mul { a, b, out } => {
                let (ta, tb, to) = (&self.nodes[a.0], &self.nodes[b.0], &self.nodes[out.0]);
                let (n, k, d) = (ta.rows(), ta.cols(), tb.cols());
                let mut da = vec![0.0; ta.len()];
                let mut db = vec![0.0; tb.len()];
                for i in 0..n {
                    for j in 0..d {
                        let g = to.dw[d * i + j];
                        if g == 0.0 {
                            continue;
                        }
                        for q in 0..k {
                            da[k * i + q] += tb.w[d * q + j] * g;
                            db[d * q + j] += ta.w[k * i + q] * g;
                        }
                    }
                }
                self.add_grad(a, &da);
                self.add_grad(b, &db);
            }
            Op::Add { a, b, out } => {
                let dy = self.nodes[out.0].dw.clone();
                self.add_grad(a, &dy);
                self.add_grad(b, &dy);
            }
            Op::Dot { a, b, out } => {
                let g = self.nodes[out.0].dw[0];
                let da: Vec<f64> = self.nodes[b.0].w.iter().map(|v| v * g).collect();
                let db: Vec<f64> = self.nodes[a.0].w.iter().map(|v| v * g).collect();
                self.add_grad(a, &da);
                self.add_grad(b, &db);
            }
            Op::EltMul { a, b, out } => {
                let dy = &self.nodes[out.0].dw;
                let da: Vec<f64> = self.nodes[b.0]
                    .w
                    .iter()
                    .zip(dy.iter())
                    .map(|(v, g)| v * g)
                    .collect();
                let db: Vec<f64> = self.nodes[a.0]
                    .w
                    .iter()
                    .zip(dy.iter())
                    .map(|(v, g)| v * g)
                    .collect();
                self.add_grad(a, &da);
                self.add_grad(b, &db);
            }
        }
    }
}

/// Softmax over all entries. No backward rule: callers that need one write
/// gradients onto the logits directly.
pub fn softmax(m: &Tensor) -> Tensor {
    let max = m.w.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut out = Tensor::zeros(m.rows(), m.cols());
    let mut sum = 0.0;
    for (o, &x) in out.w.iter_mut().zip(m.w.iter()) {
        *o = (x - max).exp();
        sum += *o;
    }
    for o in out.w.iter_mut() {
        *o /= sum;
    }
    out
}
