use std::collections::HashMap;

use super::model::Model;
use super::tensor::Tensor;

const DECAY_RATE: f64 = 0.999;
const SMOOTH_EPS: f64 = 1e-8;

/// RMSProp-style parameter updater.
///
/// Keeps one decayed second-moment estimate per parameter name, created the
/// first time that parameter is stepped and kept for the solver's lifetime.
#[derive(Debug, Clone, Default)]
pub struct Solver {
    step_cache: HashMap<String, Tensor>,
}

impl Solver {
    pub fn new() -> Self {
        Solver {
            step_cache: HashMap::new(),
        }
    }

    /// Apply one update to every parameter of `model` and zero its gradients.
    ///
    /// Returns the fraction of scalars whose gradient was clipped.
    pub fn step(&mut self, model: &mut Model, step_size: f64, regc: f64, clipval: f64) -> f64 {
        let mut num_clipped = 0usize;
        let mut num_total = 0usize;

        for (name, m) in model.iter_mut() {
            let cache = self
                .step_cache
                .entry(name.to_string())
                .or_insert_with(|| Tensor::zeros(m.rows(), m.cols()));

            for i in 0..m.len() {
                let mut mdwi = m.dw[i];
                cache.w[i] = cache.w[i] * DECAY_RATE + (1.0 - DECAY_RATE) * mdwi * mdwi;

                if mdwi > clipval {
                    mdwi = clipval;
                    num_clipped += 1;
                }
                if mdwi < -clipval {
                    mdwi = -clipval;
                    num_clipped += 1;
                }
                num_total += 1;

                m.w[i] += -step_size * mdwi / (cache.w[i] + SMOOTH_EPS).sqrt() - regc * m.w[i];
                m.dw[i] = 0.0;
            }
        }

        if num_total == 0 {
            0.0
        } else {
            num_clipped as f64 / num_total as f64
        }
    }

    /// Second-moment estimate kept for `name`, if it has been stepped.
    pub fn cache(&self, name: &str) -> Option<&Tensor> {
        self.step_cache.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Graph;

    /// loss = sum((x - t)^2) / 2, gradient x - t
    fn quadratic_loss(model: &mut Model, target: &[f64]) -> f64 {
        let x = model.get_mut("x").unwrap();
        let mut loss = 0.0;
        for i in 0..x.len() {
            let d = x.w[i] - target[i];
            loss += 0.5 * d * d;
            x.dw[i] = d;
        }
        loss
    }

    #[test]
    fn test_step_decreases_convex_loss() {
        let mut model = Model::new();
        model.insert("x", Tensor::column(&[0.0, 0.0, 0.0]));
        let target = [5.0, 5.0, 5.0];
        let mut solver = Solver::new();

        let mut prev = f64::INFINITY;
        for _ in 0..200 {
            let loss = quadratic_loss(&mut model, &target);
            assert!(loss < prev, "loss went from {} to {}", prev, loss);
            prev = loss;
            solver.step(&mut model, 0.01, 0.0, 5.0);
        }
    }

    #[test]
    fn test_step_through_graph_decreases_loss() {
        // y = W x, loss = (y - 1)^2 / 2
        let mut model = Model::new();
        model.insert("W", Tensor::from_vec(1, 2, vec![0.1, -0.1]));
        let x = Tensor::column(&[1.0, 2.0]);
        let mut solver = Solver::new();

        let mut prev = f64::INFINITY;
        for _ in 0..10 {
            let mut g = Graph::new(true);
            let w = g.param(&model, "W");
            let xi = g.input(x.clone());
            let y = g.mul(w, xi);
            let err = g.value(y).w[0] - 1.0;
            let loss = 0.5 * err * err;
            assert!(loss < prev);
            prev = loss;
            g.grad_mut(y)[0] = err;
            g.backward();
            g.accumulate_grads(&mut model);
            solver.step(&mut model, 0.01, 0.0, 5.0);
        }
    }

    #[test]
    fn test_step_zeroes_grads_and_creates_cache() {
        let mut model = Model::new();
        model.insert("a", Tensor::from_vec(2, 2, vec![1.0; 4]));
        model.get_mut("a").unwrap().fill_grad(0.5);
        let mut solver = Solver::new();
        assert!(solver.cache("a").is_none());

        solver.step(&mut model, 0.1, 0.0, 5.0);
        assert!(model.flatten_grads().iter().all(|&g| g == 0.0));
        let cache = solver.cache("a").unwrap();
        assert_eq!((cache.rows(), cache.cols()), (2, 2));
        assert!((cache.w[0] - 0.001 * 0.25).abs() < 1e-15);
    }

    #[test]
    fn test_clip_fraction() {
        let mut model = Model::new();
        let mut t = Tensor::zeros(4, 1);
        t.dw = vec![10.0, -10.0, 0.5, 0.0];
        model.insert("a", t);
        let mut solver = Solver::new();
        let ratio = solver.step(&mut model, 0.01, 0.0, 1.0);
        assert!((ratio - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_regularization_shrinks_weights() {
        let mut model = Model::new();
        model.insert("a", Tensor::column(&[2.0, -2.0]));
        let mut solver = Solver::new();
        solver.step(&mut model, 0.01, 0.1, 5.0);
        let w = &model.get("a").unwrap().w;
        assert!((w[0] - 1.8).abs() < 1e-12);
        assert!((w[1] + 1.8).abs() < 1e-12);
    }

    #[test]
    fn test_empty_model_ratio_is_zero() {
        let mut solver = Solver::new();
        assert_eq!(solver.step(&mut Model::new(), 0.1, 0.0, 1.0), 0.0);
    }
}
