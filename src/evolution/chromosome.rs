use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ai::sampling::randn;

/// Fixed-length real-valued gene with its fitness record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chromosome {
    pub gene: Vec<f64>,
    pub fitness: f64,
    /// Trials this chromosome has been scored in.
    pub n_trial: usize,
}

impl Chromosome {
    pub fn new(gene: Vec<f64>) -> Self {
        Chromosome {
            gene,
            fitness: 0.0,
            n_trial: 0,
        }
    }

    pub fn zeros(len: usize) -> Self {
        Self::new(vec![0.0; len])
    }

    pub fn len(&self) -> usize {
        self.gene.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gene.is_empty()
    }

    /// Fitness per trial, or the raw fitness when untested.
    pub fn average_fitness(&self) -> f64 {
        if self.n_trial == 0 {
            self.fitness
        } else {
            self.fitness / self.n_trial as f64
        }
    }

    /// Add N(0, magnitude) noise to every gene.
    pub fn burst_mutate<R: Rng + ?Sized>(&mut self, rng: &mut R, magnitude: f64) {
        for g in self.gene.iter_mut() {
            *g += randn(rng, 0.0, magnitude);
        }
    }

    /// Replace every gene with N(0, magnitude) noise.
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R, magnitude: f64) {
        for g in self.gene.iter_mut() {
            *g = randn(rng, 0.0, magnitude);
        }
    }

    /// Perturb each gene with probability `rate`.
    pub fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R, rate: f64, magnitude: f64) {
        for g in self.gene.iter_mut() {
            if rng.random::<f64>() < rate {
                *g += randn(rng, 0.0, magnitude);
            }
        }
    }

    /// One-point crossover at a uniformly random cut `l`:
    /// `kid1 = self[..l] ++ partner[l..]`, `kid2 = partner[..l] ++ self[l..]`.
    /// Returns the cut index.
    pub fn crossover<R: Rng + ?Sized>(
        &self,
        partner: &Chromosome,
        kid1: &mut Chromosome,
        kid2: &mut Chromosome,
        rng: &mut R,
    ) -> usize {
        let n = self.gene.len();
        assert_eq!(n, partner.gene.len(), "crossover gene lengths differ");
        let l = if n == 0 { 0 } else { rng.random_range(0..n) };
        self.crossover_at(partner, kid1, kid2, l);
        l
    }

    fn crossover_at(&self, partner: &Chromosome, kid1: &mut Chromosome, kid2: &mut Chromosome, l: usize) {
        let n = self.gene.len();
        kid1.gene.resize(n, 0.0);
        kid2.gene.resize(n, 0.0);
        for i in 0..n {
            if i < l {
                kid1.gene[i] = self.gene[i];
                kid2.gene[i] = partner.gene[i];
            } else {
                kid1.gene[i] = partner.gene[i];
                kid2.gene[i] = self.gene[i];
            }
        }
    }

    /// Copy `other`'s gene, leaving fitness bookkeeping untouched.
    pub fn copy_from(&mut self, other: &Chromosome) {
        self.copy_from_gene(&other.gene);
    }

    pub fn copy_from_gene(&mut self, gene: &[f64]) {
        self.gene.clear();
        self.gene.extend_from_slice(gene);
    }
}
