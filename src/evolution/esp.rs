use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ai::sampling::make_rng;
use crate::error::ConfigError;
use crate::evolution::chromosome::Chromosome;
use crate::evolution::ga::{breed, elite_count, sort_descending, FITNESS_FLOOR};
use crate::evolution::network::{Activation, FeedForwardNet, Genome};

/// `n_sp` single-output sub-networks that read a shared input vector made
/// of the real inputs followed by the latest output of every sub-network.
#[derive(Debug, Clone, PartialEq)]
pub struct EspNet {
    n_sp: usize,
    n_input: usize,
    nets: Vec<FeedForwardNet>,
    input: Vec<f64>,
    output: Vec<f64>,
}

impl EspNet {
    /// Each sub-network is `n_input + n_sp -> n_hidden sigmoid -> 1 linear`,
    /// zero-initialized until genes are pushed.
    pub fn new(n_sp: usize, n_input: usize, n_hidden: usize) -> Self {
        assert!(n_sp > 0, "ESP needs at least one sub-network");
        let arch = [(n_hidden, Activation::Sigmoid), (1, Activation::Linear)];
        EspNet {
            n_sp,
            n_input,
            nets: (0..n_sp)
                .map(|_| FeedForwardNet::new(n_input + n_sp, &arch))
                .collect(),
            input: vec![0.0; n_input + n_sp],
            output: vec![0.0; n_sp],
        }
    }

    pub fn num_subnets(&self) -> usize {
        self.n_sp
    }

    pub fn input(&self) -> &[f64] {
        &self.input
    }

    pub fn output(&self) -> &[f64] {
        &self.output
    }

    /// Copy the latest outputs into the trailing input slots.
    pub fn feedback(&mut self) {
        self.input[self.n_input..].copy_from_slice(&self.output);
    }

    /// Set the real inputs and refresh the fed-back outputs.
    pub fn set_input(&mut self, input: &[f64]) {
        assert_eq!(input.len(), self.n_input, "ESP input length mismatch");
        self.input[..self.n_input].copy_from_slice(input);
        self.feedback();
    }

    /// Run sub-networks from last to first. Outputs are recorded as they are
    /// produced, and feedback happens just before sub-network 0 runs, so it
    /// sees the other outputs of this cycle.
    pub fn forward(&mut self) -> Vec<f64> {
        let mut y = vec![0.0; self.n_sp];
        for i in (0..self.n_sp).rev() {
            if i == 0 {
                self.feedback();
            }
            y[i] = self.nets[i].forward(&self.input)[0];
            self.output[i] = y[i];
        }
        y
    }

    /// Parameter count of one sub-network.
    pub fn network_size(&self) -> usize {
        self.nets[0].gene_len()
    }

    pub fn genes(&self) -> Vec<Vec<f64>> {
        self.nets.iter().map(|n| n.gene()).collect()
    }

    pub fn push_genes(&mut self, genes: &[Vec<f64>]) {
        assert_eq!(genes.len(), self.n_sp, "need one gene per sub-network");
        for (net, gene) in self.nets.iter_mut().zip(genes) {
            net.push_gene(gene);
        }
    }
}

/// Enforced sub-population hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EspConfig {
    /// Per sub-population, rounded down to an even number.
    pub population_size: usize,
    pub mutation_rate: f64,
    pub elite_percentage: f64,
    pub mutation_size: f64,
    pub target_fitness: f64,
    /// Each chromosome is tested about `num_passes * n_sp` times per generation.
    pub num_passes: usize,
    pub burst_generations: usize,
    /// Score chromosomes by their best trial rather than their average.
    pub best_mode: bool,
    pub seed: Option<u64>,
}

impl Default for EspConfig {
    fn default() -> Self {
        EspConfig {
            population_size: 50,
            mutation_rate: 0.2,
            elite_percentage: 0.2,
            mutation_size: 0.02,
            target_fitness: 1e16,
            num_passes: 2,
            burst_generations: 10,
            best_mode: false,
            seed: None,
        }
    }
}

impl EspConfig {
    pub fn even_population(&self) -> usize {
        (self.population_size / 2) * 2
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.even_population() < 4 {
            return Err(ConfigError::Validation(
                "esp.population_size must be >= 4".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(ConfigError::Validation(
                "esp.mutation_rate must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.elite_percentage) {
            return Err(ConfigError::Validation(
                "esp.elite_percentage must be in [0, 1]".into(),
            ));
        }
        if elite_count(self.elite_percentage, self.even_population()) < 2 {
            return Err(ConfigError::Validation(
                "esp.elite_percentage leaves fewer than 2 elites".into(),
            ));
        }
        if self.mutation_size < 0.0 {
            return Err(ConfigError::Validation(
                "esp.mutation_size must be >= 0".into(),
            ));
        }
        if self.num_passes == 0 {
            return Err(ConfigError::Validation(
                "esp.num_passes must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Cooperative co-evolution of the sub-networks of an [`EspNet`].
///
/// Every sub-network has its own population. A trial assembles one net from
/// one chromosome per population and credits the resulting fitness to every
/// participant.
pub struct EspTrainer {
    espnet: EspNet,
    config: EspConfig,
    population_size: usize,
    sp: Vec<Vec<Chromosome>>,
    best_genes: Vec<Vec<f64>>,
    best_fitness: f64,
    best_fitness_count: usize,
    rng: StdRng,
}

impl EspTrainer {
    pub fn new(
        espnet: EspNet,
        config: EspConfig,
        init_genes: Option<&[Vec<f64>]>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if let Some(genes) = init_genes {
            let size = espnet.network_size();
            if genes.len() != espnet.num_subnets() || genes.iter().any(|g| g.len() != size) {
                return Err(ConfigError::Validation(format!(
                    "initial genes must be {} vectors of {} values",
                    espnet.num_subnets(),
                    size
                )));
            }
        }
        let mut trainer = EspTrainer {
            population_size: config.even_population(),
            rng: make_rng(config.seed),
            espnet,
            config,
            sp: Vec::new(),
            best_genes: Vec::new(),
            best_fitness: FITNESS_FLOOR,
            best_fitness_count: 0,
        };
        trainer.initialize(init_genes);
        Ok(trainer)
    }

    fn initialize(&mut self, init_genes: Option<&[Vec<f64>]>) {
        let size = self.espnet.network_size();
        self.sp.clear();
        self.best_genes.clear();
        for i in 0..self.espnet.num_subnets() {
            let population: Vec<Chromosome> = (0..self.population_size)
                .map(|j| {
                    let mut c = Chromosome::zeros(size);
                    match init_genes {
                        Some(genes) => {
                            c.copy_from_gene(&genes[i]);
                            if j > 0 {
                                c.burst_mutate(&mut self.rng, self.config.mutation_size);
                            }
                        }
                        None => c.randomize(&mut self.rng, 1.0),
                    }
                    c
                })
                .collect();
            self.best_genes.push(population[0].gene.clone());
            self.sp.push(population);
        }
        self.espnet.push_genes(&self.best_genes);
        self.best_fitness = FITNESS_FLOOR;
        self.best_fitness_count = 0;
    }

    /// Network holding the best gene combination found so far.
    pub fn espnet(&self) -> &EspNet {
        &self.espnet
    }

    pub fn sub_populations(&self) -> &[Vec<Chromosome>] {
        &self.sp
    }

    pub fn best_genes(&self) -> &[Vec<f64>] {
        &self.best_genes
    }

    pub fn best_fitness(&self) -> f64 {
        self.best_fitness
    }

    fn score(&self, c: &Chromosome) -> f64 {
        if self.config.best_mode {
            c.fitness
        } else {
            c.average_fitness()
        }
    }

    /// Run one generation and return its best fitness.
    pub fn train<F: FnMut(&mut EspNet) -> f64>(&mut self, mut fit: F) -> f64 {
        let n = self.population_size;
        let n_sp = self.espnet.num_subnets();
        let best_mode = self.config.best_mode;

        for c in self.sp.iter_mut().flatten() {
            if best_mode {
                c.n_trial = 1;
                c.fitness = FITNESS_FLOOR;
            } else {
                c.n_trial = 0;
                c.fitness = 0.0;
            }
        }

        self.espnet.push_genes(&self.best_genes);
        let fitness = fit(&mut self.espnet);
        if fitness > self.config.target_fitness {
            return fitness;
        }
        let mut generation_best = fitness;
        let mut generation_genes = self.best_genes.clone();

        for _ in 0..self.config.num_passes {
            for i in 0..n_sp {
                for j in 0..n {
                    let members: Vec<usize> = (0..n_sp)
                        .map(|m| if m == i { j } else { self.rng.random_range(0..n) })
                        .collect();
                    let genes: Vec<Vec<f64>> = members
                        .iter()
                        .enumerate()
                        .map(|(m, &idx)| self.sp[m][idx].gene.clone())
                        .collect();
                    self.espnet.push_genes(&genes);
                    let fitness = fit(&mut self.espnet);

                    for (m, &idx) in members.iter().enumerate() {
                        let c = &mut self.sp[m][idx];
                        if best_mode {
                            c.fitness = c.fitness.max(fitness);
                        } else {
                            c.n_trial += 1;
                            c.fitness += fitness;
                        }
                    }
                    if fitness > generation_best {
                        generation_best = fitness;
                        generation_genes = genes;
                    }
                }
            }
        }

        let n_elite = elite_count(self.config.elite_percentage, n);
        for i in 0..n_sp {
            let mut population = std::mem::take(&mut self.sp[i]);
            sort_descending(&mut population, |c| self.score(c));
            breed(&mut population, n_elite, &mut self.rng);
            // the first crossover batch after the elites stays unmutated
            for c in population.iter_mut().skip(2 * n_elite) {
                c.mutate(&mut self.rng, self.config.mutation_rate, self.config.mutation_size);
            }
            population[n - 1].copy_from_gene(&self.best_genes[i]);
            population[n - 2].copy_from_gene(&generation_genes[i]);
            self.sp[i] = population;
        }

        if generation_best < self.best_fitness {
            self.best_fitness_count += 1;
            if self.best_fitness_count > self.config.burst_generations {
                tracing::warn!(
                    generations = self.best_fitness_count,
                    best_fitness = self.best_fitness,
                    "ESP stagnating, re-initializing around the best combination"
                );
                let best_genes = self.best_genes.clone();
                let best_fitness = self.best_fitness;
                self.initialize(Some(&best_genes));
                self.best_genes = best_genes;
                self.best_fitness = best_fitness;
            }
        } else {
            self.best_fitness_count = 0;
            self.best_fitness = generation_best;
            self.best_genes = generation_genes;
        }

        self.espnet.push_genes(&self.best_genes);
        tracing::debug!(generation_best, record = self.best_fitness, "ESP generation");
        generation_best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bias_only_genes(net: &EspNet, biases: &[f64]) -> Vec<Vec<f64>> {
        biases
            .iter()
            .map(|&b| {
                let mut gene = vec![0.0; net.network_size()];
                // output bias is the last parameter
                if let Some(last) = gene.last_mut() {
                    *last = b;
                }
                gene
            })
            .collect()
    }

    fn config() -> EspConfig {
        EspConfig {
            population_size: 10,
            seed: Some(29),
            ..Default::default()
        }
    }

    /// Sum of outputs over a few cycles, pulled toward a target of 1.
    fn track_one(net: &mut EspNet) -> f64 {
        net.set_input(&[0.5]);
        let mut err = 0.0;
        for _ in 0..3 {
            let y = net.forward();
            err += (y.iter().sum::<f64>() - 1.0).powi(2);
        }
        -err
    }

    #[test]
    fn test_forward_returns_one_value_per_subnet() {
        let mut net = EspNet::new(3, 2, 4);
        net.set_input(&[1.0, -1.0]);
        assert_eq!(net.forward().len(), 3);
        assert_eq!(net.input().len(), 5);
        assert_eq!(net.network_size(), 4 * 5 + 4 + 4 + 1);
    }

    #[test]
    fn test_feedback_happens_before_first_subnet() {
        let mut net = EspNet::new(2, 1, 3);
        let genes = bias_only_genes(&net, &[0.7, 0.3]);
        net.push_genes(&genes);
        net.set_input(&[2.0]);

        assert_eq!(net.forward(), vec![0.7, 0.3]);
        // sub-net 1 ran first, so its fresh output is fed back; sub-net 0's
        // slot still holds the previous cycle
        assert_eq!(net.input(), &[2.0, 0.0, 0.3]);

        net.forward();
        assert_eq!(net.input(), &[2.0, 0.7, 0.3]);
        assert_eq!(net.genes(), genes);
    }

    #[test]
    fn test_validation() {
        let bad = EspConfig {
            population_size: 3,
            ..config()
        };
        assert!(bad.validate().is_err());
        let bad = EspConfig {
            num_passes: 0,
            ..config()
        };
        assert!(bad.validate().is_err());
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_init_genes_seed_best() {
        let net = EspNet::new(2, 1, 2);
        let genes = bias_only_genes(&net, &[0.1, 0.2]);
        let trainer = EspTrainer::new(net, config(), Some(&genes)).unwrap();
        assert_eq!(trainer.best_genes(), &genes[..]);
        assert_eq!(trainer.sub_populations()[1][0].gene, genes[1]);
        assert_eq!(trainer.espnet().genes(), genes);
    }

    #[test]
    fn test_train_records_generation_best() {
        let mut trainer = EspTrainer::new(EspNet::new(2, 1, 3), config(), None).unwrap();
        let best = trainer.train(track_one);
        assert_eq!(trainer.best_fitness(), best);
        for (i, population) in trainer.sub_populations().iter().enumerate() {
            assert_eq!(population.len(), 10);
            assert_eq!(population[8].gene, trainer.best_genes()[i]);
        }
        assert_eq!(trainer.espnet().genes(), trainer.best_genes());
    }

    #[test]
    fn test_best_mode_and_progress() {
        let mut trainer = EspTrainer::new(
            EspNet::new(2, 1, 3),
            EspConfig {
                best_mode: true,
                ..config()
            },
            None,
        )
        .unwrap();
        let first = trainer.train(track_one);
        for _ in 0..10 {
            trainer.train(track_one);
        }
        assert!(trainer.best_fitness() >= first);
        assert!(trainer.best_fitness() <= 0.0);
    }

    #[test]
    fn test_target_fitness_returns_early() {
        let mut trainer = EspTrainer::new(
            EspNet::new(2, 1, 3),
            EspConfig {
                target_fitness: -1.0,
                ..config()
            },
            None,
        )
        .unwrap();
        let mut calls = 0;
        let fitness = trainer.train(|_| {
            calls += 1;
            0.0
        });
        assert_eq!(fitness, 0.0);
        assert_eq!(calls, 1);
    }
}
