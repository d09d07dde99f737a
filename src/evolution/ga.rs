use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ai::sampling::make_rng;
use crate::error::ConfigError;
use crate::evolution::chromosome::Chromosome;
use crate::evolution::network::Genome;

/// Starting value for "best so far" fitness records.
pub(crate) const FITNESS_FLOOR: f64 = -1e16;

/// Round `pct * n` down to an even count.
pub(crate) fn elite_count(pct: f64, n: usize) -> usize {
    ((pct * n as f64).floor() as usize / 2) * 2
}

/// Sort descending by `key`; incomparable values keep their order.
pub(crate) fn sort_descending(c: &mut [Chromosome], key: impl Fn(&Chromosome) -> f64) {
    c.sort_by(|a, b| key(b).partial_cmp(&key(a)).unwrap_or(Ordering::Equal));
}

/// Refill slots `n_elite..` with children of random elite pairs.
pub(crate) fn breed<R: Rng + ?Sized>(c: &mut [Chromosome], n_elite: usize, rng: &mut R) {
    let mut i = n_elite;
    while i + 1 < c.len() {
        let p1 = rng.random_range(0..n_elite);
        let p2 = rng.random_range(0..n_elite);
        let (elite, rest) = c.split_at_mut(i);
        let (kid1, kid2) = rest.split_at_mut(1);
        elite[p1].crossover(&elite[p2], &mut kid1[0], &mut kid2[0], rng);
        i += 2;
    }
}

/// Genetic-algorithm hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GaConfig {
    /// Rounded down to an even number.
    pub population_size: usize,
    pub mutation_rate: f64,
    pub elite_percentage: f64,
    pub mutation_size: f64,
    /// `train` returns immediately once the incumbent scores above this.
    pub target_fitness: f64,
    /// Generations without improvement before the population is re-seeded.
    pub burst_generations: usize,
    /// Fitness is the best of this many evaluations.
    pub best_trial: usize,
    /// Opponents drawn per individual in `match_train`.
    pub num_match: usize,
    pub seed: Option<u64>,
}

impl Default for GaConfig {
    fn default() -> Self {
        GaConfig {
            population_size: 100,
            mutation_rate: 0.01,
            elite_percentage: 0.2,
            mutation_size: 0.05,
            target_fitness: 1e16,
            burst_generations: 10,
            best_trial: 1,
            num_match: 1,
            seed: None,
        }
    }
}

impl GaConfig {
    pub fn even_population(&self) -> usize {
        (self.population_size / 2) * 2
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.even_population() < 2 {
            return Err(ConfigError::Validation(
                "ga.population_size must be >= 2".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(ConfigError::Validation(
                "ga.mutation_rate must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.elite_percentage) {
            return Err(ConfigError::Validation(
                "ga.elite_percentage must be in [0, 1]".into(),
            ));
        }
        if elite_count(self.elite_percentage, self.even_population()) < 2 {
            return Err(ConfigError::Validation(
                "ga.elite_percentage leaves fewer than 2 elites".into(),
            ));
        }
        if self.mutation_size < 0.0 {
            return Err(ConfigError::Validation(
                "ga.mutation_size must be >= 0".into(),
            ));
        }
        if self.best_trial == 0 {
            return Err(ConfigError::Validation(
                "ga.best_trial must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Conventional neuroevolution over the parameters of a [`Genome`].
///
/// The chromosome at index 0 is always the incumbent: it is never mutated
/// and its gene is the one left in the network after every generation.
pub struct GaTrainer<G> {
    net: G,
    config: GaConfig,
    population_size: usize,
    chromosomes: Vec<Chromosome>,
    best_fitness: f64,
    best_fitness_count: usize,
    rng: StdRng,
}

impl<G: Genome> GaTrainer<G> {
    /// With `init_gene` every individual starts as a copy of it, all but the
    /// first burst-mutated. Otherwise genes are drawn from N(0, 1).
    pub fn new(mut net: G, config: GaConfig, init_gene: Option<&[f64]>) -> Result<Self, ConfigError> {
        config.validate()?;
        let size = net.gene_len();
        if let Some(gene) = init_gene {
            if gene.len() != size {
                return Err(ConfigError::Validation(format!(
                    "initial gene has {} values, network needs {}",
                    gene.len(),
                    size
                )));
            }
        }
        let mut rng = make_rng(config.seed);
        let population_size = config.even_population();
        let chromosomes: Vec<Chromosome> = (0..population_size)
            .map(|i| {
                let mut c = Chromosome::zeros(size);
                match init_gene {
                    Some(gene) => {
                        c.copy_from_gene(gene);
                        if i > 0 {
                            c.burst_mutate(&mut rng, config.mutation_size);
                        }
                    }
                    None => c.randomize(&mut rng, 1.0),
                }
                c
            })
            .collect();
        net.push_gene(&chromosomes[0].gene);

        Ok(GaTrainer {
            net,
            config,
            population_size,
            chromosomes,
            best_fitness: FITNESS_FLOOR,
            best_fitness_count: 0,
            rng,
        })
    }

    /// Network holding the incumbent gene.
    pub fn net(&self) -> &G {
        &self.net
    }

    pub fn chromosomes(&self) -> &[Chromosome] {
        &self.chromosomes
    }

    /// Best generation fitness recorded so far.
    pub fn best_fitness(&self) -> f64 {
        self.best_fitness
    }

    fn best_of_trials<F: FnMut(&G) -> f64>(&self, fit: &mut F) -> f64 {
        (0..self.config.best_trial)
            .map(|_| fit(&self.net))
            .fold(FITNESS_FLOOR, f64::max)
    }

    /// Run one generation and return its best fitness.
    pub fn train<F: FnMut(&G) -> f64>(&mut self, mut fit: F) -> f64 {
        let n = self.population_size;

        self.net.push_gene(&self.chromosomes[0].gene);
        let fitness = self.best_of_trials(&mut fit);
        self.chromosomes[0].fitness = fitness;
        let mut best = fitness;
        if best > self.config.target_fitness {
            return best;
        }

        for i in 1..n {
            self.net.push_gene(&self.chromosomes[i].gene);
            let fitness = self.best_of_trials(&mut fit);
            self.chromosomes[i].fitness = fitness;
            best = best.max(fitness);
        }

        sort_descending(&mut self.chromosomes, |c| c.fitness);
        let n_elite = elite_count(self.config.elite_percentage, n);
        breed(&mut self.chromosomes, n_elite, &mut self.rng);
        for c in self.chromosomes.iter_mut().skip(1) {
            c.mutate(&mut self.rng, self.config.mutation_rate, self.config.mutation_size);
        }
        self.net.push_gene(&self.chromosomes[0].gene);

        if best < self.best_fitness {
            self.best_fitness_count += 1;
            if self.best_fitness_count > self.config.burst_generations {
                tracing::warn!(
                    generations = self.best_fitness_count,
                    best_fitness = self.best_fitness,
                    "GA stagnating, burst mutating around the incumbent"
                );
                let (head, tail) = self.chromosomes.split_at_mut(1);
                for c in tail {
                    c.copy_from(&head[0]);
                    c.burst_mutate(&mut self.rng, self.config.mutation_size);
                }
            }
        } else {
            self.best_fitness_count = 0;
            self.best_fitness = best;
        }
        tracing::debug!(best, record = self.best_fitness, "GA generation");
        best
    }

    /// Self-play generation. `play(a, b)` reports `Greater` when `a` wins,
    /// `Equal` on a tie. A win scores 2, a tie 1, a loss 0, averaged over
    /// the matches each individual took part in. The top two survive
    /// unmutated.
    pub fn match_train<F>(&mut self, mut play: F)
    where
        F: FnMut(&Chromosome, &Chromosome) -> Ordering,
    {
        let n = self.population_size;
        for c in self.chromosomes.iter_mut() {
            c.fitness = 0.0;
            c.n_trial = 0;
        }

        for i in 0..n {
            for _ in 0..self.config.num_match {
                let opponent = self.rng.random_range(0..n);
                if opponent == i {
                    continue;
                }
                let result = match play(&self.chromosomes[i], &self.chromosomes[opponent]) {
                    Ordering::Greater => 1.0,
                    Ordering::Equal => 0.0,
                    Ordering::Less => -1.0,
                };
                self.chromosomes[i].n_trial += 1;
                self.chromosomes[opponent].n_trial += 1;
                self.chromosomes[i].fitness += result + 1.0;
                self.chromosomes[opponent].fitness += -result + 1.0;
            }
        }
        for c in self.chromosomes.iter_mut() {
            if c.n_trial > 0 {
                c.fitness /= c.n_trial as f64;
            }
        }

        sort_descending(&mut self.chromosomes, |c| c.fitness);
        let n_elite = elite_count(self.config.elite_percentage, n);
        breed(&mut self.chromosomes, n_elite, &mut self.rng);
        for c in self.chromosomes.iter_mut().skip(2) {
            c.mutate(&mut self.rng, self.config.mutation_rate, self.config.mutation_size);
        }
        self.net.push_gene(&self.chromosomes[0].gene);
    }
}
