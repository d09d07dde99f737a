use std::collections::VecDeque;

/// Result of a single episode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeResult {
    pub total_return: f64,
    pub length: usize,
}

/// Training metrics tracker with rolling window computations.
pub struct TrainingMetrics {
    episode_results: VecDeque<EpisodeResult>,
    td_errors: VecDeque<f64>,
    capacity: usize,
    total_episodes: usize, // lifetime count, never capped
}

impl TrainingMetrics {
    pub fn with_capacity(capacity: usize) -> Self {
        TrainingMetrics {
            episode_results: VecDeque::with_capacity(capacity),
            td_errors: VecDeque::with_capacity(capacity),
            capacity,
            total_episodes: 0,
        }
    }

    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    pub fn record_episode(&mut self, result: EpisodeResult) {
        self.total_episodes += 1;
        self.episode_results.push_back(result);
        if self.episode_results.len() > self.capacity {
            self.episode_results.pop_front();
        }
    }

    pub fn record_td_error(&mut self, td_error: f64) {
        self.td_errors.push_back(td_error);
        if self.td_errors.len() > self.capacity {
            self.td_errors.pop_front();
        }
    }

    /// Mean episode return over the last N episodes.
    pub fn average_return(&self, last_n: usize) -> f64 {
        let n = self.episode_results.len().min(last_n);
        if n == 0 {
            return 0.0;
        }
        let sum: f64 = self
            .episode_results
            .iter()
            .rev()
            .take(n)
            .map(|r| r.total_return)
            .sum();
        sum / n as f64
    }

    /// Average episode length over the last N episodes.
    pub fn average_length(&self, last_n: usize) -> f64 {
        let n = self.episode_results.len().min(last_n);
        if n == 0 {
            return 0.0;
        }
        let total: usize = self
            .episode_results
            .iter()
            .rev()
            .take(n)
            .map(|r| r.length)
            .sum();
        total as f64 / n as f64
    }

    /// Mean absolute TD error over the last N recorded values.
    pub fn average_td_error(&self, last_n: usize) -> f64 {
        let n = self.td_errors.len().min(last_n);
        if n == 0 {
            return 0.0;
        }
        let sum: f64 = self.td_errors.iter().rev().take(n).map(|e| e.abs()).sum();
        sum / n as f64
    }

    pub fn last_td_error(&self) -> Option<f64> {
        self.td_errors.back().copied()
    }

    pub fn total_episodes(&self) -> usize {
        self.total_episodes
    }
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::new()
    }
}
