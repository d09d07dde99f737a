use rand::rngs::StdRng;
use rand::Rng;

use crate::ai::sampling::make_rng;

/// Fixed-capacity ring buffer for storing training experiences.
///
/// Once full, each push overwrites the oldest entry and the write position
/// wraps back to zero.
pub struct ReplayBuffer<T> {
    buffer: Vec<T>,
    capacity: usize,
    position: usize,
    rng: StdRng,
}

impl<T: Clone> ReplayBuffer<T> {
    pub fn new(capacity: usize, seed: Option<u64>) -> Self {
        assert!(capacity > 0, "replay buffer capacity must be positive");
        ReplayBuffer {
            buffer: Vec::with_capacity(capacity),
            capacity,
            position: 0,
            rng: make_rng(seed),
        }
    }

    /// Rebuild a buffer from saved entries and write position.
    pub fn from_parts(capacity: usize, entries: Vec<T>, position: usize, seed: Option<u64>) -> Self {
        assert!(capacity > 0, "replay buffer capacity must be positive");
        let mut buffer = entries;
        buffer.truncate(capacity);
        let position = if buffer.len() < capacity {
            buffer.len()
        } else {
            position % capacity
        };
        ReplayBuffer {
            buffer,
            capacity,
            position,
            rng: make_rng(seed),
        }
    }

    /// Add an experience to the buffer. Overwrites oldest when full.
    pub fn push(&mut self, experience: T) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(experience);
        } else {
            self.buffer[self.position] = experience;
        }
        self.position = (self.position + 1) % self.capacity;
    }

    /// Uniformly random stored experience, drawn with replacement.
    pub fn sample_one(&mut self) -> Option<T> {
        if self.buffer.is_empty() {
            return None;
        }
        let i = self.rng.random_range(0..self.buffer.len());
        Some(self.buffer[i].clone())
    }

    pub fn entries(&self) -> &[T] {
        &self.buffer
    }

    /// Index the next push writes to.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
