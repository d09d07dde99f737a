use serde::{Deserialize, Serialize};

use crate::ai::state_encoding::observe;
use crate::ai::Agent;
use crate::checkpoint::{CheckpointManager, CheckpointMetrics};
use crate::env::Environment;
use crate::error::{AgentError, CheckpointError};
use crate::training::metrics::{EpisodeResult, TrainingMetrics};

/// Episode loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub num_episodes: usize,
    pub max_steps: usize,
    pub log_interval: usize,
    /// Episodes between checkpoints; 0 disables checkpointing.
    pub checkpoint_interval: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            num_episodes: 500,
            max_steps: 200,
            log_interval: 100,
            checkpoint_interval: 100,
        }
    }
}

/// Drives an [`Agent`] through episodes of an [`Environment`].
pub struct EpisodeRunner<'a, E> {
    env: E,
    config: TrainingConfig,
    checkpoints: Option<&'a CheckpointManager>,
}

impl<'a, E: Environment> EpisodeRunner<'a, E> {
    pub fn new(env: E, config: TrainingConfig) -> Self {
        EpisodeRunner {
            env,
            config,
            checkpoints: None,
        }
    }

    /// Save a checkpoint every `checkpoint_interval` episodes.
    pub fn with_checkpoints(mut self, manager: &'a CheckpointManager) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Play one episode from the start state.
    ///
    /// Reaching a terminal state gives the agent one last `act` so it sees
    /// the terminal observation, followed by `learn(0.0)`.
    pub fn run_episode<A: Agent + ?Sized>(
        &self,
        agent: &mut A,
    ) -> Result<EpisodeResult, AgentError> {
        let num_states = self.env.num_states();
        let mut state = self.env.start_state();
        let mut total_return = 0.0;
        let mut length = 0;

        while length < self.config.max_steps {
            let obs = observe(state, num_states, agent.observation_kind());
            let action = agent
                .act(&obs)?
                .discrete()
                .ok_or(AgentError::ContinuousAction { agent: agent.name() })?;

            if self.env.is_terminal(state) {
                agent.learn(0.0)?;
                break;
            }

            let next = self.env.next_state_distribution(state, action);
            let reward = self.env.reward(state, action, next);
            agent.learn(reward)?;

            total_return += reward;
            length += 1;
            state = next;
        }
        agent.reset_episode();

        Ok(EpisodeResult {
            total_return,
            length,
        })
    }

    /// Run `num_episodes` episodes numbered from `start_episode`, returning
    /// the number of the last one played.
    pub fn run<A: Agent + ?Sized>(
        &self,
        agent: &mut A,
        metrics: &mut TrainingMetrics,
        start_episode: usize,
    ) -> Result<usize, AgentError> {
        let end_episode = start_episode + self.config.num_episodes;
        tracing::info!(
            agent = agent.name(),
            episodes = self.config.num_episodes,
            start_episode,
            "starting training"
        );

        for episode in start_episode..end_episode {
            let result = self.run_episode(agent)?;
            metrics.record_episode(result);
            if let Some(td) = agent.last_td_error() {
                metrics.record_td_error(td);
            }

            let window = self.config.log_interval.max(1);
            if episode % window == 0 {
                tracing::info!(
                    episode,
                    last_episode = end_episode - 1,
                    mean_return = metrics.average_return(window),
                    mean_length = metrics.average_length(window),
                    td_error = metrics.average_td_error(window),
                    "episode window"
                );
            }

            if self.config.checkpoint_interval > 0 && episode % self.config.checkpoint_interval == 0
            {
                self.checkpoint(agent, metrics, episode);
            }
        }

        tracing::info!(
            total_episodes = metrics.total_episodes(),
            "training complete"
        );
        Ok(end_episode.saturating_sub(1))
    }

    // Checkpoint failures are logged and training continues.
    fn checkpoint<A: Agent + ?Sized>(&self, agent: &A, metrics: &TrainingMetrics, episode: usize) {
        let Some(manager) = self.checkpoints else {
            return;
        };
        let window = self.config.log_interval.max(1);
        let ckpt_metrics = CheckpointMetrics {
            mean_return: metrics.average_return(window),
            mean_length: metrics.average_length(window),
            mean_td_error: metrics.average_td_error(window),
            total_episodes: metrics.total_episodes(),
        };
        let saved = agent
            .save_state()
            .map_err(CheckpointError::from)
            .and_then(|state| manager.save_checkpoint(&state, &ckpt_metrics, episode));
        if let Err(e) = saved {
            tracing::warn!(episode, error = %e, "checkpoint failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{Action, AgentState, Observation, ObservationKind};
    use crate::checkpoint::CheckpointManagerConfig;
    use crate::env::Corridor;

    /// Always steps right and records what it was shown.
    #[derive(Default)]
    struct Scripted {
        seen: Vec<Observation>,
        rewards: Vec<f64>,
        resets: usize,
        continuous: bool,
    }

    impl Agent for Scripted {
        fn name(&self) -> &'static str {
            "Scripted"
        }
        fn observation_kind(&self) -> ObservationKind {
            ObservationKind::StateIndex
        }
        fn act(&mut self, observation: &Observation) -> Result<Action, AgentError> {
            self.seen.push(observation.clone());
            if self.continuous {
                Ok(Action::Continuous(vec![0.0]))
            } else {
                Ok(Action::Discrete(Corridor::RIGHT))
            }
        }
        fn learn(&mut self, reward: f64) -> Result<(), AgentError> {
            self.rewards.push(reward);
            Ok(())
        }
        fn reset_episode(&mut self) {
            self.resets += 1;
        }
        fn last_td_error(&self) -> Option<f64> {
            Some(0.5)
        }
        fn save_state(&self) -> Result<AgentState, AgentError> {
            AgentState::new("Scripted", &self.resets)
        }
        fn load_state(&mut self, state: AgentState) -> Result<(), AgentError> {
            self.resets = state.decode("Scripted")?;
            Ok(())
        }
    }

    #[test]
    fn test_episode_reaches_goal() {
        let runner = EpisodeRunner::new(Corridor::new(4), TrainingConfig::default());
        let mut agent = Scripted::default();
        let result = runner.run_episode(&mut agent).unwrap();

        assert_eq!(result.length, 3);
        assert_eq!(result.total_return, 1.0);
        // terminal state is observed, then a zero reward closes the episode
        assert_eq!(agent.seen.last(), Some(&Observation::State(3)));
        assert_eq!(agent.rewards, vec![0.0, 0.0, 1.0, 0.0]);
        assert_eq!(agent.resets, 1);
    }

    #[test]
    fn test_episode_truncated_at_max_steps() {
        let config = TrainingConfig {
            max_steps: 2,
            ..Default::default()
        };
        let runner = EpisodeRunner::new(Corridor::new(10), config);
        let mut agent = Scripted::default();
        let result = runner.run_episode(&mut agent).unwrap();
        assert_eq!(result.length, 2);
        assert_eq!(result.total_return, 0.0);
        assert_eq!(agent.resets, 1);
    }

    #[test]
    fn test_continuous_action_rejected() {
        let runner = EpisodeRunner::new(Corridor::new(4), TrainingConfig::default());
        let mut agent = Scripted {
            continuous: true,
            ..Default::default()
        };
        let err = runner.run_episode(&mut agent).unwrap_err();
        assert!(matches!(
            err,
            AgentError::ContinuousAction { agent: "Scripted" }
        ));
    }

    #[test]
    fn test_run_records_metrics() {
        let config = TrainingConfig {
            num_episodes: 5,
            checkpoint_interval: 0,
            ..Default::default()
        };
        let runner = EpisodeRunner::new(Corridor::new(3), config);
        let mut agent = Scripted::default();
        let mut metrics = TrainingMetrics::new();

        let last = runner.run(&mut agent, &mut metrics, 1).unwrap();
        assert_eq!(last, 5);
        assert_eq!(metrics.total_episodes(), 5);
        assert_eq!(metrics.average_return(5), 1.0);
        assert_eq!(metrics.average_length(5), 2.0);
        assert_eq!(metrics.last_td_error(), Some(0.5));
    }

    #[test]
    fn test_run_saves_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(CheckpointManagerConfig {
            checkpoint_dir: dir.path().to_path_buf(),
            keep_last_n: 10,
            keep_best_n: 10,
        });
        let config = TrainingConfig {
            num_episodes: 6,
            checkpoint_interval: 2,
            ..Default::default()
        };
        let runner = EpisodeRunner::new(Corridor::new(3), config).with_checkpoints(&manager);
        let mut agent = Scripted::default();
        let mut metrics = TrainingMetrics::new();
        runner.run(&mut agent, &mut metrics, 1).unwrap();

        let steps: Vec<usize> = manager
            .list_checkpoints()
            .unwrap()
            .iter()
            .map(|(_, m)| m.step)
            .collect();
        assert_eq!(steps, vec![2, 4, 6]);
        let latest = manager.load_latest().unwrap();
        assert_eq!(latest.metadata.algorithm, "Scripted");
        assert_eq!(latest.metadata.metrics.total_episodes, 6);
    }
}
