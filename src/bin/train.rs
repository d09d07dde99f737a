use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use ml_reinforce::ai::algorithms::{DpAgent, DqnAgent, TdAgent};
use ml_reinforce::ai::{Agent, AgentState};
use ml_reinforce::checkpoint::{CheckpointManager, CheckpointMetrics};
use ml_reinforce::config::AppConfig;
use ml_reinforce::env::{Corridor, Environment};
use ml_reinforce::evolution::{FeedForwardNet, GaTrainer, Genome};
use ml_reinforce::training::metrics::TrainingMetrics;
use ml_reinforce::training::runner::{EpisodeRunner, TrainingConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    Dp,
    Td,
    Dqn,
    Ga,
}

/// Train an agent on the corridor world.
#[derive(Parser)]
#[command(name = "train", about = "Train an RL agent on a corridor world")]
struct Cli {
    #[arg(long, value_enum, default_value = "td")]
    algorithm: AlgorithmArg,

    /// Resume training from the latest checkpoint
    #[arg(long)]
    resume: bool,

    /// Path to TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override number of training episodes (generations for ga)
    #[arg(long)]
    episodes: Option<usize>,

    #[arg(long, default_value_t = 10)]
    corridor_length: usize,

    /// Override the checkpoint directory
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut app_config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    if let Some(episodes) = cli.episodes {
        app_config.training.num_episodes = episodes;
    }
    if let Some(dir) = &cli.checkpoint_dir {
        app_config.checkpoint.checkpoint_dir = dir.clone();
    }
    app_config.validate().context("validating configuration")?;
    anyhow::ensure!(
        cli.corridor_length >= 2,
        "--corridor-length must be at least 2"
    );

    let env = Corridor::new(cli.corridor_length);
    let manager = CheckpointManager::new(app_config.checkpoint.clone());

    match cli.algorithm {
        AlgorithmArg::Dp => {
            let agent = DpAgent::new(env, app_config.dp.clone()).context("building DP agent")?;
            run_agent(agent, env, &app_config.training, &manager, cli.resume)
        }
        AlgorithmArg::Td => {
            let agent = TdAgent::new(env, app_config.td.clone()).context("building TD agent")?;
            run_agent(agent, env, &app_config.training, &manager, cli.resume)
        }
        AlgorithmArg::Dqn => {
            let agent = DqnAgent::new(
                env.num_states(),
                env.max_num_actions(),
                app_config.dqn.clone(),
            );
            run_agent(agent, env, &app_config.training, &manager, cli.resume)
        }
        AlgorithmArg::Ga => run_ga(env, &app_config, &manager, cli.resume),
    }
}

fn run_agent<A: Agent>(
    mut agent: A,
    env: Corridor,
    training: &TrainingConfig,
    manager: &CheckpointManager,
    resume: bool,
) -> Result<()> {
    let mut start_episode = 1;
    if resume {
        match manager.load_latest() {
            Ok(data) => {
                agent
                    .load_state(data.state)
                    .context("restoring agent from checkpoint")?;
                start_episode = data.metadata.step + 1;
                tracing::info!(step = data.metadata.step, "resumed from checkpoint");
            }
            Err(e) => tracing::info!(error = %e, "no checkpoint found, starting fresh"),
        }
    }

    let runner = EpisodeRunner::new(env, training.clone()).with_checkpoints(manager);
    let mut metrics = TrainingMetrics::with_capacity(training.log_interval.max(1));
    runner
        .run(&mut agent, &mut metrics, start_episode)
        .with_context(|| format!("training {}", agent.name()))?;

    print_greedy_path(&env, &mut agent)
}

/// Walk the corridor once with the trained agent and report where it went.
fn print_greedy_path<A: Agent>(env: &Corridor, agent: &mut A) -> Result<()> {
    let runner = EpisodeRunner::new(
        *env,
        TrainingConfig {
            max_steps: env.num_states() * 4,
            ..Default::default()
        },
    );
    let result = runner.run_episode(agent)?;
    tracing::info!(
        steps = result.length,
        total_return = result.total_return,
        optimal_steps = env.goal(),
        "evaluation episode"
    );
    Ok(())
}

/// Scores a network policy: input is the position scaled to [0, 1], a
/// positive output steps right.
fn corridor_fitness(env: &Corridor, net: &FeedForwardNet, max_steps: usize) -> f64 {
    let mut state = env.start_state();
    let mut total = 0.0;
    let mut steps = 0;
    while steps < max_steps && !env.is_terminal(state) {
        let x = state as f64 / env.goal() as f64;
        let action = if net.forward(&[x])[0] > 0.0 {
            Corridor::RIGHT
        } else {
            Corridor::LEFT
        };
        let next = env.next_state_distribution(state, action);
        total += env.reward(state, action, next);
        state = next;
        steps += 1;
    }
    total - steps as f64 / max_steps as f64
}

fn run_ga(
    env: Corridor,
    config: &AppConfig,
    manager: &CheckpointManager,
    resume: bool,
) -> Result<()> {
    let mut start = 1;
    let mut init_gene: Option<Vec<f64>> = None;
    if resume {
        match manager.load_latest() {
            Ok(data) => {
                let gene: Vec<f64> = data.state.decode("GA").context("decoding GA checkpoint")?;
                start = data.metadata.step + 1;
                init_gene = Some(gene);
                tracing::info!(step = data.metadata.step, "resumed from checkpoint");
            }
            Err(e) => tracing::info!(error = %e, "no checkpoint found, starting fresh"),
        }
    }

    let training = &config.training;
    let mut trainer = GaTrainer::new(
        FeedForwardNet::ga_default(),
        config.ga.clone(),
        init_gene.as_deref(),
    )
    .context("building GA trainer")?;

    let end = start + training.num_episodes;
    for generation in start..end {
        let best = trainer.train(|net| corridor_fitness(&env, net, training.max_steps));
        if generation % training.log_interval.max(1) == 0 {
            tracing::info!(generation, best, record = trainer.best_fitness(), "GA generation");
        }
        if training.checkpoint_interval > 0 && generation % training.checkpoint_interval == 0 {
            let state = AgentState::new("GA", &trainer.net().gene())?;
            let metrics = CheckpointMetrics {
                mean_return: best,
                mean_length: 0.0,
                mean_td_error: 0.0,
                total_episodes: generation,
            };
            if let Err(e) = manager.save_checkpoint(&state, &metrics, generation) {
                tracing::warn!(generation, error = %e, "checkpoint failed");
            }
        }
    }

    let score = corridor_fitness(&env, trainer.net(), training.max_steps);
    tracing::info!(score, "final incumbent fitness");
    Ok(())
}
