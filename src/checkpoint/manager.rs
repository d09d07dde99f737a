use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ai::AgentState;
use crate::checkpoint::metadata::{CheckpointMetadata, CheckpointMetrics};
use crate::error::CheckpointError;

const STATE_FILE: &str = "agent_state.json";
const METADATA_FILE: &str = "metadata.json";

/// Configuration for the checkpoint manager.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CheckpointManagerConfig {
    pub checkpoint_dir: PathBuf,
    pub keep_last_n: usize,
    pub keep_best_n: usize,
}

impl Default for CheckpointManagerConfig {
    fn default() -> Self {
        CheckpointManagerConfig {
            checkpoint_dir: PathBuf::from("checkpoints"),
            keep_last_n: 5,
            keep_best_n: 3,
        }
    }
}

/// A checkpoint read back from disk.
#[derive(Debug)]
pub struct CheckpointData {
    pub path: PathBuf,
    pub metadata: CheckpointMetadata,
    pub state: AgentState,
}

/// Manages saving, loading, listing, and pruning checkpoints.
pub struct CheckpointManager {
    config: CheckpointManagerConfig,
}

impl CheckpointManager {
    pub fn new(config: CheckpointManagerConfig) -> Self {
        fs::create_dir_all(&config.checkpoint_dir).ok();
        CheckpointManager { config }
    }

    pub fn config(&self) -> &CheckpointManagerConfig {
        &self.config
    }

    /// Write `state` and its metadata to `checkpoint_{step:07}`, then move
    /// `latest` and prune.
    pub fn save_checkpoint(
        &self,
        state: &AgentState,
        metrics: &CheckpointMetrics,
        step: usize,
    ) -> Result<PathBuf, CheckpointError> {
        let dir_name = format!("checkpoint_{:07}", step);
        let tmp_dir = self.config.checkpoint_dir.join(format!("{}.tmp", dir_name));
        let final_dir = self.config.checkpoint_dir.join(&dir_name);

        fs::create_dir_all(&tmp_dir)?;
        fs::write(tmp_dir.join(STATE_FILE), serde_json::to_string(state)?)?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let metadata = CheckpointMetadata {
            step,
            timestamp,
            algorithm: state.algorithm.clone(),
            metrics: metrics.clone(),
        };
        fs::write(
            tmp_dir.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        if final_dir.exists() {
            fs::remove_dir_all(&final_dir)?;
        }
        fs::rename(&tmp_dir, &final_dir)?;

        self.update_latest_symlink(&dir_name)?;
        self.prune_old_checkpoints()?;

        tracing::info!(
            path = %final_dir.display(),
            algorithm = %state.algorithm,
            step,
            "checkpoint saved"
        );
        Ok(final_dir)
    }

    pub fn load_checkpoint(&self, dir: &Path) -> Result<CheckpointData, CheckpointError> {
        if !dir.is_dir() {
            return Err(CheckpointError::DirNotFound(dir.to_path_buf()));
        }
        let metadata = read_metadata(&dir.join(METADATA_FILE))?;
        let state_json = fs::read_to_string(dir.join(STATE_FILE))?;
        let state: AgentState = serde_json::from_str(&state_json)?;
        Ok(CheckpointData {
            path: dir.to_path_buf(),
            metadata,
            state,
        })
    }

    /// Load whatever `latest` points at.
    pub fn load_latest(&self) -> Result<CheckpointData, CheckpointError> {
        let latest_link = self.config.checkpoint_dir.join("latest");
        if !latest_link.exists() {
            return Err(CheckpointError::NoLatestSymlink(
                self.config.checkpoint_dir.clone(),
            ));
        }
        let resolved = fs::read_link(&latest_link)?;
        let target = if resolved.is_relative() {
            self.config.checkpoint_dir.join(resolved)
        } else {
            resolved
        };
        self.load_checkpoint(&target)
    }

    /// List all checkpoints sorted by step (ascending).
    pub fn list_checkpoints(&self) -> Result<Vec<(PathBuf, CheckpointMetadata)>, CheckpointError> {
        let mut results = Vec::new();
        for entry in fs::read_dir(&self.config.checkpoint_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if !name_str.starts_with("checkpoint_") || name_str.ends_with(".tmp") {
                continue;
            }
            let meta_path = path.join(METADATA_FILE);
            if meta_path.exists() {
                let metadata = read_metadata(&meta_path)?;
                results.push((path, metadata));
            }
        }
        results.sort_by_key(|(_, m)| m.step);
        Ok(results)
    }

    /// Keep the union of the last N by step and the best N by mean return.
    fn prune_old_checkpoints(&self) -> Result<(), CheckpointError> {
        let checkpoints = self.list_checkpoints()?;
        if checkpoints.len() <= self.config.keep_last_n {
            return Ok(());
        }

        let total = checkpoints.len();
        let mut keep: std::collections::HashSet<usize> =
            (total.saturating_sub(self.config.keep_last_n)..total).collect();

        let mut by_return: Vec<(usize, f64)> = checkpoints
            .iter()
            .enumerate()
            .map(|(i, (_, m))| (i, m.metrics.mean_return))
            .collect();
        by_return.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        for (i, _) in by_return.iter().take(self.config.keep_best_n) {
            keep.insert(*i);
        }

        for (i, (path, _)) in checkpoints.iter().enumerate() {
            if !keep.contains(&i) {
                tracing::debug!(path = %path.display(), "pruning checkpoint");
                fs::remove_dir_all(path)?;
            }
        }

        Ok(())
    }

    fn update_latest_symlink(&self, dir_name: &str) -> Result<(), CheckpointError> {
        let link_path = self.config.checkpoint_dir.join("latest");
        // dangling links fail exists() but still need removing
        if link_path.exists() || link_path.symlink_metadata().is_ok() {
            fs::remove_file(&link_path)?;
        }
        std::os::unix::fs::symlink(dir_name, &link_path)?;
        Ok(())
    }
}

fn read_metadata(path: &Path) -> Result<CheckpointMetadata, CheckpointError> {
    let json = fs::read_to_string(path).map_err(|e| CheckpointError::MetadataRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&json).map_err(|e| CheckpointError::MetadataParse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::algorithms::{TdAgent, TdConfig};
    use crate::ai::Agent;
    use crate::env::Corridor;

    fn test_metrics(mean_return: f64) -> CheckpointMetrics {
        CheckpointMetrics {
            mean_return,
            mean_length: 7.0,
            mean_td_error: 0.05,
            total_episodes: 100,
        }
    }

    fn manager(dir: &Path, keep_last_n: usize, keep_best_n: usize) -> CheckpointManager {
        CheckpointManager::new(CheckpointManagerConfig {
            checkpoint_dir: dir.to_path_buf(),
            keep_last_n,
            keep_best_n,
        })
    }

    fn agent_state() -> AgentState {
        let agent = TdAgent::new(Corridor::new(4), TdConfig::default()).unwrap();
        agent.save_state().unwrap()
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 5, 3);
        let state = agent_state();

        let path = manager
            .save_checkpoint(&state, &test_metrics(0.5), 1000)
            .unwrap();
        assert!(path.ends_with("checkpoint_0001000"));
        assert!(path.join("metadata.json").exists());
        assert!(path.join("agent_state.json").exists());

        let data = manager.load_checkpoint(&path).unwrap();
        assert_eq!(data.metadata.step, 1000);
        assert_eq!(data.metadata.algorithm, "TD");
        assert_eq!(data.state, state);

        let mut restored = TdAgent::new(Corridor::new(4), TdConfig::default()).unwrap();
        restored.load_state(data.state).unwrap();
    }

    #[test]
    fn test_latest_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 5, 3);
        let state = agent_state();

        manager.save_checkpoint(&state, &test_metrics(0.1), 1000).unwrap();
        manager.save_checkpoint(&state, &test_metrics(0.2), 2000).unwrap();

        let latest = manager.load_latest().unwrap();
        assert_eq!(latest.metadata.step, 2000);
    }

    #[test]
    fn test_list_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 10, 10);
        let state = agent_state();

        for step in [3000, 1000, 2000] {
            manager.save_checkpoint(&state, &test_metrics(0.0), step).unwrap();
        }

        let steps: Vec<usize> = manager
            .list_checkpoints()
            .unwrap()
            .iter()
            .map(|(_, m)| m.step)
            .collect();
        assert_eq!(steps, vec![1000, 2000, 3000]);
    }

    #[test]
    fn test_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 2, 1);
        let state = agent_state();

        let returns = [0.5, 0.9, 0.3, 0.6, 0.7];
        for (i, &r) in returns.iter().enumerate() {
            manager
                .save_checkpoint(&state, &test_metrics(r), (i + 1) * 1000)
                .unwrap();
        }

        // last 2 plus best 1
        let steps: Vec<usize> = manager
            .list_checkpoints()
            .unwrap()
            .iter()
            .map(|(_, m)| m.step)
            .collect();
        assert_eq!(steps, vec![2000, 4000, 5000]);
    }

    #[test]
    fn test_load_latest_no_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 5, 3);

        let err = manager.load_latest().unwrap_err();
        assert!(
            matches!(err, CheckpointError::NoLatestSymlink(_)),
            "expected NoLatestSymlink, got: {err}"
        );
    }

    #[test]
    fn test_load_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 5, 3);
        let err = manager
            .load_checkpoint(&dir.path().join("checkpoint_0000042"))
            .unwrap_err();
        assert!(matches!(err, CheckpointError::DirNotFound(_)));
    }

    #[test]
    fn test_corrupt_metadata_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 5, 3);
        let bad = dir.path().join("checkpoint_0000001");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join("metadata.json"), "{not json").unwrap();

        let err = manager.list_checkpoints().unwrap_err();
        assert!(matches!(err, CheckpointError::MetadataParse { .. }));
    }
}
