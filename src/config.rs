use std::path::Path;

use crate::ai::algorithms::{
    DpConfig, DpgConfig, DqnConfig, ReinforceConfig, TdConfig,
};
use crate::checkpoint::CheckpointManagerConfig;
use crate::error::ConfigError;
use crate::evolution::{EspConfig, GaConfig};
use crate::training::runner::TrainingConfig;

/// Top-level application configuration, loadable from TOML.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dp: DpConfig,
    pub td: TdConfig,
    pub dqn: DqnConfig,
    pub reinforce: ReinforceConfig,
    pub recurrent_reinforce: ReinforceConfig,
    pub dpg: DpgConfig,
    pub ga: GaConfig,
    pub esp: EspConfig,
    pub training: TrainingConfig,
    pub checkpoint: CheckpointManagerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            dp: DpConfig::default(),
            td: TdConfig::default(),
            dqn: DqnConfig::default(),
            reinforce: ReinforceConfig::default(),
            recurrent_reinforce: ReinforceConfig::recurrent(),
            dpg: DpgConfig::default(),
            ga: GaConfig::default(),
            esp: EspConfig::default(),
            training: TrainingConfig::default(),
            checkpoint: CheckpointManagerConfig::default(),
        }
    }
}

fn check_unit(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{name} must be in [0, 1]")))
    }
}

fn check_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{name} must be > 0")))
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("dp.gamma", self.dp.gamma)?;

        check_unit("td.gamma", self.td.gamma)?;
        check_unit("td.epsilon", self.td.epsilon)?;
        check_positive("td.alpha", self.td.alpha)?;
        check_unit("td.beta", self.td.beta)?;
        check_unit("td.lambda", self.td.lambda)?;

        check_unit("dqn.gamma", self.dqn.gamma)?;
        check_unit("dqn.epsilon", self.dqn.epsilon)?;
        check_positive("dqn.alpha", self.dqn.alpha)?;
        if self.dqn.experience_size == 0 {
            return Err(ConfigError::Validation(
                "dqn.experience_size must be > 0".into(),
            ));
        }
        if self.dqn.num_hidden_units == 0 {
            return Err(ConfigError::Validation(
                "dqn.num_hidden_units must be > 0".into(),
            ));
        }
        check_positive("dqn.td_error_clamp", self.dqn.td_error_clamp)?;

        for (section, pg) in [
            ("reinforce", &self.reinforce),
            ("recurrent_reinforce", &self.recurrent_reinforce),
        ] {
            check_unit(&format!("{section}.gamma"), pg.gamma)?;
            check_positive(&format!("{section}.alpha"), pg.alpha)?;
            check_positive(&format!("{section}.beta"), pg.beta)?;
            if pg.num_hidden_units == 0 {
                return Err(ConfigError::Validation(format!(
                    "{section}.num_hidden_units must be > 0"
                )));
            }
            if pg.n_use == 0 || pg.n_use > pg.n_up {
                return Err(ConfigError::Validation(format!(
                    "{section}.n_use must be in [1, {section}.n_up]"
                )));
            }
            if pg.action_noise_std < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "{section}.action_noise_std must be >= 0"
                )));
            }
        }

        check_unit("dpg.gamma", self.dpg.gamma)?;
        check_unit("dpg.epsilon", self.dpg.epsilon)?;
        check_positive("dpg.alpha", self.dpg.alpha)?;
        check_positive("dpg.beta", self.dpg.beta)?;
        check_positive("dpg.action_clamp", self.dpg.action_clamp)?;
        check_positive("dpg.td_error_clamp", self.dpg.td_error_clamp)?;
        if self.dpg.num_hidden_units == 0 {
            return Err(ConfigError::Validation(
                "dpg.num_hidden_units must be > 0".into(),
            ));
        }

        self.ga.validate()?;
        self.esp.validate()?;

        if self.training.num_episodes == 0 {
            return Err(ConfigError::Validation(
                "training.num_episodes must be > 0".into(),
            ));
        }
        if self.training.max_steps == 0 {
            return Err(ConfigError::Validation(
                "training.max_steps must be > 0".into(),
            ));
        }
        if self.training.log_interval == 0 {
            return Err(ConfigError::Validation(
                "training.log_interval must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a TOML string with all default values (useful for creating
    /// example config files).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&AppConfig::default()).unwrap_or_default()
    }
}
