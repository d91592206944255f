//! Configuration loader for taskloom.
//!
//! Reads `config.toml` from the data directory (`~/.taskloom/` by default)
//! and deserializes it into [`TaskloomConfig`]. A missing file means defaults.

use std::path::{Path, PathBuf};

use taskloom_types::config::TaskloomConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TASKLOOM_DATA_DIR";

/// Environment variable overriding `[server].run_secret`.
pub const RUN_SECRET_ENV: &str = "TASKLOOM_RUN_SECRET";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`TaskloomConfig::default()`].
/// - If the file exists but cannot be read or parsed, returns an error so the
///   caller can report it once logging is up and fall back to the default.
///
/// `TASKLOOM_RUN_SECRET` is applied on top of whatever was loaded.
pub async fn load_config(data_dir: &Path) -> Result<TaskloomConfig, ConfigError> {
    let mut config = read_config_file(&data_dir.join("config.toml")).await?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Apply `TASKLOOM_*` environment overrides to an already-built config.
pub fn apply_env_overrides(config: &mut TaskloomConfig) {
    apply_run_secret(config, std::env::var(RUN_SECRET_ENV).ok());
}

async fn read_config_file(config_path: &Path) -> Result<TaskloomConfig, ConfigError> {
    let content = match tokio::fs::read_to_string(config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return Ok(TaskloomConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: config_path.display().to_string(),
                source,
            });
        }
    };

    toml::from_str::<TaskloomConfig>(&content).map_err(|source| ConfigError::Parse {
        path: config_path.display().to_string(),
        source,
    })
}

/// A non-empty secret from the environment wins over the file.
fn apply_run_secret(config: &mut TaskloomConfig, from_env: Option<String>) {
    if let Some(secret) = from_env.filter(|s| !s.trim().is_empty()) {
        config.server.run_secret = Some(secret);
    }
}

/// Resolve the data directory.
///
/// Priority:
/// 1. `TASKLOOM_DATA_DIR` environment variable
/// 2. `~/.taskloom`
/// 3. `./.taskloom`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".taskloom");
    }

    PathBuf::from(".taskloom")
}

/// SQLite URL for the job database inside `data_dir`.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join("taskloom.db").display())
}
