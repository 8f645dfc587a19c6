use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    /// Users whose broker sessions receive every fanned-out order.
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scheduler tick period in seconds.
    pub tick_interval_secs: u64,
    /// Upper bound on one user's broker call during fan-out.
    pub fanout_timeout_secs: u64,
    /// How many user sessions are dispatched to concurrently.
    pub fanout_concurrency: usize,
    pub error_policy: TickErrorPolicy,
}

/// What the scheduler does when processing one row fails mid-tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TickErrorPolicy {
    /// Log the row, keep going, only shared-resource failures stop the run.
    IsolateRows,
    /// Abort the whole scheduler on the first row error.
    FailStop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub user_id: String,
    pub lot_multiplier: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 1,
            fanout_timeout_secs: 5,
            fanout_concurrency: 4,
            error_policy: TickErrorPolicy::IsolateRows,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            users: Vec::new(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by merging a TOML file with `OPTEXEC_`-prefixed
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::from(figment::providers::Serialized::defaults(
            AppConfig::default(),
        ))
        .merge(Toml::file(path))
        .merge(Env::prefixed("OPTEXEC_").split("__"))
        .extract()?;

        Ok(config)
    }
}
