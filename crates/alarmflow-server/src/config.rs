use alarmflow_alert::shield::ShieldRule;
use alarmflow_alert::CoreSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Task workers sharing the backends, each with its own session.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Queue polling period of every worker.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Period of the live-alert scan that feeds lifecycle cycles.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Snowflake machine id (0-31), unique per process.
    #[serde(default = "default_machine_id")]
    pub machine_id: i32,
    /// Strategy snapshots served by the in-memory strategy store.
    #[serde(default)]
    pub strategies_file: Option<String>,
    #[serde(default)]
    pub shields: Vec<ShieldRule>,
    #[serde(flatten)]
    pub core: CoreSettings,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            tick_secs: default_tick_secs(),
            scan_interval_secs: default_scan_interval_secs(),
            machine_id: default_machine_id(),
            strategies_file: None,
            shields: Vec::new(),
            core: CoreSettings::default(),
        }
    }
}

fn default_workers() -> usize {
    2
}

fn default_tick_secs() -> u64 {
    1
}

fn default_scan_interval_secs() -> u64 {
    60
}

fn default_machine_id() -> i32 {
    1
}

impl WorkerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config '{path}': {e}"))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if !(0..32).contains(&config.machine_id) {
            anyhow::bail!("machine_id must be within 0-31, got {}", config.machine_id);
        }
        Ok(config)
    }
}
