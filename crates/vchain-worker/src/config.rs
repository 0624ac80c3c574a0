//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ChainError, WorkerResult};

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Lower bound for the admission tick.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(100);
/// Lower bound for the work directory sweep.
pub const MIN_RECLAIM_INTERVAL: Duration = Duration::from_secs(1);

/// Status polling schedule for one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Wait before the first status query
    pub initial_interval: Duration,
    /// Interval multiplier applied after every tick
    pub backoff_factor: f64,
    /// Upper bound for the interval
    pub max_interval: Duration,
    /// Status queries before the segment times out
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(10),
            backoff_factor: 1.5,
            max_interval: Duration::from_secs(60),
            max_attempts: 60,
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Chains processed at the same time
    pub max_concurrent: usize,
    /// Queue admission interval
    pub tick_interval: Duration,
    /// Root for per-chain working directories
    pub work_dir: PathBuf,
    pub poll: PollConfig,
    /// Automatic re-runs after a failure
    pub max_auto_retries: u32,
    /// How often failed work directories are swept
    pub reclaim_interval: Duration,
    /// Age after which a failed chain's directory may be removed
    pub reclaim_retention: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            tick_interval: Duration::from_secs(2),
            work_dir: PathBuf::from("/tmp/vchain"),
            poll: PollConfig::default(),
            max_auto_retries: 1,
            reclaim_interval: Duration::from_secs(3600),
            reclaim_retention: Duration::from_secs(24 * 3600),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Clamp values that would stall or panic the timers.
    pub fn normalized(mut self) -> Self {
        self.max_concurrent = self.max_concurrent.max(1);
        self.tick_interval = self.tick_interval.max(MIN_TICK_INTERVAL);
        self.reclaim_interval = self.reclaim_interval.max(MIN_RECLAIM_INTERVAL);
        self
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent: env_or("WORKER_MAX_CONCURRENT", defaults.max_concurrent),
            tick_interval: Duration::from_millis(env_or("WORKER_TICK_MS", 2000)),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            poll: PollConfig {
                initial_interval: Duration::from_millis(env_or("WORKER_POLL_INTERVAL_MS", 10_000)),
                max_interval: Duration::from_secs(env_or("WORKER_POLL_BACKOFF_CAP_SECS", 60)),
                max_attempts: env_or("WORKER_MAX_POLL_ATTEMPTS", defaults.poll.max_attempts),
                ..defaults.poll
            },
            max_auto_retries: env_or("WORKER_MAX_AUTO_RETRIES", defaults.max_auto_retries),
            reclaim_interval: Duration::from_secs(env_or("WORKER_RECLAIM_INTERVAL_SECS", 3600)),
            reclaim_retention: Duration::from_secs(env_or("WORKER_RECLAIM_RETENTION_SECS", 24 * 3600)),
            shutdown_timeout: Duration::from_secs(env_or("WORKER_SHUTDOWN_TIMEOUT", 30)),
        }
        .normalized()
    }
}

/// OpenAI-compatible API endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

impl OpenAiConfig {
    pub fn from_env() -> WorkerResult<Self> {
        Ok(Self {
            api_key: std::env::var("OPENAI_API_KEY")
                .map_err(|_| ChainError::config_error("OPENAI_API_KEY not set"))?,
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
        })
    }
}

/// Which LLM plans the segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerProvider {
    OpenAi,
    Gemini,
}

impl FromStr for PlannerProvider {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            other => Err(ChainError::config_error(format!(
                "unknown PLANNER_PROVIDER '{}'",
                other
            ))),
        }
    }
}

/// Planner LLM selection.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub provider: PlannerProvider,
    /// Model override; each client has its own default
    pub model: Option<String>,
}

impl PlannerConfig {
    pub fn from_env() -> WorkerResult<Self> {
        let provider = match std::env::var("PLANNER_PROVIDER") {
            Ok(value) => value.parse()?,
            Err(_) => PlannerProvider::OpenAi,
        };
        Ok(Self {
            provider,
            model: std::env::var("PLANNER_MODEL").ok().filter(|m| !m.is_empty()),
        })
    }
}
