// Process-wide grader configuration
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MEMORY_LIMIT_MB: u32 = 100;
pub const DEFAULT_CPU_LIMIT: f32 = 0.5;
pub const DEFAULT_PIDS_LIMIT: i64 = 10;

/// Isolation limits, timeouts and scheduling knobs.
///
/// Built once by the calling layer and treated as immutable afterwards.
/// `Default` reproduces the reference isolation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraderConfig {
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    pub pids_limit: i64,
    pub timeout_ms: u64,
    pub compile_timeout_ms: u64,
    pub workspace_root: PathBuf,
    pub max_parallel_tests: usize,
    pub compile_once: bool,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            cpu_limit: DEFAULT_CPU_LIMIT,
            pids_limit: DEFAULT_PIDS_LIMIT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            compile_timeout_ms: DEFAULT_TIMEOUT_MS,
            workspace_root: std::env::temp_dir().join("algorush-executions"),
            max_parallel_tests: 1,
            compile_once: false,
        }
    }
}

impl GraderConfig {
    /// Defaults overlaid with `ALGORUSH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        // CODE_EXECUTION_TIMEOUT_MS is the older name, kept for existing deployments.
        if let Some(v) = lookup("ALGORUSH_TIMEOUT_MS").or_else(|| lookup("CODE_EXECUTION_TIMEOUT_MS")) {
            config.timeout_ms = parse_var("ALGORUSH_TIMEOUT_MS", &v)?;
            config.compile_timeout_ms = config.timeout_ms;
        }
        if let Some(v) = lookup("ALGORUSH_COMPILE_TIMEOUT_MS") {
            config.compile_timeout_ms = parse_var("ALGORUSH_COMPILE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("ALGORUSH_MEMORY_LIMIT_MB") {
            config.memory_limit_mb = parse_var("ALGORUSH_MEMORY_LIMIT_MB", &v)?;
        }
        if let Some(v) = lookup("ALGORUSH_CPU_LIMIT") {
            config.cpu_limit = parse_var("ALGORUSH_CPU_LIMIT", &v)?;
        }
        if let Some(v) = lookup("ALGORUSH_PIDS_LIMIT") {
            config.pids_limit = parse_var("ALGORUSH_PIDS_LIMIT", &v)?;
        }
        if let Some(v) = lookup("ALGORUSH_WORKSPACE_ROOT") {
            config.workspace_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("ALGORUSH_MAX_PARALLEL_TESTS") {
            config.max_parallel_tests = parse_var("ALGORUSH_MAX_PARALLEL_TESTS", &v)?;
        }
        if let Some(v) = lookup("USE_COMPILE_ONCE") {
            config.compile_once = v.trim().eq_ignore_ascii_case("true");
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 || self.compile_timeout_ms == 0 {
            bail!("timeouts must be greater than zero");
        }
        if self.memory_limit_mb == 0 {
            bail!("memory limit must be greater than zero");
        }
        if !(self.cpu_limit > 0.0) {
            bail!("cpu limit must be positive, got {}", self.cpu_limit);
        }
        if self.pids_limit <= 0 {
            bail!("pids limit must be positive, got {}", self.pids_limit);
        }
        if self.max_parallel_tests == 0 {
            bail!("max_parallel_tests must be at least 1");
        }
        Ok(())
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        i64::from(self.memory_limit_mb) * 1024 * 1024
    }

    /// CPU share in Docker's nano-CPU units.
    pub fn nano_cpus(&self) -> i64 {
        (f64::from(self.cpu_limit) * 1_000_000_000.0) as i64
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {}: {:?}", name, value))
}
