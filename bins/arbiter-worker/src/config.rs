// Worker settings, read from the environment on top of the shared ones
use crate::orchestrator::{GraderSettings, DEFAULT_MEMORY_LIMIT};
use crate::runner::RunnerSettings;
use crate::sandbox::{SandboxConfig, DEFAULT_BWRAP_PATH, DEFAULT_PATH_ENV};
use anyhow::{bail, Result};
use arbiter_common::config::{env_or, env_parse, Config};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 2;
pub const DEFAULT_COMPILE_TIME_LIMIT_SECS: u64 = 30;
/// How long one BLPOP waits before checking for shutdown
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub common: Config,
    pub concurrency: usize,
    pub bwrap_path: PathBuf,
    pub default_memory_limit: u64,
    pub compile_time_limit: Duration,
    pub scratch_dir: Option<PathBuf>,
    pub poll_timeout: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            common: Config::from_env(),
            concurrency: env_parse("WORKER_CONCURRENCY", DEFAULT_CONCURRENCY)?,
            bwrap_path: PathBuf::from(env_or("BWRAP_PATH", DEFAULT_BWRAP_PATH)),
            default_memory_limit: env_parse("DEFAULT_MEMORY_LIMIT", DEFAULT_MEMORY_LIMIT)?,
            compile_time_limit: Duration::from_secs(env_parse(
                "COMPILE_TIME_LIMIT",
                DEFAULT_COMPILE_TIME_LIMIT_SECS,
            )?),
            scratch_dir: std::env::var("ARBITER_SCRATCH_DIR").ok().map(PathBuf::from),
            poll_timeout: Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("WORKER_CONCURRENCY must be at least 1");
        }
        if self.default_memory_limit == 0 {
            bail!("DEFAULT_MEMORY_LIMIT must be positive");
        }
        if self.compile_time_limit.is_zero() {
            bail!("COMPILE_TIME_LIMIT must be positive");
        }
        Ok(())
    }

    pub fn sandbox(&self) -> SandboxConfig {
        SandboxConfig {
            bwrap_path: self.bwrap_path.clone(),
            default_path: DEFAULT_PATH_ENV.to_string(),
        }
    }

    pub fn grader(&self) -> GraderSettings {
        GraderSettings {
            bucket: self.common.bucket.clone(),
            default_memory_limit: self.default_memory_limit,
            runner: RunnerSettings {
                compile_time_limit: self.compile_time_limit,
                scratch_dir: self.scratch_dir.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WorkerConfig {
        WorkerConfig {
            common: Config::from_env(),
            concurrency: 4,
            bwrap_path: PathBuf::from("/opt/bwrap"),
            default_memory_limit: 1 << 20,
            compile_time_limit: Duration::from_secs(10),
            scratch_dir: Some(PathBuf::from("/scratch")),
            poll_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());

        let mut zero_workers = config();
        zero_workers.concurrency = 0;
        assert!(zero_workers.validate().is_err());

        let mut zero_compile = config();
        zero_compile.compile_time_limit = Duration::ZERO;
        assert!(zero_compile.validate().is_err());
    }

    #[test]
    fn test_settings_are_forwarded() {
        let config = config();
        assert_eq!(config.sandbox().bwrap_path, PathBuf::from("/opt/bwrap"));

        let grader = config.grader();
        assert_eq!(grader.default_memory_limit, 1 << 20);
        assert_eq!(grader.runner.compile_time_limit, Duration::from_secs(10));
        assert_eq!(grader.runner.scratch_dir, Some(PathBuf::from("/scratch")));
    }
}
