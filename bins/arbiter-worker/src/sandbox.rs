/// Sandboxed Execution - Task in, TaskResult out
///
/// **Critical Architectural Boundary:**
/// - The sandbox knows HOW to isolate and run a program (bubblewrap)
/// - It does NOT know languages, test cases or verdicts
/// - A program that crashes, hangs or prints garbage is a normal
///   `TaskResult`; only failing to start the sandbox is an error
///
/// **Isolation:**
/// The filesystem seen by the program is built only from the task's bind
/// mounts. The sandbox dies with its parent, so a killed worker leaves no
/// orphaned programs behind.
use crate::process;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_BWRAP_PATH: &str = "/usr/bin/bwrap";
pub const DEFAULT_PATH_ENV: &str = "/usr/local/bin:/usr/bin:/bin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl BindMount {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Mount a host path at the same location inside the sandbox
    pub fn same(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            source: path.clone(),
            target: path,
        }
    }
}

/// One fully specified program invocation
#[derive(Debug, Clone, Default)]
pub struct Task {
    pub argv: Vec<String>,
    pub stdin: Vec<u8>,
    pub cwd: Option<PathBuf>,
    pub ro_binds: Vec<BindMount>,
    pub binds: Vec<BindMount>,
    pub unshare_all: bool,
    /// Bytes
    pub memory_limit: Option<u64>,
    pub time_limit: Option<Duration>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` only when the task timed out
    pub return_code: Option<i32>,
    pub elapsed: Duration,
    pub timed_out: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("task has an empty argument vector")]
    EmptyArgv,

    #[error("failed to start sandbox {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn execute(&self, task: Task) -> Result<TaskResult, SandboxError>;
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub bwrap_path: PathBuf,
    /// PATH given to programs whose task does not set one
    pub default_path: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            bwrap_path: PathBuf::from(DEFAULT_BWRAP_PATH),
            default_path: DEFAULT_PATH_ENV.to_string(),
        }
    }
}

/// Bubblewrap-backed sandbox
#[derive(Debug, Clone)]
pub struct BwrapSandbox {
    config: SandboxConfig,
}

impl BwrapSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// bwrap arguments for a task, argv last
    pub fn arguments(&self, task: &Task) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--die-with-parent".into()];

        for mount in &task.ro_binds {
            args.push("--ro-bind".into());
            args.push(mount.source.clone().into());
            args.push(mount.target.clone().into());
        }

        for mount in &task.binds {
            args.push("--bind".into());
            args.push(mount.source.clone().into());
            args.push(mount.target.clone().into());
        }

        if task.unshare_all {
            args.push("--unshare-all".into());
        }

        if let Some(cwd) = &task.cwd {
            args.push("--chdir".into());
            args.push(cwd.clone().into());
        }

        args.extend(task.argv.iter().map(OsString::from));
        args
    }

    fn command(&self, task: &Task) -> Command {
        let mut command = Command::new(&self.config.bwrap_path);
        command.args(self.arguments(task));

        command.env_clear();
        if !task.env.contains_key("PATH") {
            command.env("PATH", &self.config.default_path);
        }
        command.envs(&task.env);

        if let Some(bytes) = task.memory_limit {
            process::limit_memory(&mut command, bytes);
        }
        command
    }
}

#[async_trait]
impl Sandbox for BwrapSandbox {
    #[instrument(skip(self, task), fields(program = ?task.argv.first(), time_limit = ?task.time_limit))]
    async fn execute(&self, task: Task) -> Result<TaskResult, SandboxError> {
        if task.argv.is_empty() {
            return Err(SandboxError::EmptyArgv);
        }

        let command = self.command(&task);
        let result = process::supervise(command, &task.stdin, task.time_limit)
            .await
            .map_err(|source| SandboxError::Spawn {
                program: self.config.bwrap_path.display().to_string(),
                source,
            })?;

        debug!(
            return_code = ?result.return_code,
            timed_out = result.timed_out,
            elapsed_ms = result.elapsed.as_millis() as u64,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            "Task finished"
        );
        Ok(result)
    }
}
