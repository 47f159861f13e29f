// Language runners: turn submitted sources into sandboxed Tasks
//
// A runner owns a private scratch workspace for its whole life:
//
//   <tmp>/sources/   submitted files
//   <tmp>/build/     compiler output (compiled languages only)
//
// The workspace is never shared between runners. `clean_up` consumes the
// runner; a runner dropped without it still removes its workspace.

use crate::sandbox::{BindMount, Sandbox, SandboxError, Task, TaskResult};
use arbiter_common::languages::{
    LanguageConfig, LanguageConfigManager, RunnerKind, ENTRY_PLACEHOLDER, SOURCES_PLACEHOLDER,
};
use arbiter_common::submission::is_plain_file_name;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::debug;

/// Mount point of the workspace inside the sandbox
pub const APP_DIR: &str = "/app";

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("no runner for language: {0}")]
    UnrecognizedLanguage(String),

    #[error("invalid source file name: {0:?}")]
    InvalidSourceName(String),

    #[error("submission has no source files")]
    NoSources,

    #[error("multi-file submission has no entry point {0:?}")]
    MissingEntryPoint(String),

    #[error("run requested before compile")]
    NotCompiled,

    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub compile_time_limit: Duration,
    /// Parent directory for workspaces, system temp dir when unset
    pub scratch_dir: Option<PathBuf>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            compile_time_limit: Duration::from_secs(30),
            scratch_dir: None,
        }
    }
}

struct Workspace {
    root: TempDir,
    sources: PathBuf,
}

impl Workspace {
    fn create(scratch_dir: Option<&Path>, with_build: bool) -> std::io::Result<Self> {
        let root = match scratch_dir {
            Some(dir) => tempfile::Builder::new().prefix("arbiter-").tempdir_in(dir)?,
            None => tempfile::Builder::new().prefix("arbiter-").tempdir()?,
        };
        let sources = root.path().join("sources");
        std::fs::create_dir(&sources)?;
        if with_build {
            std::fs::create_dir(root.path().join("build"))?;
        }
        Ok(Self { root, sources })
    }

    fn path(&self) -> &Path {
        self.root.path()
    }

    fn build(&self) -> PathBuf {
        self.root.path().join("build")
    }

    /// Write every file into `sources/`, returning the names in order
    async fn write_sources(
        &self,
        sources: &BTreeMap<String, Vec<u8>>,
    ) -> Result<Vec<String>, RunnerError> {
        if sources.is_empty() {
            return Err(RunnerError::NoSources);
        }
        if let Some(bad) = sources.keys().find(|name| !is_plain_file_name(name)) {
            return Err(RunnerError::InvalidSourceName(bad.clone()));
        }
        for (name, content) in sources {
            tokio::fs::write(self.sources.join(name), content).await?;
        }
        Ok(sources.keys().cloned().collect())
    }
}

/// Per-language template plus the sandbox it runs in
struct Toolchain {
    config: LanguageConfig,
    sandbox: Arc<dyn Sandbox>,
}

impl Toolchain {
    /// Toolchain mounts that exist on this host, then the extra mounts
    fn ro_binds(&self, extra: impl IntoIterator<Item = BindMount>) -> Vec<BindMount> {
        self.config
            .toolchain_binds
            .iter()
            .filter(|path| path.exists())
            .map(|path| BindMount::same(path.clone()))
            .chain(extra)
            .collect()
    }
}

pub struct CompiledRunner {
    toolchain: Toolchain,
    workspace: Workspace,
    compile_time_limit: Duration,
    compiled: bool,
}

impl CompiledRunner {
    async fn compile(
        &mut self,
        sources: &BTreeMap<String, Vec<u8>>,
    ) -> Result<Option<TaskResult>, RunnerError> {
        let names = self.workspace.write_sources(sources).await?;
        let paths: Vec<String> = names.iter().map(|name| format!("sources/{}", name)).collect();

        let argv = self
            .toolchain
            .config
            .compile
            .iter()
            .flat_map(|arg| {
                if arg == SOURCES_PLACEHOLDER {
                    paths.clone()
                } else {
                    vec![arg.clone()]
                }
            })
            .collect();

        let task = Task {
            argv,
            cwd: Some(PathBuf::from(APP_DIR)),
            ro_binds: self.toolchain.ro_binds(std::iter::empty()),
            binds: vec![BindMount::new(self.workspace.path(), APP_DIR)],
            unshare_all: true,
            time_limit: Some(self.compile_time_limit),
            env: self.toolchain.config.env.clone(),
            ..Default::default()
        };

        let result = self.toolchain.sandbox.execute(task).await?;
        self.compiled = true;
        Ok(Some(result))
    }

    async fn run(
        &self,
        stdin: &[u8],
        memory_limit: Option<u64>,
        time_limit: Duration,
    ) -> Result<TaskResult, RunnerError> {
        if !self.compiled {
            return Err(RunnerError::NotCompiled);
        }

        let task = Task {
            argv: self.toolchain.config.run.clone(),
            stdin: stdin.to_vec(),
            cwd: Some(PathBuf::from(APP_DIR)),
            ro_binds: self
                .toolchain
                .ro_binds([BindMount::new(self.workspace.build(), APP_DIR)]),
            unshare_all: true,
            memory_limit,
            time_limit: Some(time_limit),
            env: self.toolchain.config.env.clone(),
            ..Default::default()
        };

        Ok(self.toolchain.sandbox.execute(task).await?)
    }
}

pub struct InterpretedRunner {
    toolchain: Toolchain,
    workspace: Workspace,
    entry: Option<String>,
}

impl InterpretedRunner {
    /// Writes the sources; there is nothing to build
    async fn compile(
        &mut self,
        sources: &BTreeMap<String, Vec<u8>>,
    ) -> Result<Option<TaskResult>, RunnerError> {
        let names = self.workspace.write_sources(sources).await?;
        self.entry = Some(select_entry(&names, self.toolchain.config.entry_point.as_deref())?);
        Ok(None)
    }

    async fn run(
        &self,
        stdin: &[u8],
        memory_limit: Option<u64>,
        time_limit: Duration,
    ) -> Result<TaskResult, RunnerError> {
        let entry = self.entry.as_deref().ok_or(RunnerError::NotCompiled)?;
        let argv = self
            .toolchain
            .config
            .run
            .iter()
            .map(|arg| arg.replace(ENTRY_PLACEHOLDER, entry))
            .collect();

        let task = Task {
            argv,
            stdin: stdin.to_vec(),
            cwd: Some(PathBuf::from(APP_DIR)),
            ro_binds: self
                .toolchain
                .ro_binds([BindMount::new(&self.workspace.sources, APP_DIR)]),
            unshare_all: true,
            memory_limit,
            time_limit: Some(time_limit),
            env: self.toolchain.config.env.clone(),
            ..Default::default()
        };

        Ok(self.toolchain.sandbox.execute(task).await?)
    }
}

/// The sole file, or the conventional entry point when there are several
fn select_entry(names: &[String], entry_point: Option<&str>) -> Result<String, RunnerError> {
    match names {
        [only] => Ok(only.clone()),
        _ => {
            let expected = entry_point.unwrap_or("main");
            names
                .iter()
                .find(|name| name.as_str() == expected)
                .cloned()
                .ok_or_else(|| RunnerError::MissingEntryPoint(expected.to_string()))
        }
    }
}

pub enum Runner {
    Compiled(CompiledRunner),
    Interpreted(InterpretedRunner),
}

impl Runner {
    /// Pick the variant for a declared language and set up its workspace.
    /// Unknown languages fail here, before any sandbox is started.
    pub fn for_language(
        language: &str,
        languages: &LanguageConfigManager,
        sandbox: Arc<dyn Sandbox>,
        settings: &RunnerSettings,
    ) -> Result<Self, RunnerError> {
        let config = languages
            .get_config(language)
            .ok_or_else(|| RunnerError::UnrecognizedLanguage(language.to_string()))?
            .clone();
        let scratch = settings.scratch_dir.as_deref();

        let runner = match config.kind {
            RunnerKind::Compiled => Runner::Compiled(CompiledRunner {
                workspace: Workspace::create(scratch, true)?,
                toolchain: Toolchain { config, sandbox },
                compile_time_limit: settings.compile_time_limit,
                compiled: false,
            }),
            RunnerKind::Interpreted => Runner::Interpreted(InterpretedRunner {
                workspace: Workspace::create(scratch, false)?,
                toolchain: Toolchain { config, sandbox },
                entry: None,
            }),
        };

        debug!(language = %language, workspace = %runner.workspace_path().display(), "Runner set up");
        Ok(runner)
    }

    pub fn workspace_path(&self) -> &Path {
        match self {
            Runner::Compiled(r) => r.workspace.path(),
            Runner::Interpreted(r) => r.workspace.path(),
        }
    }

    /// Write sources and build them. `None` for interpreted languages.
    pub async fn compile(
        &mut self,
        sources: &BTreeMap<String, Vec<u8>>,
    ) -> Result<Option<TaskResult>, RunnerError> {
        match self {
            Runner::Compiled(r) => r.compile(sources).await,
            Runner::Interpreted(r) => r.compile(sources).await,
        }
    }

    pub async fn run(
        &self,
        stdin: &[u8],
        memory_limit: Option<u64>,
        time_limit: Duration,
    ) -> Result<TaskResult, RunnerError> {
        match self {
            Runner::Compiled(r) => r.run(stdin, memory_limit, time_limit).await,
            Runner::Interpreted(r) => r.run(stdin, memory_limit, time_limit).await,
        }
    }

    /// Remove the workspace
    pub fn clean_up(self) -> std::io::Result<()> {
        let workspace = match self {
            Runner::Compiled(r) => r.workspace,
            Runner::Interpreted(r) => r.workspace,
        };
        workspace.root.close()
    }
}
