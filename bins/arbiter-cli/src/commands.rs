// CLI commands for loading problems and driving submissions
use anyhow::{bail, Context, Result};
use arbiter_common::blob::FsBlobStore;
use arbiter_common::config::Config;
use arbiter_common::grade::grade_solution;
use arbiter_common::languages::LanguageConfigManager;
use arbiter_common::redis::{RedisQueue, RedisRepository};
use arbiter_common::store::Repository;
use arbiter_common::submission::Submitter;
use arbiter_common::types::{Problem, Solution, TestCase, TestRun, GRADE_JOB};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Problem definition as written by authors. The id is generated when
/// omitted.
#[derive(Debug, Deserialize)]
pub struct ProblemFile {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub title: String,
    pub test_cases: Vec<TestCase>,
}

struct Backend {
    config: Config,
    repo: RedisRepository,
    queue: RedisQueue,
    blobs: FsBlobStore,
    languages: LanguageConfigManager,
}

impl Backend {
    async fn connect() -> Result<Self> {
        let config = Config::from_env();
        let languages = LanguageConfigManager::load_or_builtin(&config.languages_path)?;
        let client = redis::Client::open(config.redis_url.as_str())
            .context("Failed to create Redis client")?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;

        Ok(Self {
            repo: RedisRepository::new(conn.clone()),
            queue: RedisQueue::new(conn, GRADE_JOB),
            blobs: FsBlobStore::new(&config.blob_root),
            languages,
            config,
        })
    }

    fn submitter(&self) -> Submitter<'_> {
        Submitter {
            repo: &self.repo,
            blobs: &self.blobs,
            queue: &self.queue,
            languages: &self.languages,
            bucket: &self.config.bucket,
        }
    }
}

/// Parse and check a problem file
pub fn load_problem(path: &Path) -> Result<Problem> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: ProblemFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    if file.test_cases.is_empty() {
        bail!("Problem '{}' has no test cases", file.title);
    }
    let mut ids: Vec<u32> = file.test_cases.iter().map(|tc| tc.id).collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() != file.test_cases.len() {
        bail!("Problem '{}' has duplicate test case ids", file.title);
    }
    if let Some(tc) = file
        .test_cases
        .iter()
        .find(|tc| tc.time_limit.is_nan() || tc.time_limit <= 0.0)
    {
        bail!("Test case {} needs a positive time_limit", tc.id);
    }
    if let Some(tc) = file.test_cases.iter().find(|tc| tc.memory_limit == Some(0)) {
        bail!("Test case {} has a memory_limit of 0", tc.id);
    }

    Ok(Problem {
        id: file.id.unwrap_or_else(Uuid::new_v4),
        title: file.title,
        test_cases: file.test_cases,
    })
}

/// Read source files, keyed by their base name
pub fn read_sources(paths: &[PathBuf]) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();
    for path in paths {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Not a file name: {}", path.display()))?
            .to_string();
        let content =
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        if files.insert(name.clone(), content).is_some() {
            bail!("Two source files are both named '{}'", name);
        }
    }
    Ok(files)
}

/// Human-readable summary of a solution and its current pass. `grade`
/// comes from `grade_solution`.
pub fn render_status(solution: &Solution, grade: Option<f64>, runs: &[TestRun]) -> String {
    let mut out = format!(
        "Solution {}\n  language:   {}\n  state:      {:?}\n  generation: {}\n",
        solution.id, solution.language, solution.state, solution.generation
    );

    match grade {
        Some(g) => out.push_str(&format!("  grade:      {:.1}%\n", g * 100.0)),
        None => out.push_str("  grade:      -\n"),
    }
    if let Some(error) = &solution.error {
        out.push_str(&format!("  error:      {}\n", error));
    }
    if let Some(output) = &solution.compile_output {
        out.push_str("  compiler output:\n");
        for line in output.lines() {
            out.push_str(&format!("    {}\n", line));
        }
    }
    if !runs.is_empty() {
        out.push_str(&format!("\n  {:<6} {:<10} {:>8}\n", "TEST", "VERDICT", "TIME"));
        for run in runs {
            out.push_str(&format!(
                "  {:<6} {:<10} {:>6}ms\n",
                run.test_case_id,
                format!("{:?}", run.verdict),
                run.elapsed_time_ms
            ));
        }
    }
    out
}

pub async fn add_problem(path: &Path) -> Result<()> {
    let problem = load_problem(path)?;
    let backend = Backend::connect().await?;
    backend.repo.save_problem(&problem).await?;

    println!("✅ Problem '{}' saved", problem.title);
    println!("   id: {}", problem.id);
    println!("   test cases: {}", problem.test_cases.len());
    Ok(())
}

pub async fn submit(problem_id: Uuid, language: &str, paths: &[PathBuf]) -> Result<()> {
    let files = read_sources(paths)?;
    let backend = Backend::connect().await?;
    let solution = backend.submitter().submit(problem_id, language, files).await?;

    println!("🚀 Solution queued for grading");
    println!("   id: {}", solution.id);
    println!("\n💡 Check progress with: arbiter-cli status {}", solution.id);
    Ok(())
}

pub async fn status(solution_id: Uuid) -> Result<()> {
    let backend = Backend::connect().await?;
    let Some(solution) = backend.repo.get_solution(solution_id).await? else {
        bail!("Solution {} not found", solution_id);
    };
    let grade = grade_solution(&backend.repo, solution.id).await?;
    let runs = backend
        .repo
        .test_runs(solution.id, solution.generation)
        .await?;

    print!("{}", render_status(&solution, grade, &runs));
    Ok(())
}

pub async fn regrade(solution_id: Uuid) -> Result<()> {
    let backend = Backend::connect().await?;
    let solution = backend.submitter().regrade(solution_id).await?;
    println!("🔁 Regrade queued for {} (previous generation {})", solution.id, solution.generation);
    Ok(())
}

pub fn list_languages(path: Option<&Path>) -> Result<()> {
    let config = Config::from_env();
    let path = path.unwrap_or(&config.languages_path);
    let languages = LanguageConfigManager::load_or_builtin(path)?;

    println!("📋 Configured Languages:\n");
    println!("{:<12} {:<12} {}", "NAME", "KIND", "RUN");
    println!("{}", "─".repeat(60));
    for name in languages.list_languages() {
        if let Some(config) = languages.get_config(&name) {
            println!(
                "{:<12} {:<12} {}",
                config.name,
                format!("{:?}", config.kind).to_lowercase(),
                config.run.join(" ")
            );
        }
    }
    Ok(())
}
