/// Grading Orchestrator - one solution, one pass, end to end
///
/// **Responsibility:**
/// Drive a solution through compile → per-test run → classify → persist.
///
/// **Architecture:**
/// 1. Runner (runner.rs) turns sources into sandboxed tasks
/// 2. Evaluator (evaluator.rs) classifies each task result
/// 3. Repository / blob store (arbiter-common) hold all state
///
/// **State machine (Solution.state):**
/// ```text
/// COMPILATION_PENDING ──start──▶ COMPILATION_IN_PROGRESS
/// COMPILATION_IN_PROGRESS ──return code 0──▶ COMPILATION_SUCCESSFUL
/// COMPILATION_IN_PROGRESS ──otherwise──────▶ COMPILATION_FAILED
/// any running state ──infrastructure error──▶ GRADING_ERROR
/// ```
///
/// **Re-delivery:**
/// A job for a solution whose current pass is complete is skipped. Any
/// other job starts a new generation; runs of older generations stay in
/// storage but no longer count.
///
/// **Concurrent writers:**
/// Every solution write is conditional on the revision this pass last saw.
/// If a regrade or another delivery wrote in between, the pass stops
/// touching the solution and reports `Superseded`.
use crate::evaluator;
use crate::runner::{Runner, RunnerError, RunnerSettings};
use crate::sandbox::Sandbox;
use arbiter_common::blob::{source_prefix, BlobStore};
use arbiter_common::languages::LanguageConfigManager;
use arbiter_common::store::{Repository, StoreError};
use arbiter_common::types::{Problem, Solution, SolutionState, TestCase, TestRun, Verdict};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_MEMORY_LIMIT: u64 = 256 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum GradeError {
    #[error("solution {0} not found")]
    SolutionNotFound(Uuid),

    #[error("problem {0} not found")]
    ProblemNotFound(Uuid),

    #[error("test case {test_case_id} has an invalid time limit: {time_limit}")]
    InvalidTimeLimit { test_case_id: u32, time_limit: f64 },

    #[error("test case {test_case_id} has a zero memory limit")]
    InvalidMemoryLimit { test_case_id: u32 },

    #[error("no source files stored for solution {0}")]
    NoSources(Uuid),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("pass {generation} was superseded by a newer write")]
    Superseded { generation: u32 },
}

/// What a job ended up doing
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// The current pass was already complete
    Skipped(SolutionState),
    /// A regrade or another delivery took the solution over mid-pass
    Superseded { generation: u32 },
    CompilationFailed { generation: u32 },
    Graded { generation: u32, valid: usize, total: usize },
}

#[derive(Debug, Clone)]
pub struct GraderSettings {
    pub bucket: String,
    /// Applied to test cases without their own memory limit
    pub default_memory_limit: u64,
    pub runner: RunnerSettings,
}

impl Default for GraderSettings {
    fn default() -> Self {
        Self {
            bucket: arbiter_common::config::DEFAULT_BUCKET.to_string(),
            default_memory_limit: DEFAULT_MEMORY_LIMIT,
            runner: RunnerSettings::default(),
        }
    }
}

pub struct Grader {
    repo: Arc<dyn Repository>,
    blobs: Arc<dyn BlobStore>,
    sandbox: Arc<dyn Sandbox>,
    languages: Arc<LanguageConfigManager>,
    settings: GraderSettings,
}

/// Reject limits the sandbox cannot honor before anything runs
fn validate_limits(test_cases: &[TestCase]) -> Result<(), GradeError> {
    for tc in test_cases {
        if tc.time_limit <= 0.0 || Duration::try_from_secs_f64(tc.time_limit).is_err() {
            return Err(GradeError::InvalidTimeLimit {
                test_case_id: tc.id,
                time_limit: tc.time_limit,
            });
        }
        // RLIMIT_DATA of 0 keeps the sandbox itself from starting
        if tc.memory_limit == Some(0) {
            return Err(GradeError::InvalidMemoryLimit { test_case_id: tc.id });
        }
    }
    Ok(())
}

fn lossy(bytes: &[u8]) -> Option<String> {
    (!bytes.is_empty()).then(|| String::from_utf8_lossy(bytes).into_owned())
}

impl Grader {
    pub fn new(
        repo: Arc<dyn Repository>,
        blobs: Arc<dyn BlobStore>,
        sandbox: Arc<dyn Sandbox>,
        languages: Arc<LanguageConfigManager>,
        settings: GraderSettings,
    ) -> Self {
        Self {
            repo,
            blobs,
            sandbox,
            languages,
            settings,
        }
    }

    /// Handle one grading job. Every error that escapes after the pass has
    /// started leaves the solution in GRADING_ERROR, never IN_PROGRESS.
    #[instrument(skip(self), fields(solution_id = %solution_id))]
    pub async fn handle(&self, solution_id: Uuid) -> Result<PassOutcome, GradeError> {
        let mut solution = self
            .repo
            .get_solution(solution_id)
            .await?
            .ok_or(GradeError::SolutionNotFound(solution_id))?;

        if self.pass_complete(&solution).await? {
            info!(state = ?solution.state, generation = solution.generation, "Pass already complete, skipping");
            return Ok(PassOutcome::Skipped(solution.state));
        }

        if solution.state == SolutionState::CompilationInProgress {
            warn!(generation = solution.generation, "Superseding an interrupted pass");
        }

        solution.generation += 1;
        solution.state = SolutionState::CompilationInProgress;
        solution.compile_output = None;
        solution.error = None;
        if !self.repo.save_solution_if_unchanged(&mut solution).await? {
            info!(generation = solution.generation, "Solution changed before the pass started");
            return Ok(PassOutcome::Superseded {
                generation: solution.generation,
            });
        }

        match self.grade_pass(&mut solution).await {
            Ok(outcome) => Ok(outcome),
            Err(GradeError::Superseded { generation }) => {
                info!(generation = generation, "Pass superseded, leaving the solution alone");
                Ok(PassOutcome::Superseded { generation })
            }
            Err(e) => {
                error!(generation = solution.generation, error = %e, "Grading pass aborted");
                solution.state = SolutionState::GradingError;
                solution.error = Some(e.to_string());
                match self.repo.save_solution_if_unchanged(&mut solution).await {
                    Ok(true) => {}
                    Ok(false) => warn!("Solution changed meanwhile, grading error not recorded"),
                    Err(save_err) => error!(error = %save_err, "Failed to record grading error"),
                }
                Err(e)
            }
        }
    }

    /// Conditional save of this pass's copy of the solution
    async fn commit(&self, solution: &mut Solution) -> Result<(), GradeError> {
        if self.repo.save_solution_if_unchanged(solution).await? {
            Ok(())
        } else {
            Err(GradeError::Superseded {
                generation: solution.generation,
            })
        }
    }

    /// Whether the solution's current generation needs no more work
    async fn pass_complete(&self, solution: &Solution) -> Result<bool, GradeError> {
        match solution.state {
            SolutionState::CompilationFailed | SolutionState::GradingError => Ok(true),
            SolutionState::CompilationPending | SolutionState::CompilationInProgress => Ok(false),
            SolutionState::CompilationSuccessful => {
                let Some(problem) = self.repo.get_problem(solution.problem_id).await? else {
                    return Ok(false);
                };
                let runs = self.repo.test_runs(solution.id, solution.generation).await?;
                Ok(runs.len() == problem.test_cases.len()
                    && runs.iter().all(|run| run.verdict != Verdict::Pending))
            }
        }
    }

    async fn grade_pass(&self, solution: &mut Solution) -> Result<PassOutcome, GradeError> {
        let problem = self
            .repo
            .get_problem(solution.problem_id)
            .await?
            .ok_or(GradeError::ProblemNotFound(solution.problem_id))?;
        validate_limits(&problem.test_cases)?;

        let sources = self
            .blobs
            .get_directory(&self.settings.bucket, &source_prefix(&solution.id))
            .await?;
        if sources.is_empty() {
            return Err(GradeError::NoSources(solution.id));
        }

        let mut runner = Runner::for_language(
            &solution.language,
            &self.languages,
            self.sandbox.clone(),
            &self.settings.runner,
        )?;

        let outcome = self
            .compile_and_test(&mut runner, solution, &problem, &sources)
            .await;

        if let Err(e) = runner.clean_up() {
            warn!(error = %e, "Failed to remove runner workspace");
        }
        outcome
    }

    async fn compile_and_test(
        &self,
        runner: &mut Runner,
        solution: &mut Solution,
        problem: &Problem,
        sources: &BTreeMap<String, Vec<u8>>,
    ) -> Result<PassOutcome, GradeError> {
        let generation = solution.generation;
        let compile = runner.compile(sources).await?;

        let compiled = match &compile {
            Some(result) => {
                solution.compile_output = lossy(&result.stderr);
                result.return_code == Some(0)
            }
            None => true,
        };

        if !compiled {
            info!(generation = generation, "Compilation failed");
            solution.state = SolutionState::CompilationFailed;
            self.commit(solution).await?;
            return Ok(PassOutcome::CompilationFailed { generation });
        }

        solution.state = SolutionState::CompilationSuccessful;
        self.commit(solution).await?;

        let mut runs: Vec<TestRun> = problem
            .test_cases
            .iter()
            .map(|tc| TestRun::pending(solution, tc))
            .collect();
        for run in &runs {
            self.repo.save_test_run(run).await?;
        }

        info!(generation = generation, test_cases = runs.len(), "Compiled, running test cases");

        for (run, test_case) in runs.iter_mut().zip(&problem.test_cases) {
            let memory_limit = test_case
                .memory_limit
                .unwrap_or(self.settings.default_memory_limit);
            let time_limit = Duration::from_secs_f64(test_case.time_limit);

            let result = runner
                .run(test_case.input.as_bytes(), Some(memory_limit), time_limit)
                .await?;
            evaluator::record(run, &result, &test_case.expected_output);

            info!(
                test_case_id = test_case.id,
                verdict = ?run.verdict,
                return_code = ?run.return_code,
                elapsed_ms = run.elapsed_time_ms,
                "Test case finished"
            );
            self.repo.save_test_run(run).await?;
        }

        let valid = runs.iter().filter(|run| run.verdict == Verdict::Valid).count();
        info!(generation = generation, valid = valid, total = runs.len(), "Grading pass complete");

        Ok(PassOutcome::Graded {
            generation,
            valid,
            total: runs.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: u32, time_limit: f64) -> TestCase {
        TestCase {
            id,
            input: String::new(),
            expected_output: String::new(),
            points: 1,
            memory_limit: None,
            time_limit,
        }
    }

    #[test]
    fn test_validate_limits() {
        assert!(validate_limits(&[case(1, 2.0), case(2, 0.5)]).is_ok());
        assert!(matches!(
            validate_limits(&[case(1, 2.0), case(2, 0.0)]),
            Err(GradeError::InvalidTimeLimit { test_case_id: 2, .. })
        ));
        assert!(validate_limits(&[case(1, -1.0)]).is_err());
        assert!(validate_limits(&[case(1, f64::NAN)]).is_err());
        assert!(validate_limits(&[case(1, f64::INFINITY)]).is_err());
        assert!(validate_limits(&[case(1, 1e30)]).is_err());
    }

    #[test]
    fn test_zero_memory_limit_rejected() {
        let mut zero = case(3, 1.0);
        zero.memory_limit = Some(0);
        assert!(matches!(
            validate_limits(&[case(1, 1.0), zero]),
            Err(GradeError::InvalidMemoryLimit { test_case_id: 3 })
        ));

        let mut small = case(1, 1.0);
        small.memory_limit = Some(1);
        assert!(validate_limits(&[small]).is_ok());
    }

    #[test]
    fn test_lossy_empty_is_none() {
        assert_eq!(lossy(b""), None);
        assert_eq!(lossy(b"error: x").as_deref(), Some("error: x"));
    }
}
