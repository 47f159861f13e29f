use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job name used for grading work on the queue
pub const GRADE_JOB: &str = "grade_solution";

/// Queue payload. Carries only the identifier; everything else is loaded
/// from the repository when the job is picked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeJob {
    pub solution_id: Uuid,
}

/// Lifecycle of a solution's current grading pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolutionState {
    CompilationPending,
    CompilationInProgress,
    CompilationSuccessful,
    CompilationFailed,
    /// The pass was aborted by an infrastructure failure. Terminal until a
    /// regrade is requested.
    GradingError,
}

impl SolutionState {
    /// States from which the worker never moves on its own
    pub fn is_terminal(&self) -> bool {
        matches!(self, SolutionState::CompilationFailed | SolutionState::GradingError)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub id: Uuid,
    pub problem_id: Uuid,
    pub language: String,
    pub state: SolutionState,
    /// Current grading pass. 0 means the solution was never picked up.
    #[serde(default)]
    pub generation: u32,
    /// Write counter checked by `Repository::save_solution_if_unchanged`
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub compile_output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl Solution {
    pub fn new(problem_id: Uuid, language: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            problem_id,
            language: language.into(),
            state: SolutionState::CompilationPending,
            generation: 0,
            revision: 0,
            compile_output: None,
            error: None,
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: u32,
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub points: u32,
    /// Bytes. The worker's default applies when absent.
    #[serde(default)]
    pub memory_limit: Option<u64>,
    /// Seconds, must be finite and positive
    pub time_limit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pending,
    Valid,
    Invalid,
    Crashed,
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    pub id: Uuid,
    pub solution_id: Uuid,
    pub test_case_id: u32,
    pub generation: u32,
    pub verdict: Verdict,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub return_code: Option<i32>,
    #[serde(default)]
    pub elapsed_time_ms: u64,
}

impl TestRun {
    pub fn pending(solution: &Solution, test_case: &TestCase) -> Self {
        Self {
            id: Uuid::new_v4(),
            solution_id: solution.id,
            test_case_id: test_case.id,
            generation: solution.generation,
            verdict: Verdict::Pending,
            stdout: None,
            stderr: None,
            return_code: None,
            elapsed_time_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_screaming_snake() {
        let json = serde_json::to_string(&SolutionState::CompilationInProgress).unwrap();
        assert_eq!(json, "\"COMPILATION_IN_PROGRESS\"");
        let verdict: Verdict = serde_json::from_str("\"TIMED_OUT\"").unwrap();
        assert_eq!(verdict, Verdict::TimedOut);
    }

    #[test]
    fn test_terminal_states() {
        assert!(SolutionState::CompilationFailed.is_terminal());
        assert!(SolutionState::GradingError.is_terminal());
        assert!(!SolutionState::CompilationPending.is_terminal());
        assert!(!SolutionState::CompilationInProgress.is_terminal());
        // A successful compile still has test runs to finish
        assert!(!SolutionState::CompilationSuccessful.is_terminal());
    }

    #[test]
    fn test_pending_run_inherits_generation() {
        let mut solution = Solution::new(Uuid::new_v4(), "python");
        solution.generation = 3;
        let tc = TestCase {
            id: 7,
            input: String::new(),
            expected_output: String::new(),
            points: 1,
            memory_limit: None,
            time_limit: 1.0,
        };
        let run = TestRun::pending(&solution, &tc);
        assert_eq!(run.generation, 3);
        assert_eq!(run.test_case_id, 7);
        assert_eq!(run.verdict, Verdict::Pending);
        assert!(run.stdout.is_none());
    }

    #[test]
    fn test_test_case_defaults() {
        let tc: TestCase = serde_json::from_str(
            r#"{"id": 1, "input": "5", "expected_output": "25", "time_limit": 2}"#,
        )
        .unwrap();
        assert_eq!(tc.points, 0);
        assert_eq!(tc.memory_limit, None);
        assert_eq!(tc.time_limit, 2.0);
    }
}
