/// Grade aggregation
///
/// A grade is a fraction in [0, 1] computed from the current pass only.
/// `None` is distinct from `Some(0.0)`: it means there is nothing to grade
/// (compilation failed, the pass never ran, or the problem carries no points).

use crate::store::{Repository, StoreError};
use crate::types::{SolutionState, TestCase, TestRun, Verdict};
use uuid::Uuid;

/// Compute a grade from a problem's test cases and one pass worth of runs
pub fn grade(test_cases: &[TestCase], runs: &[TestRun]) -> Option<f64> {
    if runs.is_empty() {
        return None;
    }

    let max_points: u64 = test_cases.iter().map(|tc| u64::from(tc.points)).sum();
    if max_points == 0 {
        return None;
    }

    let earned_points: u64 = runs
        .iter()
        .filter(|run| run.verdict == Verdict::Valid)
        .filter_map(|run| test_cases.iter().find(|tc| tc.id == run.test_case_id))
        .map(|tc| u64::from(tc.points))
        .sum();

    Some(earned_points as f64 / max_points as f64)
}

/// Read the solution's current pass from the repository and grade it.
///
/// Nothing is cached on the solution, so the answer always reflects the
/// latest persisted pass.
pub async fn grade_solution(
    repo: &dyn Repository,
    solution_id: Uuid,
) -> Result<Option<f64>, StoreError> {
    let solution = repo
        .get_solution(solution_id)
        .await?
        .ok_or(StoreError::NotFound("solution", solution_id))?;

    if solution.state == SolutionState::GradingError {
        return Ok(None);
    }

    let problem = repo
        .get_problem(solution.problem_id)
        .await?
        .ok_or(StoreError::NotFound("problem", solution.problem_id))?;

    let runs = repo.test_runs(solution.id, solution.generation).await?;
    Ok(grade(&problem.test_cases, &runs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRepository;
    use crate::types::{Problem, Solution};

    fn case(id: u32, points: u32) -> TestCase {
        TestCase {
            id,
            input: String::new(),
            expected_output: String::new(),
            points,
            memory_limit: None,
            time_limit: 1.0,
        }
    }

    fn run(solution: &Solution, test_case: &TestCase, verdict: Verdict) -> TestRun {
        let mut run = TestRun::pending(solution, test_case);
        run.verdict = verdict;
        run
    }

    #[test]
    fn test_weighted_grade() {
        let solution = Solution::new(Uuid::new_v4(), "cpp");
        let cases = vec![case(1, 1), case(2, 2), case(3, 3)];
        let runs = vec![
            run(&solution, &cases[0], Verdict::Invalid),
            run(&solution, &cases[1], Verdict::Valid),
            run(&solution, &cases[2], Verdict::Valid),
        ];

        let grade = grade(&cases, &runs).unwrap();
        assert!((grade - 5.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_runs_is_undefined() {
        let cases = vec![case(1, 1)];
        assert_eq!(grade(&cases, &[]), None);
    }

    #[test]
    fn test_zero_points_is_undefined() {
        let solution = Solution::new(Uuid::new_v4(), "cpp");
        let cases = vec![case(1, 0), case(2, 0)];
        let runs = vec![
            run(&solution, &cases[0], Verdict::Valid),
            run(&solution, &cases[1], Verdict::Valid),
        ];
        assert_eq!(grade(&cases, &runs), None);
    }

    #[test]
    fn test_all_failed_is_zero_not_undefined() {
        let solution = Solution::new(Uuid::new_v4(), "cpp");
        let cases = vec![case(1, 4)];
        let runs = vec![run(&solution, &cases[0], Verdict::TimedOut)];
        assert_eq!(grade(&cases, &runs), Some(0.0));
    }

    #[tokio::test]
    async fn test_grade_solution_uses_current_generation_only() {
        let repo = MemoryRepository::default();
        let cases = vec![case(1, 1)];
        let problem = Problem {
            id: Uuid::new_v4(),
            title: "square".to_string(),
            test_cases: cases.clone(),
        };
        repo.save_problem(&problem).await.unwrap();

        let mut solution = Solution::new(problem.id, "python");
        solution.generation = 1;
        solution.state = SolutionState::CompilationSuccessful;
        repo.save_test_run(&run(&solution, &cases[0], Verdict::Valid))
            .await
            .unwrap();

        solution.generation = 2;
        repo.save_solution(&solution).await.unwrap();
        repo.save_test_run(&run(&solution, &cases[0], Verdict::Crashed))
            .await
            .unwrap();

        assert_eq!(grade_solution(&repo, solution.id).await.unwrap(), Some(0.0));
    }

    #[tokio::test]
    async fn test_grading_error_has_no_grade() {
        let repo = MemoryRepository::default();
        let problem = Problem {
            id: Uuid::new_v4(),
            title: "p".to_string(),
            test_cases: vec![case(1, 1)],
        };
        repo.save_problem(&problem).await.unwrap();
        let mut solution = Solution::new(problem.id, "python");
        solution.generation = 1;
        solution.state = SolutionState::GradingError;
        repo.save_solution(&solution).await.unwrap();
        repo.save_test_run(&run(&solution, &problem.test_cases[0], Verdict::Valid))
            .await
            .unwrap();

        assert_eq!(grade_solution(&repo, solution.id).await.unwrap(), None);
    }
}
