// Persistence contract for solutions, problems and test runs

use crate::types::{Problem, Solution, TestRun};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} {1} not found")]
    NotFound(&'static str, Uuid),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("solution {0} kept changing under concurrent updates")]
    Contended(Uuid),
}

/// Record-level repository. Every save is a single atomic write; nothing
/// here spans several records.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_solution(&self, id: Uuid) -> Result<Option<Solution>, StoreError>;

    /// Create or overwrite unconditionally
    async fn save_solution(&self, solution: &Solution) -> Result<(), StoreError>;

    /// Compare-and-set on `revision`: write only if the stored record still
    /// has `solution.revision`, then bump it in both places. `false` means
    /// someone else wrote first and nothing was stored.
    async fn save_solution_if_unchanged(&self, solution: &mut Solution)
        -> Result<bool, StoreError>;

    async fn get_problem(&self, id: Uuid) -> Result<Option<Problem>, StoreError>;

    async fn save_problem(&self, problem: &Problem) -> Result<(), StoreError>;

    /// Insert or replace a run, keyed by (solution, generation, test case)
    async fn save_test_run(&self, run: &TestRun) -> Result<(), StoreError>;

    /// Runs of one grading pass, ordered by test case id
    async fn test_runs(&self, solution_id: Uuid, generation: u32)
        -> Result<Vec<TestRun>, StoreError>;
}

/// In-process repository used by tests and single-binary setups
#[derive(Default)]
pub struct MemoryRepository {
    solutions: RwLock<HashMap<Uuid, Solution>>,
    problems: RwLock<HashMap<Uuid, Problem>>,
    runs: RwLock<HashMap<(Uuid, u32, u32), TestRun>>,
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_solution(&self, id: Uuid) -> Result<Option<Solution>, StoreError> {
        Ok(self.solutions.read().await.get(&id).cloned())
    }

    async fn save_solution(&self, solution: &Solution) -> Result<(), StoreError> {
        self.solutions
            .write()
            .await
            .insert(solution.id, solution.clone());
        Ok(())
    }

    async fn save_solution_if_unchanged(
        &self,
        solution: &mut Solution,
    ) -> Result<bool, StoreError> {
        let mut solutions = self.solutions.write().await;
        match solutions.get(&solution.id) {
            Some(stored) if stored.revision == solution.revision => {
                solution.revision += 1;
                solutions.insert(solution.id, solution.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_problem(&self, id: Uuid) -> Result<Option<Problem>, StoreError> {
        Ok(self.problems.read().await.get(&id).cloned())
    }

    async fn save_problem(&self, problem: &Problem) -> Result<(), StoreError> {
        self.problems.write().await.insert(problem.id, problem.clone());
        Ok(())
    }

    async fn save_test_run(&self, run: &TestRun) -> Result<(), StoreError> {
        self.runs
            .write()
            .await
            .insert((run.solution_id, run.generation, run.test_case_id), run.clone());
        Ok(())
    }

    async fn test_runs(
        &self,
        solution_id: Uuid,
        generation: u32,
    ) -> Result<Vec<TestRun>, StoreError> {
        let mut runs: Vec<TestRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|run| run.solution_id == solution_id && run.generation == generation)
            .cloned()
            .collect();
        runs.sort_by_key(|run| run.test_case_id);
        Ok(runs)
    }
}
