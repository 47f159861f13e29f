use crate::queue::JobQueue;
use crate::store::{Repository, StoreError};
use crate::types::{GradeJob, Problem, Solution, TestRun};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

/// Redis key layout - shared by API, CLI and worker so they never drift

pub const QUEUE_PREFIX: &str = "arbiter:queue";
pub const SOLUTION_PREFIX: &str = "arbiter:solution";
pub const PROBLEM_PREFIX: &str = "arbiter:problem";
pub const RUNS_PREFIX: &str = "arbiter:runs";

/// Queue name for a job kind
pub fn queue_name(job_name: &str) -> String {
    format!("{}:{}", QUEUE_PREFIX, job_name)
}

pub fn solution_key(id: &Uuid) -> String {
    format!("{}:{}", SOLUTION_PREFIX, id)
}

pub fn problem_key(id: &Uuid) -> String {
    format!("{}:{}", PROBLEM_PREFIX, id)
}

/// Hash holding one grading pass, field = test case id
pub fn runs_key(solution_id: &Uuid, generation: u32) -> String {
    format!("{}:{}:{}", RUNS_PREFIX, solution_id, generation)
}

/// Push a job to the named queue
/// Uses RPUSH for FIFO semantics
pub async fn push_job(
    conn: &mut ConnectionManager,
    job_name: &str,
    job: &GradeJob,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(job)?;
    let _: () = conn.rpush(queue_name(job_name), payload).await?;
    Ok(())
}

/// Pop a job from the named queue
/// Uses BLPOP with timeout so callers can observe shutdown
pub async fn pop_job(
    conn: &mut ConnectionManager,
    job_name: &str,
    timeout_seconds: f64,
) -> Result<Option<GradeJob>, StoreError> {
    let result: Option<(String, String)> = conn.blpop(queue_name(job_name), timeout_seconds).await?;

    match result {
        Some((_key, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
        None => Ok(None),
    }
}

async fn get_json<T: serde::de::DeserializeOwned>(
    conn: &mut ConnectionManager,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let payload: Option<String> = conn.get(key).await?;
    match payload {
        Some(data) => Ok(Some(serde_json::from_str(&data)?)),
        None => Ok(None),
    }
}

async fn set_json<T: serde::Serialize>(
    conn: &mut ConnectionManager,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(value)?;
    let _: () = conn.set(key, payload).await?;
    Ok(())
}

/// Overwrite a JSON record only if its stored `revision` equals ARGV[1]
const SAVE_IF_UNCHANGED: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return 0
end
local revision = cjson.decode(current)['revision'] or 0
if tonumber(revision) ~= tonumber(ARGV[1]) then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

/// Repository over plain Redis strings and hashes. Each save is one command
/// or one script, so it is atomic on the server.
#[derive(Clone)]
pub struct RedisRepository {
    conn: ConnectionManager,
}

impl RedisRepository {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Repository for RedisRepository {
    async fn get_solution(&self, id: Uuid) -> Result<Option<Solution>, StoreError> {
        get_json(&mut self.conn.clone(), &solution_key(&id)).await
    }

    async fn save_solution(&self, solution: &Solution) -> Result<(), StoreError> {
        set_json(&mut self.conn.clone(), &solution_key(&solution.id), solution).await
    }

    async fn save_solution_if_unchanged(
        &self,
        solution: &mut Solution,
    ) -> Result<bool, StoreError> {
        let mut next = solution.clone();
        next.revision += 1;
        let payload = serde_json::to_string(&next)?;

        let written: i32 = redis::Script::new(SAVE_IF_UNCHANGED)
            .key(solution_key(&solution.id))
            .arg(solution.revision)
            .arg(payload)
            .invoke_async(&mut self.conn.clone())
            .await?;

        if written == 1 {
            *solution = next;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn get_problem(&self, id: Uuid) -> Result<Option<Problem>, StoreError> {
        get_json(&mut self.conn.clone(), &problem_key(&id)).await
    }

    async fn save_problem(&self, problem: &Problem) -> Result<(), StoreError> {
        set_json(&mut self.conn.clone(), &problem_key(&problem.id), problem).await
    }

    async fn save_test_run(&self, run: &TestRun) -> Result<(), StoreError> {
        let payload = serde_json::to_string(run)?;
        let key = runs_key(&run.solution_id, run.generation);
        let _: () = self
            .conn
            .clone()
            .hset(key, run.test_case_id, payload)
            .await?;
        Ok(())
    }

    async fn test_runs(
        &self,
        solution_id: Uuid,
        generation: u32,
    ) -> Result<Vec<TestRun>, StoreError> {
        let payloads: Vec<String> = self
            .conn
            .clone()
            .hvals(runs_key(&solution_id, generation))
            .await?;

        let mut runs = payloads
            .iter()
            .map(|p| serde_json::from_str::<TestRun>(p))
            .collect::<Result<Vec<_>, _>>()?;
        runs.sort_by_key(|run| run.test_case_id);
        Ok(runs)
    }
}

#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    job_name: String,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager, job_name: impl Into<String>) -> Self {
        Self {
            conn,
            job_name: job_name.into(),
        }
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, job: &GradeJob) -> Result<(), StoreError> {
        push_job(&mut self.conn.clone(), &self.job_name, job).await
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<GradeJob>, StoreError> {
        pop_job(&mut self.conn.clone(), &self.job_name, timeout.as_secs_f64()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GRADE_JOB;

    #[test]
    fn test_queue_naming() {
        assert_eq!(queue_name(GRADE_JOB), "arbiter:queue:grade_solution");
    }

    #[test]
    fn test_solution_key_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(solution_key(&id), solution_key(&id));
        assert!(solution_key(&id).starts_with("arbiter:solution:"));
        assert!(problem_key(&id).starts_with("arbiter:problem:"));
    }

    #[test]
    fn test_runs_key_separates_generations() {
        let id = Uuid::new_v4();
        assert_ne!(runs_key(&id, 1), runs_key(&id, 2));
        assert!(runs_key(&id, 1).ends_with(":1"));
        assert!(runs_key(&id, 1).contains(&id.to_string()));
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis instance
    async fn test_conditional_save_against_redis() {
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let repo = RedisRepository::new(ConnectionManager::new(client).await.unwrap());

        let solution = Solution::new(Uuid::new_v4(), "cpp");
        repo.save_solution(&solution).await.unwrap();

        let mut current = solution.clone();
        let mut stale = solution.clone();
        assert!(repo.save_solution_if_unchanged(&mut current).await.unwrap());
        assert_eq!(current.revision, 1);
        assert!(!repo.save_solution_if_unchanged(&mut stale).await.unwrap());

        let stored = repo.get_solution(solution.id).await.unwrap().unwrap();
        assert_eq!(stored.revision, 1);
    }
}
