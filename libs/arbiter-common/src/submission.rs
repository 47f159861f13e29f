// Submission path: persist sources, record the solution, enqueue grading.
// Never waits for the grading itself.

use crate::blob::{source_prefix, BlobStore};
use crate::languages::LanguageConfigManager;
use crate::queue::JobQueue;
use crate::store::{Repository, StoreError};
use crate::types::{GradeJob, Solution, SolutionState};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("problem {0} does not exist")]
    UnknownProblem(Uuid),

    #[error("solution {0} does not exist")]
    UnknownSolution(Uuid),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("no source files submitted")]
    NoFiles,

    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A file name that can live directly inside the sandbox's source directory
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

const REGRADE_ATTEMPTS: usize = 5;

pub struct Submitter<'a> {
    pub repo: &'a dyn Repository,
    pub blobs: &'a dyn BlobStore,
    pub queue: &'a dyn JobQueue,
    pub languages: &'a LanguageConfigManager,
    pub bucket: &'a str,
}

impl Submitter<'_> {
    /// Store a new solution and enqueue it for grading
    pub async fn submit(
        &self,
        problem_id: Uuid,
        language: &str,
        files: BTreeMap<String, Vec<u8>>,
    ) -> Result<Solution, SubmitError> {
        if !self.languages.is_supported(language) {
            return Err(SubmitError::UnsupportedLanguage(language.to_string()));
        }
        if files.is_empty() {
            return Err(SubmitError::NoFiles);
        }
        if let Some(bad) = files.keys().find(|name| !is_plain_file_name(name)) {
            return Err(SubmitError::InvalidFileName(bad.clone()));
        }
        if self.repo.get_problem(problem_id).await?.is_none() {
            return Err(SubmitError::UnknownProblem(problem_id));
        }

        let solution = Solution::new(problem_id, language.to_lowercase());
        let prefix = source_prefix(&solution.id);
        for (name, content) in &files {
            self.blobs
                .put(self.bucket, &format!("{}{}", prefix, name), content)
                .await?;
        }

        self.repo.save_solution(&solution).await?;
        self.queue
            .enqueue(&GradeJob { solution_id: solution.id })
            .await?;

        info!(
            solution_id = %solution.id,
            problem_id = %problem_id,
            language = %solution.language,
            files = files.len(),
            "Solution queued"
        );
        Ok(solution)
    }

    /// Reset a solution so the next job runs a fresh pass. Earlier passes
    /// stay in storage under their own generation.
    ///
    /// The reset is a conditional write, so a worker still holding an older
    /// copy cannot overwrite it; that worker abandons its pass instead.
    pub async fn regrade(&self, solution_id: Uuid) -> Result<Solution, SubmitError> {
        for _ in 0..REGRADE_ATTEMPTS {
            let mut solution = self
                .repo
                .get_solution(solution_id)
                .await?
                .ok_or(SubmitError::UnknownSolution(solution_id))?;

            solution.state = SolutionState::CompilationPending;
            solution.error = None;
            solution.compile_output = None;
            if !self.repo.save_solution_if_unchanged(&mut solution).await? {
                continue;
            }
            self.queue.enqueue(&GradeJob { solution_id }).await?;

            info!(solution_id = %solution_id, generation = solution.generation, "Regrade queued");
            return Ok(solution);
        }
        Err(StoreError::Contended(solution_id).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryRepository;
    use crate::types::Problem;
    use std::time::Duration;

    struct Fixture {
        repo: MemoryRepository,
        blobs: MemoryBlobStore,
        queue: MemoryQueue,
        languages: LanguageConfigManager,
        problem_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let repo = MemoryRepository::default();
        let problem = Problem {
            id: Uuid::new_v4(),
            title: "square".to_string(),
            test_cases: Vec::new(),
        };
        repo.save_problem(&problem).await.unwrap();
        Fixture {
            repo,
            blobs: MemoryBlobStore::default(),
            queue: MemoryQueue::default(),
            languages: LanguageConfigManager::builtin(),
            problem_id: problem.id,
        }
    }

    impl Fixture {
        fn submitter(&self) -> Submitter<'_> {
            Submitter {
                repo: &self.repo,
                blobs: &self.blobs,
                queue: &self.queue,
                languages: &self.languages,
                bucket: "solutions",
            }
        }
    }

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, Vec<u8>> {
        entries
            .iter()
            .map(|(n, c)| (n.to_string(), c.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_plain_file_names() {
        assert!(is_plain_file_name("main.cpp"));
        assert!(!is_plain_file_name("../main.cpp"));
        assert!(!is_plain_file_name("dir/main.cpp"));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name(""));
    }

    #[tokio::test]
    async fn test_submit_stores_and_enqueues() {
        let fx = fixture().await;
        let solution = fx
            .submitter()
            .submit(fx.problem_id, "Python", files(&[("main.py", "print(1)")]))
            .await
            .unwrap();

        assert_eq!(solution.state, SolutionState::CompilationPending);
        assert_eq!(solution.language, "python");
        assert!(fx.repo.get_solution(solution.id).await.unwrap().is_some());

        let stored = fx
            .blobs
            .get_directory("solutions", &source_prefix(&solution.id))
            .await
            .unwrap();
        assert_eq!(stored["main.py"], b"print(1)");

        let job = fx.queue.dequeue(Duration::from_millis(10)).await.unwrap();
        assert_eq!(job, Some(GradeJob { solution_id: solution.id }));
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_input() {
        let fx = fixture().await;
        let submitter = fx.submitter();

        let err = submitter
            .submit(fx.problem_id, "cobol", files(&[("a.cob", "")]))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::UnsupportedLanguage(_)));

        let err = submitter
            .submit(fx.problem_id, "cpp", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::NoFiles));

        let err = submitter
            .submit(fx.problem_id, "cpp", files(&[("../x.cpp", "")]))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::InvalidFileName(_)));

        let err = submitter
            .submit(Uuid::new_v4(), "cpp", files(&[("x.cpp", "")]))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::UnknownProblem(_)));

        assert_eq!(fx.queue.len().await, 0);
    }

    #[tokio::test]
    async fn test_regrade_resets_state() {
        let fx = fixture().await;
        let submitter = fx.submitter();
        let mut solution = submitter
            .submit(fx.problem_id, "cpp", files(&[("main.cpp", "int main(){}")]))
            .await
            .unwrap();
        fx.queue.dequeue(Duration::from_millis(10)).await.unwrap();

        solution.state = SolutionState::GradingError;
        solution.generation = 4;
        solution.error = Some("sandbox failed".to_string());
        fx.repo.save_solution(&solution).await.unwrap();

        let reset = submitter.regrade(solution.id).await.unwrap();
        assert_eq!(reset.state, SolutionState::CompilationPending);
        assert_eq!(reset.generation, 4);
        assert!(reset.error.is_none());
        assert_eq!(reset.revision, solution.revision + 1);
        assert_eq!(fx.queue.len().await, 1);
    }
}
