// Scripted sandbox for tests: records every task and answers from a closure

use crate::sandbox::{Sandbox, SandboxError, Task, TaskResult};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

type Handler = Box<dyn Fn(&Task) -> Result<TaskResult, SandboxError> + Send + Sync>;

pub struct ScriptedSandbox {
    handler: Handler,
    tasks: Mutex<Vec<Task>>,
}

impl Default for ScriptedSandbox {
    /// Every task exits 0 with no output
    fn default() -> Self {
        Self::new(|_| Ok(exited(0, "")))
    }
}

impl ScriptedSandbox {
    pub fn new(
        handler: impl Fn(&Task) -> Result<TaskResult, SandboxError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn execute(&self, task: Task) -> Result<TaskResult, SandboxError> {
        let result = (self.handler)(&task);
        self.tasks.lock().unwrap().push(task);
        result
    }
}

pub fn exited(code: i32, stdout: &str) -> TaskResult {
    TaskResult {
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
        return_code: Some(code),
        elapsed: Duration::from_millis(5),
        timed_out: false,
    }
}

pub fn timed_out(limit: Duration) -> TaskResult {
    TaskResult {
        stdout: Vec::new(),
        stderr: Vec::new(),
        return_code: None,
        elapsed: limit,
        timed_out: true,
    }
}

/// True for the compiler invocation of the built-in C++ template
pub fn is_compile(task: &Task) -> bool {
    task.argv.first().map(String::as_str) == Some("g++")
}
