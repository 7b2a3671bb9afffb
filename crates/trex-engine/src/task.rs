//! ---
//! trex_section: "01-core-functionality"
//! trex_subsection: "module"
//! trex_type: "source"
//! trex_scope: "code"
//! trex_description: "Per-test execution task and retry policy."
//! trex_version: "v0.1.0"
//! trex_owner: "tbd"
//! ---
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};
use trex_adapter::{RunError, TestAdapter};

use crate::inventory::{ExecutionStatus, TestId};

/// Terminal result of one execution task.
#[derive(Debug)]
pub(crate) struct TaskOutcome {
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub attempts: u32,
}

impl TaskOutcome {
    fn passed(attempts: u32) -> Self {
        Self {
            status: ExecutionStatus::Passed,
            error: None,
            attempts,
        }
    }

    fn failed(message: String, attempts: u32) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            error: Some(message),
            attempts,
        }
    }
}

/// Execute one test case to a terminal status.
///
/// A framework timeout is retried exactly once; the retry's outcome is final
/// whatever its kind. A panic inside the adapter is contained here and
/// reported as `Failed` so it can never stall the dispatcher.
pub(crate) async fn execute_case(adapter: Arc<dyn TestAdapter>, id: &TestId) -> TaskOutcome {
    let case_id = id.to_string();
    match attempt(&adapter, &case_id).await {
        Ok(Ok(())) => TaskOutcome::passed(1),
        Ok(Err(err)) if err.is_timeout() => {
            debug!(test = %case_id, error = %err, "framework timeout; retrying once");
            match attempt(&adapter, &case_id).await {
                Ok(Ok(())) => TaskOutcome::passed(2),
                Ok(Err(retry_err)) => {
                    debug!(test = %case_id, error = %retry_err, "retry failed");
                    TaskOutcome::failed(retry_err.message().to_owned(), 2)
                }
                Err(panic_message) => {
                    warn!(test = %case_id, error = %panic_message, "adapter panicked during retry");
                    TaskOutcome::failed(panic_message, 2)
                }
            }
        }
        Ok(Err(err)) => TaskOutcome::failed(err.message().to_owned(), 1),
        Err(panic_message) => {
            warn!(test = %case_id, error = %panic_message, "adapter panicked");
            TaskOutcome::failed(panic_message, 1)
        }
    }
}

async fn attempt(
    adapter: &Arc<dyn TestAdapter>,
    case_id: &str,
) -> Result<Result<(), RunError>, String> {
    AssertUnwindSafe(adapter.run_test(case_id))
        .catch_unwind()
        .await
        .map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "adapter panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    enum Attempt {
        Pass,
        Timeout(&'static str),
        Fail(&'static str),
        Panic(&'static str),
    }

    struct ScriptedAdapter {
        script: Mutex<VecDeque<Attempt>>,
        invocations: AtomicU32,
    }

    impl ScriptedAdapter {
        fn new(script: Vec<Attempt>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                invocations: AtomicU32::new(0),
            })
        }

        fn invocations(&self) -> u32 {
            self.invocations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TestAdapter for ScriptedAdapter {
        fn display_name(&self) -> &str {
            "scripted"
        }

        fn assembly_path(&self) -> &Path {
            Path::new("scripted.dll")
        }

        fn set_assembly_path(&mut self, _path: PathBuf) {}

        fn test_method_attribute(&self) -> &str {
            "TestMethod"
        }

        fn test_method_description_attribute(&self) -> &str {
            "TestMethodDescription"
        }

        async fn discover(&self) -> Result<Vec<trex_adapter::DiscoveredCase>, trex_adapter::AdapterError> {
            Ok(Vec::new())
        }

        async fn run_test(&self, _case_id: &str) -> Result<(), RunError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().pop_front() {
                Some(Attempt::Pass) | None => Ok(()),
                Some(Attempt::Timeout(msg)) => Err(RunError::Timeout(msg.to_owned())),
                Some(Attempt::Fail(msg)) => Err(RunError::Other(msg.to_owned())),
                Some(Attempt::Panic(msg)) => panic!("{msg}"),
            }
        }
    }

    fn id() -> TestId {
        TestId::new("Suite", "Case")
    }

    #[tokio::test]
    async fn success_takes_single_attempt() {
        let adapter = ScriptedAdapter::new(vec![Attempt::Pass]);
        let outcome = execute_case(adapter.clone(), &id()).await;
        assert_eq!(outcome.status, ExecutionStatus::Passed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(adapter.invocations(), 1);
    }

    #[tokio::test]
    async fn non_timeout_failure_is_not_retried() {
        let adapter = ScriptedAdapter::new(vec![Attempt::Fail("assertion failed")]);
        let outcome = execute_case(adapter.clone(), &id()).await;
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("assertion failed"));
        assert_eq!(adapter.invocations(), 1);
    }

    #[tokio::test]
    async fn timeout_then_success_passes_on_second_attempt() {
        let adapter = ScriptedAdapter::new(vec![Attempt::Timeout("timed out"), Attempt::Pass]);
        let outcome = execute_case(adapter.clone(), &id()).await;
        assert_eq!(outcome.status, ExecutionStatus::Passed);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(adapter.invocations(), 2);
    }

    #[tokio::test]
    async fn double_timeout_fails_with_second_message() {
        let adapter = ScriptedAdapter::new(vec![
            Attempt::Timeout("first timeout"),
            Attempt::Timeout("second timeout"),
        ]);
        let outcome = execute_case(adapter.clone(), &id()).await;
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("second timeout"));
        assert_eq!(adapter.invocations(), 2);
    }

    #[tokio::test]
    async fn panic_is_contained_as_failure() {
        let adapter = ScriptedAdapter::new(vec![Attempt::Panic("adapter exploded")]);
        let outcome = execute_case(adapter.clone(), &id()).await;
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("adapter exploded"));
        assert_eq!(adapter.invocations(), 1);
    }
}
