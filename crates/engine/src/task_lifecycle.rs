use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use taskflow_domain::entities::{ExecutionContext, ExecutionOutput, Task, TaskResult, TaskStatus};
use taskflow_domain::repositories::{ResultStore, TaskStore};
use taskflow_domain::{Clock, TaskExecutor};
use taskflow_errors::{TaskflowError, TaskflowResult};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::retry_scheduler::{RetryDecision, RetryScheduler};

/// 单次处理的结果
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleOutcome {
    Completed { result_id: String },
    Retrying { retries: i32, delay: Duration },
    Failed,
    /// 未到最早执行时间，已延后入队，不消耗重试次数
    Deferred { delay: Duration },
    /// 任务已被删除、已不是 pending，或被另一个句柄抢先认领
    Skipped,
    /// 持久化失败，本次处理中止
    Aborted,
}

/// worker对单个任务执行的完整生命周期
pub struct TaskLifecycle {
    store: Arc<dyn TaskStore>,
    results: Arc<dyn ResultStore>,
    executor: Arc<dyn TaskExecutor>,
    clock: Arc<dyn Clock>,
    retry: Arc<RetryScheduler>,
    execution_timeout: Duration,
}

impl TaskLifecycle {
    pub fn new(
        store: Arc<dyn TaskStore>,
        results: Arc<dyn ResultStore>,
        executor: Arc<dyn TaskExecutor>,
        clock: Arc<dyn Clock>,
        retry: Arc<RetryScheduler>,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            store,
            results,
            executor,
            clock,
            retry,
            execution_timeout,
        }
    }

    /// 处理一个出队的任务，任何错误都不会向上传播
    pub async fn process(&self, task: Task) -> LifecycleOutcome {
        let task_id = task.id.clone();
        match self.run(task).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Task lifecycle aborted");
                LifecycleOutcome::Aborted
            }
        }
    }

    async fn run(&self, handle: Task) -> TaskflowResult<LifecycleOutcome> {
        // 队列中的句柄可能已过期（被更新或删除），以存储为准
        let mut task = match self.store.get_task(&handle.id).await {
            Ok(task) => task,
            Err(TaskflowError::TaskNotFound { .. }) => {
                debug!(task_id = %handle.id, "Task no longer exists, skipping");
                return Ok(LifecycleOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };
        if task.status != TaskStatus::Pending {
            debug!(task_id = %task.id, status = %task.status, "Task is not pending, skipping");
            return Ok(LifecycleOutcome::Skipped);
        }

        let now = self.clock.now();
        if !task.is_due(now) {
            let not_before = task.scheduled_at.unwrap_or(now);
            let delay = (not_before - now).to_std().unwrap_or_default();
            info!(
                task_id = %task.id,
                not_before = %not_before,
                "Task is not yet due, deferring"
            );
            self.retry.defer(task, delay);
            return Ok(LifecycleOutcome::Deferred { delay });
        }

        // 认领是条件写入：同一任务的多个句柄只有一个能把 pending 改为 processing
        task.transition(TaskStatus::Processing, now)?;
        match self
            .store
            .update_task_status(&task.id, TaskStatus::Pending, TaskStatus::Processing, now)
            .await
        {
            Ok(()) => {}
            Err(TaskflowError::InvalidStateTransition { from, .. }) => {
                debug!(task_id = %task.id, status = %from, "Task already claimed, skipping");
                return Ok(LifecycleOutcome::Skipped);
            }
            Err(TaskflowError::TaskNotFound { .. }) => {
                debug!(task_id = %task.id, "Task deleted before claim, skipping");
                return Ok(LifecycleOutcome::Skipped);
            }
            Err(e) => return Err(e),
        }

        let attempt = task.retries + 1;
        info!(task_id = %task.id, attempt, "Executing task");

        match self.execute(&task, attempt).await {
            Ok(output) => self.complete(task, output).await,
            Err(e) => self.handle_failure(task, e).await,
        }
    }

    /// 在独立的 tokio 任务中执行业务逻辑，超时和 panic 都转换为可重试的错误
    ///
    /// 执行句柄归本次调用所有：超时或外层 future 被丢弃（worker 被中止）时，
    /// 执行任务随之中止。
    async fn execute(&self, task: &Task, attempt: i32) -> TaskflowResult<ExecutionOutput> {
        let payload: serde_json::Value = serde_json::from_str(&task.payload)
            .map_err(|e| TaskflowError::invalid_payload(e.to_string()))?;

        let timeout = task.effective_timeout(self.execution_timeout);
        let context = ExecutionContext {
            task_id: task.id.clone(),
            attempt,
            payload,
            timeout,
            deadline: add_delay(self.clock.now(), timeout),
        };
        let executor = Arc::clone(&self.executor);
        let handle =
            AbortOnDropHandle::new(tokio::spawn(async move { executor.execute(&context).await }));

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result.map_err(|e| self.as_execution_failure(e)),
            Ok(Err(join_error)) => Err(TaskflowError::execution_error(format!(
                "executor {} terminated abnormally: {join_error}",
                self.executor.name()
            ))),
            Err(_) => Err(TaskflowError::ExecutionTimeout {
                seconds: timeout.as_secs(),
            }),
        }
    }

    /// 执行器返回的任何错误都按执行失败处理，非执行类错误包装后再进入重试
    fn as_execution_failure(&self, err: TaskflowError) -> TaskflowError {
        if err.is_retryable() {
            err
        } else {
            TaskflowError::execution_error(format!("executor {}: {err}", self.executor.name()))
        }
    }

    async fn complete(
        &self,
        mut task: Task,
        output: ExecutionOutput,
    ) -> TaskflowResult<LifecycleOutcome> {
        let now = self.clock.now();
        task.transition(TaskStatus::Completed, now)?;
        self.store
            .update_task_status(&task.id, TaskStatus::Processing, TaskStatus::Completed, now)
            .await?;

        let result = TaskResult::from_output(Uuid::new_v4().to_string(), task.id.clone(), output, now);
        self.results.create_result(&result).await?;

        info!(task_id = %task.id, result_id = %result.id, "Task completed");
        Ok(LifecycleOutcome::Completed {
            result_id: result.id,
        })
    }

    async fn handle_failure(
        &self,
        mut task: Task,
        cause: TaskflowError,
    ) -> TaskflowResult<LifecycleOutcome> {
        let now = self.clock.now();
        warn!(
            task_id = %task.id,
            retries = task.retries,
            max_retries = task.max_retries,
            error = %cause,
            "Task execution failed"
        );

        match self.retry.decide(&task) {
            RetryDecision::Exhausted => {
                task.transition(TaskStatus::Failed, now)?;
                task.next_retry_at = None;
                self.store
                    .update_task(&task, TaskStatus::Processing)
                    .await?;
                error!(
                    task_id = %task.id,
                    retries = task.retries,
                    "Task failed permanently, retries exhausted"
                );
                Ok(LifecycleOutcome::Failed)
            }
            RetryDecision::Retry { retries, delay } => {
                task.transition(TaskStatus::Pending, now)?;
                task.retries = retries;
                task.next_retry_at = Some(add_delay(now, delay));
                self.store
                    .update_task(&task, TaskStatus::Processing)
                    .await?;
                info!(
                    task_id = %task.id,
                    retries,
                    delay_ms = delay.as_millis() as u64,
                    "Task scheduled for retry"
                );
                self.retry.defer(task, delay);
                Ok(LifecycleOutcome::Retrying { retries, delay })
            }
        }
    }
}

fn add_delay(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_domain::messaging::TaskQueue;
    use taskflow_infrastructure::BoundedTaskQueue;
    use taskflow_testing_utils::{
        FailurePoint, ManualClock, MockTaskStore, Outcome, ScriptedExecutor, TaskBuilder,
    };

    struct Fixture {
        store: MockTaskStore,
        executor: ScriptedExecutor,
        clock: ManualClock,
        queue: Arc<BoundedTaskQueue>,
        lifecycle: TaskLifecycle,
    }

    fn fixture(executor: ScriptedExecutor, timeout: Duration) -> Fixture {
        let store = MockTaskStore::new();
        let clock = ManualClock::default();
        let queue = Arc::new(BoundedTaskQueue::new(10));
        let retry = Arc::new(RetryScheduler::new(queue.clone(), Duration::from_secs(1)));
        let lifecycle = TaskLifecycle::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(executor.clone()),
            Arc::new(clock.clone()),
            retry,
            timeout,
        );
        Fixture {
            store,
            executor,
            clock,
            queue,
            lifecycle,
        }
    }

    async fn seed(fixture: &Fixture, task: Task) -> Task {
        fixture.store.create_task(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn test_success_creates_one_result() {
        let f = fixture(ScriptedExecutor::always_succeed(), Duration::from_secs(5));
        let task = seed(&f, TaskBuilder::new().with_id("t1").build()).await;

        let outcome = f.lifecycle.process(task).await;
        assert!(matches!(outcome, LifecycleOutcome::Completed { .. }));

        assert_eq!(
            f.store.status_history("t1"),
            vec![TaskStatus::Pending, TaskStatus::Processing, TaskStatus::Completed]
        );
        assert_eq!(f.store.results_for("t1").len(), 1);
        assert!(f.queue.is_empty());
        // 时间戳来自注入的时钟
        assert_eq!(f.store.task("t1").unwrap().updated_at, f.clock.now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_schedules_retry() {
        let f = fixture(ScriptedExecutor::always_fail(), Duration::from_secs(5));
        let task = seed(&f, TaskBuilder::new().with_id("t1").with_max_retries(2).build()).await;
        let now = f.clock.now();

        let outcome = f.lifecycle.process(task).await;
        assert_eq!(
            outcome,
            LifecycleOutcome::Retrying {
                retries: 1,
                delay: Duration::from_secs(2)
            }
        );

        let stored = f.store.task("t1").unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.retries, 1);
        assert_eq!(stored.next_retry_at, Some(now + chrono::Duration::seconds(2)));
        assert!(stored.is_awaiting_retry());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(f.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_failed() {
        let f = fixture(ScriptedExecutor::always_fail(), Duration::from_secs(5));
        let task = seed(
            &f,
            TaskBuilder::new()
                .with_id("t1")
                .with_retries(2)
                .with_max_retries(2)
                .build(),
        )
        .await;

        assert_eq!(f.lifecycle.process(task).await, LifecycleOutcome::Failed);
        let stored = f.store.task("t1").unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.retries, 2);
        assert!(f.store.results().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_payload_is_retryable_failure() {
        let f = fixture(ScriptedExecutor::always_succeed(), Duration::from_secs(5));
        let task = seed(
            &f,
            TaskBuilder::new().with_id("t1").with_raw_payload("{not json").build(),
        )
        .await;

        let outcome = f.lifecycle.process(task).await;
        assert!(matches!(outcome, LifecycleOutcome::Retrying { retries: 1, .. }));
        assert_eq!(f.executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_not_yet_due_task_is_deferred_without_retry() {
        let f = fixture(ScriptedExecutor::always_succeed(), Duration::from_secs(5));
        let not_before = f.clock.now() + chrono::Duration::hours(1);
        let task = seed(
            &f,
            TaskBuilder::new().with_id("t1").with_scheduled_at(not_before).build(),
        )
        .await;

        let outcome = f.lifecycle.process(task).await;
        assert_eq!(
            outcome,
            LifecycleOutcome::Deferred {
                delay: Duration::from_secs(3600)
            }
        );

        let stored = f.store.task("t1").unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.retries, 0);
        assert_eq!(f.store.status_history("t1"), vec![TaskStatus::Pending]);
        assert_eq!(f.executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_panic_is_converted_to_retryable_failure() {
        let executor = ScriptedExecutor::new(vec![Outcome::Panic("boom".to_string())], Outcome::succeed());
        let f = fixture(executor, Duration::from_secs(5));
        let task = seed(&f, TaskBuilder::new().with_id("t1").build()).await;

        let outcome = f.lifecycle.process(task).await;
        assert!(matches!(outcome, LifecycleOutcome::Retrying { retries: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_timeout() {
        let executor = ScriptedExecutor::new(
            vec![Outcome::Sleep(Duration::from_secs(600))],
            Outcome::succeed(),
        );
        let f = fixture(executor, Duration::from_secs(1));
        let task = seed(&f, TaskBuilder::new().with_id("t1").build()).await;

        let outcome = f.lifecycle.process(task).await;
        assert!(matches!(outcome, LifecycleOutcome::Retrying { retries: 1, .. }));
    }

    #[tokio::test]
    async fn test_persistence_failure_aborts_attempt() {
        let f = fixture(ScriptedExecutor::always_succeed(), Duration::from_secs(5));
        let task = seed(&f, TaskBuilder::new().with_id("t1").build()).await;
        f.store
            .inject_failure(FailurePoint::UpdateStatus(TaskStatus::Processing));

        assert_eq!(f.lifecycle.process(task).await, LifecycleOutcome::Aborted);
        assert_eq!(f.executor.call_count(), 0);
        assert_eq!(f.store.task("t1").unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_deleted_or_finished_tasks_are_skipped() {
        let f = fixture(ScriptedExecutor::always_succeed(), Duration::from_secs(5));
        let deleted = seed(&f, TaskBuilder::new().with_id("t1").build()).await;
        f.store.delete_task("t1").await.unwrap();
        assert_eq!(f.lifecycle.process(deleted).await, LifecycleOutcome::Skipped);

        let done = seed(
            &f,
            TaskBuilder::new()
                .with_id("t2")
                .with_status(TaskStatus::Completed)
                .build(),
        )
        .await;
        assert_eq!(f.lifecycle.process(done).await, LifecycleOutcome::Skipped);
        assert_eq!(f.executor.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_handle_loses_claim() {
        let f = fixture(ScriptedExecutor::always_succeed(), Duration::from_secs(5));
        let task = seed(&f, TaskBuilder::new().with_id("t1").build()).await;
        // 第一个句柄读到 pending 后停住，第二个句柄在此期间跑完整个生命周期
        f.store.delay_next_read(Duration::from_secs(1));

        let (stale, fresh) = tokio::join!(
            f.lifecycle.process(task.clone()),
            f.lifecycle.process(task)
        );

        assert_eq!(stale, LifecycleOutcome::Skipped);
        assert!(matches!(fresh, LifecycleOutcome::Completed { .. }));
        assert_eq!(f.executor.call_count(), 1);
        assert_eq!(f.store.results_for("t1").len(), 1);
        assert_eq!(
            f.store.status_history("t1"),
            vec![TaskStatus::Pending, TaskStatus::Processing, TaskStatus::Completed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_task_timeout_shorter_than_engine_default() {
        let executor = ScriptedExecutor::new(
            vec![Outcome::Sleep(Duration::from_secs(5))],
            Outcome::succeed(),
        );
        let f = fixture(executor, Duration::from_secs(30));
        let task = seed(
            &f,
            TaskBuilder::new().with_id("t1").with_execution_timeout(1).build(),
        )
        .await;

        let started = tokio::time::Instant::now();
        let outcome = f.lifecycle.process(task).await;
        assert!(matches!(outcome, LifecycleOutcome::Retrying { retries: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(2));

        let call = &f.executor.calls()[0];
        assert_eq!(call.timeout, Duration::from_secs(1));
        assert_eq!(call.deadline, f.clock.now() + chrono::Duration::seconds(1));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(f.executor.finished_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_task_timeout_cannot_exceed_engine_limit() {
        let executor = ScriptedExecutor::new(
            vec![Outcome::Sleep(Duration::from_secs(5))],
            Outcome::succeed(),
        );
        let f = fixture(executor, Duration::from_secs(2));
        let task = seed(
            &f,
            TaskBuilder::new().with_id("t1").with_execution_timeout(60).build(),
        )
        .await;

        let outcome = f.lifecycle.process(task).await;
        assert!(matches!(outcome, LifecycleOutcome::Retrying { retries: 1, .. }));
        assert_eq!(f.executor.calls()[0].timeout, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_lifecycle_aborts_execution() {
        let executor = ScriptedExecutor::new(
            vec![Outcome::Sleep(Duration::from_secs(10))],
            Outcome::succeed(),
        );
        let f = fixture(executor, Duration::from_secs(30));
        let task = seed(&f, TaskBuilder::new().with_id("t1").build()).await;

        let interrupted =
            tokio::time::timeout(Duration::from_secs(1), f.lifecycle.process(task)).await;
        assert!(interrupted.is_err());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(f.executor.call_count(), 1);
        assert_eq!(f.executor.finished_count(), 0);
        assert!(f.store.results().is_empty());
        assert_eq!(f.store.task("t1").unwrap().status, TaskStatus::Processing);
    }

    struct LookupFailingExecutor;

    #[async_trait::async_trait]
    impl TaskExecutor for LookupFailingExecutor {
        async fn execute(&self, _context: &ExecutionContext) -> TaskflowResult<ExecutionOutput> {
            Err(TaskflowError::task_not_found("upstream"))
        }
    }

    #[tokio::test]
    async fn test_executor_lookup_error_counts_as_execution_failure() {
        let store = MockTaskStore::new();
        let queue = Arc::new(BoundedTaskQueue::new(10));
        let lifecycle = TaskLifecycle::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(LookupFailingExecutor),
            Arc::new(ManualClock::default()),
            Arc::new(RetryScheduler::new(queue, Duration::from_secs(1))),
            Duration::from_secs(5),
        );
        let task = TaskBuilder::new().with_id("t1").build();
        store.create_task(&task).await.unwrap();

        let outcome = lifecycle.process(task).await;
        assert!(matches!(outcome, LifecycleOutcome::Retrying { retries: 1, .. }));
        assert_eq!(store.task("t1").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_add_delay_saturates() {
        let now = Utc::now();
        assert_eq!(add_delay(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(
            add_delay(now, Duration::from_secs(2)),
            now + chrono::Duration::seconds(2)
        );
    }
}
