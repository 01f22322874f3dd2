//! Mock implementations of the store, executor and clock traits
//!
//! All mocks keep their state behind `Arc<Mutex<..>>` so a test can hold a
//! clone and inspect what the engine did after the fact.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskflow_domain::entities::{
    ExecutionContext, ExecutionOutput, Task, TaskFilter, TaskResult, TaskStatus,
};
use taskflow_domain::repositories::{ResultStore, TaskStore};
use taskflow_domain::{Clock, TaskExecutor};
use taskflow_errors::{TaskflowError, TaskflowResult};

/// 一次持久化写入后的任务快照
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    pub retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskSnapshot {
    fn from(task: &Task) -> Self {
        Self {
            status: task.status,
            retries: task.retries,
            next_retry_at: task.next_retry_at,
        }
    }
}

/// 可注入的持久化失败点，每个只触发一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    CreateTask,
    GetTask,
    UpdateTask,
    UpdateStatus(TaskStatus),
    CreateResult,
}

/// Mock implementation of TaskStore and ResultStore for testing
#[derive(Debug, Clone, Default)]
pub struct MockTaskStore {
    tasks: Arc<Mutex<HashMap<String, Task>>>,
    results: Arc<Mutex<Vec<TaskResult>>>,
    history: Arc<Mutex<HashMap<String, Vec<TaskSnapshot>>>>,
    failures: Arc<Mutex<Vec<FailurePoint>>>,
    read_delay: Arc<Mutex<Option<Duration>>>,
}

impl MockTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let store = Self::new();
        {
            let mut map = store.tasks.lock().unwrap();
            for task in tasks {
                map.insert(task.id.clone(), task);
            }
        }
        store
    }

    /// 下一次命中该操作时返回存储错误
    pub fn inject_failure(&self, point: FailurePoint) {
        self.failures.lock().unwrap().push(point);
    }

    /// 下一次 `get_task` 先读取快照，再等待 `by` 后返回
    ///
    /// 调用方拿到的是等待前的旧快照，用于构造读后写的竞争。
    pub fn delay_next_read(&self, by: Duration) {
        *self.read_delay.lock().unwrap() = Some(by);
    }

    /// 尚未触发的注入失败数
    pub fn failures_remaining(&self) -> usize {
        self.failures.lock().unwrap().len()
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.tasks.lock().unwrap().get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// 按写入顺序记录的状态序列，包括创建时的 pending
    pub fn status_history(&self, id: &str) -> Vec<TaskStatus> {
        self.snapshots(id).iter().map(|s| s.status).collect()
    }

    pub fn snapshots(&self, id: &str) -> Vec<TaskSnapshot> {
        self.history
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn results(&self) -> Vec<TaskResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn results_for(&self, task_id: &str) -> Vec<TaskResult> {
        self.results
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }

    fn take_failure(&self, point: FailurePoint) -> TaskflowResult<()> {
        let mut failures = self.failures.lock().unwrap();
        if let Some(pos) = failures.iter().position(|p| *p == point) {
            failures.remove(pos);
            return Err(TaskflowError::storage_error(format!(
                "injected failure: {point:?}"
            )));
        }
        Ok(())
    }

    fn record(&self, task: &Task) {
        self.history
            .lock()
            .unwrap()
            .entry(task.id.clone())
            .or_default()
            .push(TaskSnapshot::from(task));
    }
}

#[async_trait]
impl TaskStore for MockTaskStore {
    async fn create_task(&self, task: &Task) -> TaskflowResult<String> {
        self.take_failure(FailurePoint::CreateTask)?;
        self.tasks
            .lock()
            .unwrap()
            .insert(task.id.clone(), task.clone());
        self.record(task);
        Ok(task.id.clone())
    }

    async fn get_task(&self, id: &str) -> TaskflowResult<Task> {
        self.take_failure(FailurePoint::GetTask)?;
        let snapshot = self
            .tasks
            .lock()
            .unwrap()
            .get(id)
            .filter(|t| t.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| TaskflowError::task_not_found(id));

        let delay = self.read_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        snapshot
    }

    async fn update_task(&self, task: &Task, expected: TaskStatus) -> TaskflowResult<()> {
        self.take_failure(FailurePoint::UpdateTask)?;
        {
            let mut tasks = self.tasks.lock().unwrap();
            match tasks.get_mut(&task.id) {
                Some(existing) if existing.deleted_at.is_none() => {
                    if existing.status != expected {
                        return Err(TaskflowError::invalid_transition(
                            existing.status,
                            task.status,
                        ));
                    }
                    *existing = task.clone();
                }
                _ => return Err(TaskflowError::task_not_found(&task.id)),
            }
        }
        self.record(task);
        Ok(())
    }

    async fn update_task_status(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
        updated_at: DateTime<Utc>,
    ) -> TaskflowResult<()> {
        self.take_failure(FailurePoint::UpdateStatus(to))?;
        let updated = {
            let mut tasks = self.tasks.lock().unwrap();
            match tasks.get_mut(id) {
                Some(existing) if existing.deleted_at.is_none() => {
                    if existing.status != from {
                        return Err(TaskflowError::invalid_transition(existing.status, to));
                    }
                    existing.status = to;
                    existing.updated_at = updated_at;
                    existing.clone()
                }
                _ => return Err(TaskflowError::task_not_found(id)),
            }
        };
        self.record(&updated);
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> TaskflowResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(id) {
            Some(existing) if existing.deleted_at.is_none() => {
                existing.deleted_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(TaskflowError::task_not_found(id)),
        }
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> TaskflowResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        let mut matched: Vec<Task> = tasks.values().filter(|t| filter.matches(t)).cloned().collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_unfinished_tasks(&self) -> TaskflowResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        let mut unfinished: Vec<Task> = tasks
            .values()
            .filter(|t| t.deleted_at.is_none() && !t.is_terminal())
            .cloned()
            .collect();
        unfinished.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(unfinished)
    }
}

#[async_trait]
impl ResultStore for MockTaskStore {
    async fn create_result(&self, result: &TaskResult) -> TaskflowResult<()> {
        self.take_failure(FailurePoint::CreateResult)?;
        self.results.lock().unwrap().push(result.clone());
        Ok(())
    }

    async fn get_result(&self, id: &str) -> TaskflowResult<TaskResult> {
        self.results
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| TaskflowError::result_not_found(id))
    }

    async fn update_result(&self, result: &TaskResult) -> TaskflowResult<()> {
        let mut results = self.results.lock().unwrap();
        match results.iter_mut().find(|r| r.id == result.id) {
            Some(existing) => {
                *existing = result.clone();
                Ok(())
            }
            None => Err(TaskflowError::result_not_found(&result.id)),
        }
    }

    async fn delete_result(&self, id: &str) -> TaskflowResult<()> {
        let mut results = self.results.lock().unwrap();
        let before = results.len();
        results.retain(|r| r.id != id);
        if results.len() == before {
            return Err(TaskflowError::result_not_found(id));
        }
        Ok(())
    }

    async fn list_results_by_task(&self, task_id: &str) -> TaskflowResult<Vec<TaskResult>> {
        Ok(self.results_for(task_id))
    }
}

/// 脚本化执行器每次调用的结果
#[derive(Debug, Clone)]
pub enum Outcome {
    Succeed(ExecutionOutput),
    Fail(String),
    Panic(String),
    /// 先睡眠再成功，用于超时与优雅关闭场景
    Sleep(Duration),
}

impl Outcome {
    pub fn succeed() -> Self {
        Outcome::Succeed(ExecutionOutput::default())
    }

    pub fn fail(msg: &str) -> Self {
        Outcome::Fail(msg.to_string())
    }
}

/// 被调用时的记录
#[derive(Debug, Clone)]
pub struct ExecutorCall {
    pub task_id: String,
    pub attempt: i32,
    pub payload: serde_json::Value,
    pub timeout: Duration,
    pub deadline: DateTime<Utc>,
    pub at: tokio::time::Instant,
}

/// 按脚本依次返回结果的执行器，脚本耗尽后使用 fallback
#[derive(Debug, Clone)]
pub struct ScriptedExecutor {
    script: Arc<Mutex<VecDeque<Outcome>>>,
    fallback: Outcome,
    calls: Arc<Mutex<Vec<ExecutorCall>>>,
    finished: Arc<AtomicUsize>,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<Outcome>, fallback: Outcome) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            fallback,
            calls: Arc::new(Mutex::new(Vec::new())),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn always_succeed() -> Self {
        Self::new(Vec::new(), Outcome::succeed())
    }

    pub fn always_fail() -> Self {
        Self::new(Vec::new(), Outcome::fail("scripted failure"))
    }

    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// 跑完脚本的调用数，被中止或 panic 的调用不计入
    pub fn finished_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, context: &ExecutionContext) -> TaskflowResult<ExecutionOutput> {
        self.calls.lock().unwrap().push(ExecutorCall {
            task_id: context.task_id.clone(),
            attempt: context.attempt,
            payload: context.payload.clone(),
            timeout: context.timeout,
            deadline: context.deadline,
            at: tokio::time::Instant::now(),
        });

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let result = match outcome {
            Outcome::Succeed(output) => Ok(output),
            Outcome::Fail(msg) => Err(TaskflowError::execution_error(msg)),
            Outcome::Panic(msg) => panic!("{msg}"),
            Outcome::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(ExecutionOutput::default())
            }
        };
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// 只有测试显式推进才会变化的时钟
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
