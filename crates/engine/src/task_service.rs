use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskflow_config::EngineConfig;
use taskflow_domain::entities::{NewTask, Task, TaskFilter, TaskStatus};
use taskflow_domain::messaging::TaskQueue;
use taskflow_domain::repositories::{ResultStore, TaskStore};
use taskflow_domain::value_objects::TaskUpdate;
use taskflow_domain::{Clock, SystemClock, TaskExecutor};
use taskflow_errors::{TaskflowError, TaskflowResult};
use taskflow_infrastructure::BoundedTaskQueue;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::retry_scheduler::RetryScheduler;
use crate::task_lifecycle::TaskLifecycle;
use crate::worker_pool::WorkerPool;

/// 任务服务：提交入口，同时持有worker池的生命周期
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
    retry: Arc<RetryScheduler>,
    pool: WorkerPool,
    config: EngineConfig,
    started: AtomicBool,
    /// 对账与启动互斥，对账期间不会有worker认领任务
    startup: Mutex<()>,
}

pub struct TaskServiceBuilder {
    store: Arc<dyn TaskStore>,
    results: Arc<dyn ResultStore>,
    executor: Arc<dyn TaskExecutor>,
    clock: Option<Arc<dyn Clock>>,
    queue: Option<Arc<dyn TaskQueue>>,
    config: EngineConfig,
}

impl TaskServiceBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 替换默认的有界内存队列
    pub fn with_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> TaskService {
        let config = self.config;
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let queue: Arc<dyn TaskQueue> = match self.queue {
            Some(queue) => queue,
            None => Arc::new(BoundedTaskQueue::new(config.queue_capacity)),
        };

        let retry = Arc::new(RetryScheduler::new(
            Arc::clone(&queue),
            config.backoff_unit(),
        ));
        let lifecycle = Arc::new(TaskLifecycle::new(
            Arc::clone(&self.store),
            self.results,
            self.executor,
            Arc::clone(&clock),
            Arc::clone(&retry),
            config.execution_timeout(),
        ));
        let pool = WorkerPool::new(Arc::clone(&queue), lifecycle);

        TaskService {
            store: self.store,
            queue,
            clock,
            retry,
            pool,
            config,
            started: AtomicBool::new(false),
            startup: Mutex::new(()),
        }
    }
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        results: Arc<dyn ResultStore>,
        executor: Arc<dyn TaskExecutor>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self::builder(store, results, executor)
            .with_clock(clock)
            .with_config(config)
            .build()
    }

    pub fn builder(
        store: Arc<dyn TaskStore>,
        results: Arc<dyn ResultStore>,
        executor: Arc<dyn TaskExecutor>,
    ) -> TaskServiceBuilder {
        TaskServiceBuilder {
            store,
            results,
            executor,
            clock: None,
            queue: None,
            config: EngineConfig::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    pub fn retry_scheduler(&self) -> &Arc<RetryScheduler> {
        &self.retry
    }

    /// 校验并持久化任务，然后尽力入队
    ///
    /// 队列满或已关闭时任务仍以 pending 保存在存储中，调用方照常拿到任务，
    /// 只有校验和持久化错误会返回给调用方。
    pub async fn submit(&self, request: NewTask) -> TaskflowResult<Task> {
        request.validate()?;

        let task = Task::from_submission(
            request,
            Uuid::new_v4().to_string(),
            self.clock.now(),
            self.config.default_max_retries,
        );
        self.store.create_task(&task).await?;
        info!(task_id = %task.id, title = %task.title, "Task submitted");

        if let Err(e) = self.queue.try_enqueue(task.clone()) {
            warn!(
                task_id = %task.id,
                error = %e,
                "Task persisted as pending but not enqueued"
            );
        }

        Ok(task)
    }

    /// 启动worker池，只能调用一次
    pub async fn start(&self, worker_count: usize) -> TaskflowResult<()> {
        if worker_count == 0 {
            return Err(TaskflowError::validation_error(
                "worker_count must be greater than 0",
            ));
        }
        let _startup = self.startup.lock().await;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TaskflowError::Internal("already started".to_string()));
        }

        self.pool.start(worker_count).await;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub async fn get_task(&self, id: &str) -> TaskflowResult<Task> {
        self.store.get_task(id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> TaskflowResult<Vec<Task>> {
        self.store.list_tasks(filter).await
    }

    /// 部分更新，执行中和已结束的任务不允许修改
    ///
    /// 写入以读到的 pending 为前提，读写之间被worker认领的任务返回
    /// `InvalidStateTransition`，存储中的记录保持不变。
    pub async fn update_task(&self, id: &str, update: TaskUpdate) -> TaskflowResult<Task> {
        let mut task = self.store.get_task(id).await?;
        if update.is_empty() {
            return Ok(task);
        }
        if task.status != TaskStatus::Pending {
            return Err(TaskflowError::invalid_transition(task.status, "updated"));
        }

        update.apply(&mut task, self.clock.now())?;
        self.store.update_task(&task, TaskStatus::Pending).await?;
        info!(task_id = %task.id, "Task updated");
        Ok(task)
    }

    /// 软删除；已在队列中的句柄会在出队时被跳过
    pub async fn delete_task(&self, id: &str) -> TaskflowResult<()> {
        self.store.delete_task(id).await?;
        info!(task_id = %id, "Task deleted");
        Ok(())
    }

    /// 启动时的对账扫描，把存储中未结束的任务重新交给引擎
    ///
    /// processing 状态的任务说明上一个进程在执行中退出，先重置为 pending；
    /// 重试等待未到期的任务按剩余时间延后入队。返回接管的任务数。
    ///
    /// 只能在 `start` 之前调用：worker启动后 processing 表示正在执行，
    /// 此时重置会导致同一任务被执行两次。
    pub async fn reconcile(&self) -> TaskflowResult<usize> {
        let _startup = self.startup.lock().await;
        if self.is_started() {
            return Err(TaskflowError::Internal(
                "reconcile must run before start".to_string(),
            ));
        }

        let tasks = self.store.list_unfinished_tasks().await?;
        let now = self.clock.now();
        let mut recovered = 0;

        for mut task in tasks {
            if task.status == TaskStatus::Processing {
                task.transition(TaskStatus::Pending, now)?;
                match self.store.update_task(&task, TaskStatus::Processing).await {
                    Ok(()) => {
                        warn!(task_id = %task.id, "Reset interrupted task from processing to pending")
                    }
                    Err(TaskflowError::InvalidStateTransition { .. })
                    | Err(TaskflowError::TaskNotFound { .. }) => {
                        warn!(task_id = %task.id, "Task changed during reconciliation, skipping");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            let retry_at = task
                .next_retry_at
                .filter(|retry_at| task.is_awaiting_retry() && *retry_at > now);
            match retry_at {
                Some(retry_at) => {
                    let delay = (retry_at - now).to_std().unwrap_or_default();
                    self.retry.defer(task, delay);
                }
                _ => {
                    if let Err(e) = self.queue.try_enqueue(task.clone()) {
                        warn!(task_id = %task.id, error = %e, "Reconciled task not enqueued");
                        continue;
                    }
                }
            }
            recovered += 1;
        }

        info!("Reconciliation recovered {} unfinished tasks", recovered);
        Ok(recovered)
    }

    /// 优雅关闭：关闭队列，取消未触发的重试定时器，等待执行中的任务结束
    ///
    /// 在 `grace` 内所有worker退出时返回 true。
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!("Shutting down task service");
        self.queue.close();
        self.retry.shutdown().await;
        let drained = self.pool.wait(grace).await;
        info!(drained, "Task service stopped");
        drained
    }
}
