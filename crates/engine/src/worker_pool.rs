use std::sync::Arc;
use std::time::Duration;

use taskflow_domain::messaging::TaskQueue;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::task_lifecycle::TaskLifecycle;

/// 固定数量的worker，共享同一个任务队列
///
/// 每个worker一次只处理一个任务，队列关闭后在处理完手头任务时退出。
pub struct WorkerPool {
    queue: Arc<dyn TaskQueue>,
    lifecycle: Arc<TaskLifecycle>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn TaskQueue>, lifecycle: Arc<TaskLifecycle>) -> Self {
        Self {
            queue,
            lifecycle,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub async fn start(&self, worker_count: usize) {
        let mut handles = self.handles.lock().await;
        for worker_id in 0..worker_count {
            let queue = Arc::clone(&self.queue);
            let lifecycle = Arc::clone(&self.lifecycle);
            handles.push(tokio::spawn(worker_loop(worker_id, queue, lifecycle)));
        }
        info!("Worker pool started with {} workers", worker_count);
    }

    pub async fn worker_count(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// 等待所有worker退出，超过 `grace` 则中止剩余worker并返回 false
    ///
    /// 执行句柄由worker持有，中止worker会连带中止正在运行的执行。
    /// 调用前应先关闭队列，否则worker不会退出。
    pub async fn wait(&self, grace: Duration) -> bool {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().await);
        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        let drained = tokio::time::timeout(grace, async move {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!("Worker terminated abnormally: {}", e);
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                info!("All workers stopped");
                true
            }
            Err(_) => {
                warn!(
                    "Workers did not stop within {:?}, aborting remaining workers",
                    grace
                );
                for abort_handle in abort_handles {
                    abort_handle.abort();
                }
                false
            }
        }
    }
}

async fn worker_loop(worker_id: usize, queue: Arc<dyn TaskQueue>, lifecycle: Arc<TaskLifecycle>) {
    debug!(worker_id, "Worker started");

    while let Some(task) = queue.dequeue().await {
        let task_id = task.id.clone();
        let outcome = lifecycle.process(task).await;
        debug!(worker_id, task_id = %task_id, ?outcome, "Task processed");
    }

    debug!(worker_id, "Worker stopped, queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry_scheduler::RetryScheduler;
    use taskflow_domain::entities::TaskStatus;
    use taskflow_domain::repositories::TaskStore;
    use taskflow_infrastructure::BoundedTaskQueue;
    use taskflow_testing_utils::{
        wait_for_status, ManualClock, MockTaskStore, Outcome, ScriptedExecutor, TaskBuilder,
    };

    fn pool(store: &MockTaskStore, executor: &ScriptedExecutor) -> (Arc<BoundedTaskQueue>, WorkerPool) {
        let queue = Arc::new(BoundedTaskQueue::new(100));
        let retry = Arc::new(RetryScheduler::new(queue.clone(), Duration::from_millis(10)));
        let lifecycle = Arc::new(TaskLifecycle::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(executor.clone()),
            Arc::new(ManualClock::default()),
            retry,
            Duration::from_secs(5),
        ));
        (queue.clone(), WorkerPool::new(queue, lifecycle))
    }

    #[tokio::test]
    async fn test_workers_drain_queue() {
        let store = MockTaskStore::new();
        let executor = ScriptedExecutor::always_succeed();
        let (queue, pool) = pool(&store, &executor);

        for i in 0..20 {
            let task = TaskBuilder::new().with_id(&format!("t{i}")).build();
            store.create_task(&task).await.unwrap();
            queue.try_enqueue(task).unwrap();
        }

        pool.start(4).await;
        assert_eq!(pool.worker_count().await, 4);

        for i in 0..20 {
            assert!(
                wait_for_status(&store, &format!("t{i}"), TaskStatus::Completed, Duration::from_secs(5))
                    .await
            );
        }
        assert_eq!(store.results().len(), 20);
        assert_eq!(executor.call_count(), 20);

        queue.close();
        assert!(pool.wait(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_lets_in_flight_task_finish() {
        let store = MockTaskStore::new();
        let executor = ScriptedExecutor::new(
            vec![Outcome::Sleep(Duration::from_secs(2))],
            Outcome::succeed(),
        );
        let (queue, pool) = pool(&store, &executor);

        let task = TaskBuilder::new().with_id("slow").build();
        store.create_task(&task).await.unwrap();
        queue.try_enqueue(task).unwrap();
        pool.start(1).await;

        assert!(wait_for_status(&store, "slow", TaskStatus::Processing, Duration::from_secs(1)).await);
        queue.close();

        assert!(pool.wait(Duration::from_secs(10)).await);
        assert_eq!(store.task("slow").unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_gives_up_after_grace() {
        let store = MockTaskStore::new();
        let executor = ScriptedExecutor::new(
            vec![Outcome::Sleep(Duration::from_secs(4))],
            Outcome::succeed(),
        );
        let (queue, pool) = pool(&store, &executor);

        let task = TaskBuilder::new().with_id("slow").build();
        store.create_task(&task).await.unwrap();
        queue.try_enqueue(task).unwrap();
        pool.start(1).await;

        assert!(wait_for_status(&store, "slow", TaskStatus::Processing, Duration::from_secs(1)).await);
        queue.close();

        assert!(!pool.wait(Duration::from_secs(1)).await);
    }
}
