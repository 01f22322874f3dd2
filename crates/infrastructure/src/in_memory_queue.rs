use async_trait::async_trait;
use std::sync::Arc;
use taskflow_domain::entities::Task;
use taskflow_domain::messaging::TaskQueue;
use taskflow_errors::{TaskflowError, TaskflowResult};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

/// 有界内存任务队列
///
/// 基于 Tokio 有界 channel 实现，进程内的多个worker共享同一个接收端。
/// 入队使用 `try_send`，队列满时立即失败而不是等待，调用方据此把任务留在存储中。
#[derive(Debug)]
pub struct BoundedTaskQueue {
    sender: mpsc::Sender<Task>,
    /// 使用 Arc 包装接收端，支持多个消费者
    receiver: Arc<Mutex<mpsc::Receiver<Task>>>,
    closed: watch::Sender<bool>,
    capacity: usize,
}

impl BoundedTaskQueue {
    pub fn new(capacity: usize) -> Self {
        // tokio 的有界 channel 不接受 0 容量
        let capacity = capacity.max(1);
        info!("Creating bounded task queue with capacity {}", capacity);

        let (sender, receiver) = mpsc::channel(capacity);
        let (closed, _) = watch::channel(false);

        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            closed,
            capacity,
        }
    }
}

#[async_trait]
impl TaskQueue for BoundedTaskQueue {
    fn try_enqueue(&self, task: Task) -> TaskflowResult<()> {
        if self.is_closed() {
            return Err(TaskflowError::QueueClosed);
        }

        let task_id = task.id.clone();
        match self.sender.try_send(task) {
            Ok(()) => {
                debug!("Task {} enqueued, queue length {}", task_id, self.len());
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "Task queue is full (capacity {}), task {} not enqueued",
                    self.capacity, task_id
                );
                Err(TaskflowError::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TaskflowError::QueueClosed),
        }
    }

    async fn dequeue(&self) -> Option<Task> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return None;
        }

        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            _ = async { closed.wait_for(|closed| *closed).await.is_ok() } => None,
            task = receiver.recv() => task,
        }
    }

    fn close(&self) {
        if !self.closed.send_replace(true) {
            info!(
                "Task queue closed with {} undelivered tasks",
                self.len()
            );
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
