use std::sync::Arc;
use std::time::Duration;

use taskflow_domain::entities::Task;
use taskflow_domain::messaging::TaskQueue;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// 第 `retries` 次重试前的等待时间：`unit * 2^retries`
///
/// 不设上限也不加抖动，按纳秒在 u128 中计算，溢出时饱和到 `Duration::MAX`。
pub fn backoff_delay(unit: Duration, retries: i32) -> Duration {
    let exponent = retries.max(0) as u32;
    if unit.is_zero() {
        return Duration::ZERO;
    }
    if exponent >= u128::BITS {
        return Duration::MAX;
    }

    let nanos = unit.as_nanos().saturating_mul(1u128 << exponent);
    if nanos >= Duration::MAX.as_nanos() {
        return Duration::MAX;
    }
    let secs = (nanos / 1_000_000_000) as u64;
    let subsec = (nanos % 1_000_000_000) as u32;
    Duration::new(secs, subsec)
}

/// 一次失败后的重试决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 递增后的重试次数及等待时间
    Retry { retries: i32, delay: Duration },
    /// 重试次数已用完
    Exhausted,
}

/// 重试调度器
///
/// 每个延迟重入队是一个独立的定时任务，由 `TaskTracker` 统一跟踪，
/// 关闭时通过 `CancellationToken` 取消尚未触发的定时器。
pub struct RetryScheduler {
    queue: Arc<dyn TaskQueue>,
    backoff_unit: Duration,
    timers: TaskTracker,
    cancel: CancellationToken,
}

impl RetryScheduler {
    pub fn new(queue: Arc<dyn TaskQueue>, backoff_unit: Duration) -> Self {
        Self {
            queue,
            backoff_unit,
            timers: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn backoff_unit(&self) -> Duration {
        self.backoff_unit
    }

    pub fn backoff_delay(&self, retries: i32) -> Duration {
        backoff_delay(self.backoff_unit, retries)
    }

    /// 先检查再递增：`retries` 已等于 `max_retries` 的任务不再重试，
    /// 因此 `retries <= max_retries` 始终成立。
    pub fn decide(&self, task: &Task) -> RetryDecision {
        if !task.has_retries_left() {
            return RetryDecision::Exhausted;
        }
        let retries = task.retries + 1;
        RetryDecision::Retry {
            retries,
            delay: self.backoff_delay(retries),
        }
    }

    /// 在 `delay` 之后把任务放回队列
    ///
    /// 关闭后调用会被忽略；定时器触发时队列已满或已关闭只记录日志，
    /// 任务仍以 pending 状态保存在存储中。
    pub fn defer(&self, task: Task, delay: Duration) {
        if self.cancel.is_cancelled() {
            debug!(task_id = %task.id, "Retry scheduler is shut down, task not deferred");
            return;
        }

        let queue = Arc::clone(&self.queue);
        let cancel = self.cancel.clone();
        let task_id = task.id.clone();

        debug!(task_id = %task_id, delay_ms = delay.as_millis() as u64, "Scheduling deferred re-enqueue");

        self.timers.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(task_id = %task_id, "Retry timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    match queue.try_enqueue(task) {
                        Ok(()) => debug!(task_id = %task_id, "Deferred task re-enqueued"),
                        Err(e) => warn!(
                            task_id = %task_id,
                            error = %e,
                            "Deferred re-enqueue failed, task stays pending in store"
                        ),
                    }
                }
            }
        });
    }

    /// 尚未结束的定时器数量
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 取消所有未触发的定时器并等待它们退出
    pub async fn shutdown(&self) {
        let pending = self.timers.len();
        self.cancel.cancel();
        self.timers.close();
        self.timers.wait().await;
        info!("Retry scheduler stopped, {} pending timers cancelled", pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskflow_domain::entities::NewTask;
    use taskflow_infrastructure::BoundedTaskQueue;

    fn task(id: &str, retries: i32, max_retries: i32) -> Task {
        let mut task = Task::from_submission(NewTask::new(id), id.to_string(), Utc::now(), max_retries);
        task.retries = retries;
        task
    }

    #[test]
    fn test_backoff_delay_doubles() {
        let unit = Duration::from_secs(1);
        assert_eq!(backoff_delay(unit, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(unit, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(unit, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(unit, 10), Duration::from_secs(1024));
        assert_eq!(
            backoff_delay(Duration::from_millis(250), 3),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_backoff_delay_saturates() {
        let unit = Duration::from_secs(1);
        // 指数超过 32 仍按真实的 2^n 计算
        assert_eq!(backoff_delay(unit, 40), Duration::from_secs(1 << 40));
        assert_eq!(
            backoff_delay(Duration::from_millis(500), 40),
            Duration::from_secs(1 << 39)
        );
        assert_eq!(backoff_delay(unit, 63), Duration::from_secs(1 << 63));
        assert_eq!(backoff_delay(unit, 64), Duration::MAX);
        assert_eq!(backoff_delay(unit, 200), Duration::MAX);
        assert_eq!(backoff_delay(unit, i32::MAX), Duration::MAX);
        assert_eq!(backoff_delay(Duration::MAX, 5), Duration::MAX);
        assert_eq!(backoff_delay(Duration::ZERO, 200), Duration::ZERO);
        assert_eq!(backoff_delay(unit, -1), unit);
    }

    #[tokio::test]
    async fn test_decide_checks_before_incrementing() {
        let queue = Arc::new(BoundedTaskQueue::new(10));
        let scheduler = RetryScheduler::new(queue, Duration::from_secs(1));

        assert_eq!(
            scheduler.decide(&task("t", 0, 2)),
            RetryDecision::Retry {
                retries: 1,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(
            scheduler.decide(&task("t", 1, 2)),
            RetryDecision::Retry {
                retries: 2,
                delay: Duration::from_secs(4)
            }
        );
        assert_eq!(scheduler.decide(&task("t", 2, 2)), RetryDecision::Exhausted);
        assert_eq!(scheduler.decide(&task("t", 0, 0)), RetryDecision::Exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_defer_re_enqueues_after_delay() {
        let queue = Arc::new(BoundedTaskQueue::new(10));
        let scheduler = RetryScheduler::new(queue.clone(), Duration::from_secs(1));

        scheduler.defer(task("t1", 1, 3), Duration::from_secs(2));
        assert_eq!(scheduler.pending_timers(), 1);

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue().await.unwrap().id, "t1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_timers() {
        let queue = Arc::new(BoundedTaskQueue::new(10));
        let scheduler = RetryScheduler::new(queue.clone(), Duration::from_secs(1));

        scheduler.defer(task("t1", 1, 3), Duration::from_secs(3600));
        scheduler.defer(task("t2", 1, 3), Duration::from_secs(7200));
        assert_eq!(scheduler.pending_timers(), 2);

        tokio::time::timeout(Duration::from_secs(1), scheduler.shutdown())
            .await
            .expect("shutdown must not wait for timers to fire");
        assert_eq!(scheduler.pending_timers(), 0);
        assert!(queue.is_empty());

        // 关闭后的 defer 被忽略
        scheduler.defer(task("t3", 1, 3), Duration::from_secs(1));
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_tolerates_closed_queue() {
        let queue = Arc::new(BoundedTaskQueue::new(10));
        let scheduler = RetryScheduler::new(queue.clone(), Duration::from_secs(1));

        scheduler.defer(task("t1", 1, 3), Duration::from_secs(2));
        queue.close();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(scheduler.pending_timers(), 0);
        assert!(queue.dequeue().await.is_none());
    }
}
