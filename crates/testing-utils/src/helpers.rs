//! Test helper utilities and common testing patterns

use std::time::Duration;
use taskflow_domain::entities::TaskStatus;
use taskflow_domain::repositories::TaskStore;
use tokio::time::{sleep, Instant};

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    ///
    /// 使用 tokio 的时间源，在 `start_paused` 的测试里同样可用。
    pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        Self::wait_for_with_interval(condition, timeout, Duration::from_millis(10)).await
    }

    /// Wait for a condition with a custom poll interval
    pub async fn wait_for_with_interval<F, Fut>(
        mut condition: F,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(poll_interval).await;
        }

        condition().await
    }
}

/// 等待任务在存储中到达指定状态
pub async fn wait_for_status(
    store: &dyn TaskStore,
    task_id: &str,
    status: TaskStatus,
    timeout: Duration,
) -> bool {
    TestEnv::wait_for(
        move || async move {
            matches!(store.get_task(task_id).await, Ok(task) if task.status == status)
        },
        timeout,
    )
    .await
}
