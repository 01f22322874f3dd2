use std::time::Duration;

use async_trait::async_trait;
use taskflow_domain::entities::{ExecutionContext, ExecutionOutput};
use taskflow_domain::TaskExecutor;
use taskflow_errors::{TaskflowError, TaskflowResult};
use tracing::debug;

/// 演示用执行器
///
/// 载荷字段：`duration_ms` 模拟耗时（默认1000），`fail` 为 true 时返回失败，
/// 可选的 `file_url` / `git_url` 原样写入结果。
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    default_duration: Duration,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self {
            default_duration: Duration::from_millis(1000),
        }
    }

    pub fn with_default_duration(default_duration: Duration) -> Self {
        Self { default_duration }
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(&self, context: &ExecutionContext) -> TaskflowResult<ExecutionOutput> {
        let payload = context
            .payload
            .as_object()
            .ok_or_else(|| TaskflowError::invalid_payload("payload must be a JSON object"))?;

        let duration = payload
            .get("duration_ms")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or(self.default_duration);

        debug!(
            task_id = %context.task_id,
            attempt = context.attempt,
            duration_ms = duration.as_millis() as u64,
            deadline = %context.deadline,
            "Simulating task execution"
        );
        tokio::time::sleep(duration).await;

        if payload.get("fail").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Err(TaskflowError::execution_error(format!(
                "simulated failure on attempt {}",
                context.attempt
            )));
        }

        let locator = |key: &str| payload.get(key).and_then(|v| v.as_str()).map(str::to_string);
        Ok(ExecutionOutput {
            file_url: locator("file_url"),
            git_url: locator("git_url"),
        })
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(payload: serde_json::Value) -> ExecutionContext {
        ExecutionContext {
            task_id: "t1".to_string(),
            attempt: 1,
            payload,
            timeout: Duration::from_secs(30),
            deadline: chrono::Utc::now() + chrono::Duration::seconds(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_success() {
        let executor = SimulatedExecutor::new();
        let start = tokio::time::Instant::now();

        let output = executor
            .execute(&context(json!({"file_url": "s3://bucket/a"})))
            .await
            .unwrap();

        assert_eq!(output.file_url.as_deref(), Some("s3://bucket/a"));
        assert!(output.git_url.is_none());
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_failure() {
        let executor = SimulatedExecutor::new();
        let result = executor
            .execute(&context(json!({"fail": true, "duration_ms": 5})))
            .await;
        assert!(matches!(result, Err(TaskflowError::TaskExecution(_))));
    }

    #[tokio::test]
    async fn test_non_object_payload_is_invalid() {
        let executor = SimulatedExecutor::new();
        let result = executor.execute(&context(json!([1, 2, 3]))).await;
        assert!(matches!(result, Err(TaskflowError::InvalidPayload(_))));
    }
}
