use async_trait::async_trait;
use taskflow_errors::TaskflowResult;

use crate::entities::{ExecutionContext, ExecutionOutput};

/// 任务的业务逻辑
///
/// 引擎把它当作不透明的能力调用，多个worker会用各自的载荷并发调用同一个实例。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, context: &ExecutionContext) -> TaskflowResult<ExecutionOutput>;

    fn name(&self) -> &str {
        "executor"
    }
}
