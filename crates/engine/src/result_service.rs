use std::sync::Arc;

use taskflow_domain::entities::{ExecutionOutput, TaskResult};
use taskflow_domain::repositories::ResultStore;
use taskflow_domain::value_objects::TaskResultUpdate;
use taskflow_domain::Clock;
use taskflow_errors::{TaskflowError, TaskflowResult};
use tracing::{info, warn};
use uuid::Uuid;

/// 任务结果的查询与修正
pub struct ResultService {
    results: Arc<dyn ResultStore>,
    clock: Arc<dyn Clock>,
}

impl ResultService {
    pub fn new(results: Arc<dyn ResultStore>, clock: Arc<dyn Clock>) -> Self {
        Self { results, clock }
    }

    pub async fn get_result(&self, id: &str) -> TaskflowResult<TaskResult> {
        self.results.get_result(id).await
    }

    /// 没有任何结果时返回 `ResultNotFound`
    pub async fn list_results_by_task(&self, task_id: &str) -> TaskflowResult<Vec<TaskResult>> {
        let results = self.results.list_results_by_task(task_id).await?;
        if results.is_empty() {
            warn!(task_id = %task_id, "No results found for task");
            return Err(TaskflowError::result_not_found(task_id));
        }
        Ok(results)
    }

    /// 手工补录结果，正常情况下结果由worker在任务成功后写入
    pub async fn create_result(
        &self,
        task_id: &str,
        output: ExecutionOutput,
    ) -> TaskflowResult<TaskResult> {
        if task_id.trim().is_empty() {
            return Err(TaskflowError::validation_error("task_id must not be empty"));
        }

        let result = TaskResult::from_output(
            Uuid::new_v4().to_string(),
            task_id.to_string(),
            output,
            self.clock.now(),
        );
        self.results.create_result(&result).await?;
        info!(task_id = %task_id, result_id = %result.id, "Result created");
        Ok(result)
    }

    /// 只允许修正 file_url / git_url
    pub async fn update_result(
        &self,
        id: &str,
        update: TaskResultUpdate,
    ) -> TaskflowResult<TaskResult> {
        let mut result = self.results.get_result(id).await?;
        update.apply(&mut result);
        self.results.update_result(&result).await?;
        info!(result_id = %id, "Result updated");
        Ok(result)
    }

    pub async fn delete_result(&self, id: &str) -> TaskflowResult<()> {
        self.results.delete_result(id).await?;
        info!(result_id = %id, "Result deleted");
        Ok(())
    }
}
