use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use taskflow_domain::entities::{Task, TaskFilter, TaskResult, TaskStatus};
use taskflow_domain::repositories::{ResultStore, TaskStore};
use taskflow_errors::{TaskflowError, TaskflowResult};
use tokio::sync::RwLock;
use tracing::debug;

/// 内存任务存储
///
/// 同时实现任务和结果两个仓储，适用于嵌入式部署和测试。进程退出后数据丢失。
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
    results: Arc<RwLock<HashMap<String, TaskResult>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 包含已软删除的记录
    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn result_count(&self) -> usize {
        self.results.read().await.len()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: &Task) -> TaskflowResult<String> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(TaskflowError::storage_error(format!(
                "任务ID重复: {}",
                task.id
            )));
        }
        tasks.insert(task.id.clone(), task.clone());
        debug!("创建任务成功: {}", task.entity_description());
        Ok(task.id.clone())
    }

    async fn get_task(&self, id: &str) -> TaskflowResult<Task> {
        self.tasks
            .read()
            .await
            .get(id)
            .filter(|task| task.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| TaskflowError::task_not_found(id))
    }

    async fn update_task(&self, task: &Task, expected: TaskStatus) -> TaskflowResult<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task.id) {
            Some(existing) if existing.deleted_at.is_none() => {
                if existing.status != expected {
                    return Err(TaskflowError::invalid_transition(
                        existing.status,
                        task.status,
                    ));
                }
                *existing = task.clone();
                Ok(())
            }
            _ => Err(TaskflowError::task_not_found(&task.id)),
        }
    }

    async fn update_task_status(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
        updated_at: DateTime<Utc>,
    ) -> TaskflowResult<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(id) {
            Some(existing) if existing.deleted_at.is_none() => {
                if existing.status != from {
                    return Err(TaskflowError::invalid_transition(existing.status, to));
                }
                existing.status = to;
                existing.updated_at = updated_at;
                Ok(())
            }
            _ => Err(TaskflowError::task_not_found(id)),
        }
    }

    async fn delete_task(&self, id: &str) -> TaskflowResult<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(id) {
            Some(existing) if existing.deleted_at.is_none() => {
                existing.deleted_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(TaskflowError::task_not_found(id)),
        }
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> TaskflowResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter
            .limit
            .map(|limit| limit.max(0) as usize)
            .unwrap_or(usize::MAX);

        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_unfinished_tasks(&self) -> TaskflowResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut unfinished: Vec<Task> = tasks
            .values()
            .filter(|task| task.deleted_at.is_none() && !task.is_terminal())
            .cloned()
            .collect();
        unfinished.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(unfinished)
    }
}

#[async_trait]
impl ResultStore for InMemoryTaskStore {
    async fn create_result(&self, result: &TaskResult) -> TaskflowResult<()> {
        let mut results = self.results.write().await;
        if results.contains_key(&result.id) {
            return Err(TaskflowError::storage_error(format!(
                "结果ID重复: {}",
                result.id
            )));
        }
        results.insert(result.id.clone(), result.clone());
        Ok(())
    }

    async fn get_result(&self, id: &str) -> TaskflowResult<TaskResult> {
        self.results
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| TaskflowError::result_not_found(id))
    }

    async fn update_result(&self, result: &TaskResult) -> TaskflowResult<()> {
        let mut results = self.results.write().await;
        match results.get_mut(&result.id) {
            Some(existing) => {
                existing.file_url = result.file_url.clone();
                existing.git_url = result.git_url.clone();
                Ok(())
            }
            None => Err(TaskflowError::result_not_found(&result.id)),
        }
    }

    async fn delete_result(&self, id: &str) -> TaskflowResult<()> {
        self.results
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| TaskflowError::result_not_found(id))
    }

    async fn list_results_by_task(&self, task_id: &str) -> TaskflowResult<Vec<TaskResult>> {
        let results = self.results.read().await;
        let mut matched: Vec<TaskResult> = results
            .values()
            .filter(|result| result.task_id == task_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.completed_at.cmp(&b.completed_at));
        Ok(matched)
    }
}
