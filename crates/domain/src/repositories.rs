//! 领域仓储抽象
//!
//! 任务存储由宿主系统提供，引擎只依赖这里的创建/读取/更新契约。
//! 每次状态转换对应一次独立的更新调用，原子性由存储自身保证。
//! 写入都带有期望的当前状态，状态不符时返回 `InvalidStateTransition` 且不做任何修改，
//! 并发的写入者因此不会把终态任务改回非终态。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskflow_errors::TaskflowResult;

use crate::entities::{Task, TaskFilter, TaskResult, TaskStatus};

/// 任务仓储抽象
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 持久化新任务，返回任务ID
    async fn create_task(&self, task: &Task) -> TaskflowResult<String>;
    async fn get_task(&self, id: &str) -> TaskflowResult<Task>;
    /// 整条记录更新，包括状态、重试次数和下次重试时间
    ///
    /// 仅当存储中的当前状态为 `expected` 时写入。
    async fn update_task(&self, task: &Task, expected: TaskStatus) -> TaskflowResult<()>;
    /// 只更新状态的条件转换 `from -> to`
    async fn update_task_status(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
        updated_at: DateTime<Utc>,
    ) -> TaskflowResult<()>;
    /// 软删除
    async fn delete_task(&self, id: &str) -> TaskflowResult<()>;
    async fn list_tasks(&self, filter: &TaskFilter) -> TaskflowResult<Vec<Task>>;
    /// 所有 pending / processing 的任务，供启动时的对账扫描使用
    async fn list_unfinished_tasks(&self) -> TaskflowResult<Vec<Task>>;
}

/// 任务结果仓储抽象
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn create_result(&self, result: &TaskResult) -> TaskflowResult<()>;
    async fn get_result(&self, id: &str) -> TaskflowResult<TaskResult>;
    async fn update_result(&self, result: &TaskResult) -> TaskflowResult<()>;
    async fn delete_result(&self, id: &str) -> TaskflowResult<()>;
    async fn list_results_by_task(&self, task_id: &str) -> TaskflowResult<Vec<TaskResult>>;
}
