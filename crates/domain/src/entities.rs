use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskflow_errors::{TaskflowError, TaskflowResult};

/// 单次执行时限的上限（秒）
pub const MAX_EXECUTION_TIMEOUT_SECONDS: u32 = 600;

/// 任务：一次异步执行的工作单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub creator_id: String,
    pub user_id: String,
    pub title: String,
    /// 仅作记录，调度顺序不参考该字段
    pub priority: i32,
    pub status: TaskStatus,
    pub can_user_change_status: bool,
    /// 原始JSON文本，只有执行逻辑才解析
    pub payload: String,
    pub retries: i32,
    pub max_retries: i32,
    /// 最早执行时间
    pub scheduled_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// 单次执行时限，为空时使用引擎配置；实际时限取两者较小值
    pub execution_timeout_seconds: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// 终态不可离开；pending 与 processing 之间可以往返（重试循环）
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Pending)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(TaskflowError::Serialization(format!(
                "Invalid task status: {s}"
            ))),
        }
    }
}

/// 提交请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub creator_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub can_user_change_status: bool,
    #[serde(default)]
    pub payload: Option<String>,
    /// 为空时使用引擎默认值
    #[serde(default)]
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_timeout_seconds: Option<u32>,
}

impl NewTask {
    pub fn new<S: Into<String>>(title: S) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> TaskflowResult<()> {
        if self.title.trim().is_empty() {
            return Err(TaskflowError::validation_error("title must not be empty"));
        }
        if let Some(max_retries) = self.max_retries {
            if max_retries < 0 {
                return Err(TaskflowError::validation_error(
                    "max_retries must not be negative",
                ));
            }
        }
        if let Some(seconds) = self.execution_timeout_seconds {
            validate_execution_timeout(seconds)?;
        }
        Ok(())
    }
}

pub(crate) fn validate_execution_timeout(seconds: u32) -> TaskflowResult<()> {
    if seconds == 0 || seconds > MAX_EXECUTION_TIMEOUT_SECONDS {
        return Err(TaskflowError::validation_error(format!(
            "execution_timeout_seconds must be between 1 and {MAX_EXECUTION_TIMEOUT_SECONDS}"
        )));
    }
    Ok(())
}

impl Task {
    /// 由提交请求生成待持久化的任务，状态为 pending
    pub fn from_submission(
        request: NewTask,
        id: String,
        now: DateTime<Utc>,
        default_max_retries: i32,
    ) -> Self {
        Self {
            id,
            creator_id: request.creator_id,
            user_id: request.user_id,
            title: request.title,
            priority: request.priority,
            status: TaskStatus::Pending,
            can_user_change_status: request.can_user_change_status,
            payload: request.payload.unwrap_or_else(|| "{}".to_string()),
            retries: 0,
            max_retries: request.max_retries.unwrap_or(default_max_retries),
            scheduled_at: request.scheduled_at,
            next_retry_at: None,
            execution_timeout_seconds: request.execution_timeout_seconds,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 是否已到最早执行时间
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.map_or(true, |not_before| not_before <= now)
    }

    /// 重试等待中的任务与新提交的任务同为 pending，靠重试计数区分
    pub fn is_awaiting_retry(&self) -> bool {
        self.status == TaskStatus::Pending && self.retries > 0 && self.next_retry_at.is_some()
    }

    pub fn has_retries_left(&self) -> bool {
        self.retries < self.max_retries
    }

    /// 本任务的执行时限，不超过引擎的全局时限
    pub fn effective_timeout(&self, engine_timeout: Duration) -> Duration {
        self.execution_timeout_seconds
            .map(|seconds| Duration::from_secs(u64::from(seconds)).min(engine_timeout))
            .unwrap_or(engine_timeout)
    }

    pub fn transition(&mut self, next: TaskStatus, now: DateTime<Utc>) -> TaskflowResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(TaskflowError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn entity_description(&self) -> String {
        format!("任务 '{}' (ID: {}, 状态: {})", self.title, self.id, self.status)
    }
}

/// 任务执行成功后产生的结果记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub task_id: String,
    pub file_url: String,
    pub git_url: String,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn from_output(
        id: String,
        task_id: String,
        output: ExecutionOutput,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id,
            file_url: output.file_url.unwrap_or_default(),
            git_url: output.git_url.unwrap_or_default(),
            completed_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub creator_id: Option<String>,
    pub user_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        task.deleted_at.is_none()
            && self.creator_id.as_ref().map_or(true, |c| *c == task.creator_id)
            && self.user_id.as_ref().map_or(true, |u| *u == task.user_id)
            && self.status.map_or(true, |s| s == task.status)
    }
}

/// 执行器收到的上下文
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task_id: String,
    /// 从1开始的执行次数
    pub attempt: i32,
    pub payload: serde_json::Value,
    /// 本次执行的时限，超过后执行会被中止
    pub timeout: Duration,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub file_url: Option<String>,
    pub git_url: Option<String>,
}
