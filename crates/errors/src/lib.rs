use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskflowError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("存储操作错误: {0}")]
    Storage(String),
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },
    #[error("任务结果未找到: {id}")]
    ResultNotFound { id: String },
    #[error("数据验证失败: {0}")]
    Validation(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("任务队列已满: 容量 {capacity}")]
    QueueFull { capacity: usize },
    #[error("任务队列已关闭")]
    QueueClosed,
    #[error("无效的任务载荷: {0}")]
    InvalidPayload(String),
    #[error("任务执行错误: {0}")]
    TaskExecution(String),
    #[error("任务执行超时: {seconds}秒")]
    ExecutionTimeout { seconds: u64 },
    #[error("非法的状态转换: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type TaskflowResult<T> = Result<T, TaskflowError>;

impl TaskflowError {
    pub fn storage_error<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }
    pub fn result_not_found<S: Into<String>>(id: S) -> Self {
        Self::ResultNotFound { id: id.into() }
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn invalid_payload<S: Into<String>>(msg: S) -> Self {
        Self::InvalidPayload(msg.into())
    }
    pub fn execution_error<S: Into<String>>(msg: S) -> Self {
        Self::TaskExecution(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn invalid_transition<F: ToString, T: ToString>(from: F, to: T) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// 业务逻辑失败，进入重试状态机
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskflowError::InvalidPayload(_)
                | TaskflowError::TaskExecution(_)
                | TaskflowError::ExecutionTimeout { .. }
        )
    }

    /// 持久化失败，同步返回给调用方
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            TaskflowError::Database(_)
                | TaskflowError::Storage(_)
                | TaskflowError::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for TaskflowError {
    fn from(err: serde_json::Error) -> Self {
        TaskflowError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for TaskflowError {
    fn from(err: anyhow::Error) -> Self {
        TaskflowError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests;
