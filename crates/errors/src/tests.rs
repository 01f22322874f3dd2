#[cfg(test)]
mod error_tests {
    use crate::*;

    #[test]
    fn test_taskflow_error_display() {
        let storage_error = TaskflowError::Storage("Connection refused".to_string());
        assert_eq!(storage_error.to_string(), "存储操作错误: Connection refused");

        let task_error = TaskflowError::TaskNotFound {
            id: "task-1".to_string(),
        };
        assert_eq!(task_error.to_string(), "任务未找到: task-1");

        let result_error = TaskflowError::ResultNotFound {
            id: "result-1".to_string(),
        };
        assert_eq!(result_error.to_string(), "任务结果未找到: result-1");

        let full_error = TaskflowError::QueueFull { capacity: 1000 };
        assert_eq!(full_error.to_string(), "任务队列已满: 容量 1000");

        assert_eq!(TaskflowError::QueueClosed.to_string(), "任务队列已关闭");

        let timeout_error = TaskflowError::ExecutionTimeout { seconds: 300 };
        assert_eq!(timeout_error.to_string(), "任务执行超时: 300秒");

        let transition_error = TaskflowError::InvalidStateTransition {
            from: "completed".to_string(),
            to: "processing".to_string(),
        };
        assert_eq!(
            transition_error.to_string(),
            "非法的状态转换: completed -> processing"
        );

        let payload_error = TaskflowError::InvalidPayload("expected object".to_string());
        assert_eq!(payload_error.to_string(), "无效的任务载荷: expected object");
    }

    #[test]
    fn test_taskflow_error_creation_methods() {
        let error = TaskflowError::storage_error("disk full");
        assert!(matches!(error, TaskflowError::Storage(_)));

        let error = TaskflowError::task_not_found("abc");
        assert!(matches!(error, TaskflowError::TaskNotFound { ref id } if id == "abc"));

        let error = TaskflowError::result_not_found(String::from("r-1"));
        assert!(matches!(error, TaskflowError::ResultNotFound { ref id } if id == "r-1"));

        let error = TaskflowError::validation_error("title must not be empty");
        assert!(matches!(error, TaskflowError::Validation(_)));

        let error = TaskflowError::invalid_payload("bad json");
        assert!(matches!(error, TaskflowError::InvalidPayload(_)));

        let error = TaskflowError::execution_error("boom");
        assert!(matches!(error, TaskflowError::TaskExecution(_)));

        let error = TaskflowError::config_error("missing section");
        assert!(matches!(error, TaskflowError::Configuration(_)));
    }

    #[test]
    fn test_is_retryable() {
        assert!(TaskflowError::InvalidPayload("x".to_string()).is_retryable());
        assert!(TaskflowError::TaskExecution("x".to_string()).is_retryable());
        assert!(TaskflowError::ExecutionTimeout { seconds: 1 }.is_retryable());

        assert!(!TaskflowError::Validation("x".to_string()).is_retryable());
        assert!(!TaskflowError::Storage("x".to_string()).is_retryable());
        assert!(!TaskflowError::QueueFull { capacity: 1 }.is_retryable());
        assert!(!TaskflowError::QueueClosed.is_retryable());
        assert!(!TaskflowError::task_not_found("x").is_retryable());
    }

    #[test]
    fn test_is_persistence() {
        assert!(TaskflowError::Storage("x".to_string()).is_persistence());
        assert!(TaskflowError::Serialization("x".to_string()).is_persistence());
        assert!(TaskflowError::Database(sqlx::Error::PoolClosed).is_persistence());

        assert!(!TaskflowError::Validation("x".to_string()).is_persistence());
        assert!(!TaskflowError::TaskExecution("x".to_string()).is_persistence());
    }

    #[test]
    fn test_invalid_transition() {
        let error = TaskflowError::invalid_transition("completed", "pending");
        assert_eq!(error.to_string(), "非法的状态转换: completed -> pending");
        assert!(!error.is_retryable());
        assert!(!error.is_persistence());
    }

    #[test]
    fn test_from_conversions() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: TaskflowError = json_err.into();
        assert!(matches!(error, TaskflowError::Serialization(_)));

        let error: TaskflowError = anyhow::anyhow!("wrapped").into();
        assert!(matches!(error, TaskflowError::Internal(ref msg) if msg == "wrapped"));

        let error: TaskflowError = sqlx::Error::RowNotFound.into();
        assert!(matches!(error, TaskflowError::Database(_)));
    }
}
