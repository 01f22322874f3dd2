use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// 执行引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// 提交时未指定 max_retries 的任务使用该值
    pub default_max_retries: i32,
    /// 退避时间单位，第k次重试等待 2^k 个单位
    pub backoff_unit_ms: u64,
    /// 单次执行的超时上限
    pub execution_timeout_seconds: u64,
    pub shutdown_grace_seconds: u64,
    /// 启动时把存储中未完成的任务重新入队
    pub reconcile_on_startup: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            queue_capacity: 1000,
            default_max_retries: 3,
            backoff_unit_ms: 1000,
            execution_timeout_seconds: 300,
            shutdown_grace_seconds: 30,
            reconcile_on_startup: false,
        }
    }
}

impl EngineConfig {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl ConfigValidator for EngineConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_count(self.worker_count, "engine.worker_count", 1000)?;
        ValidationUtils::validate_count(self.queue_capacity, "engine.queue_capacity", 1_000_000)?;

        if self.default_max_retries < 0 {
            return Err(crate::ConfigError::Validation(
                "engine.default_max_retries must not be negative".to_string(),
            ));
        }
        if self.backoff_unit_ms == 0 {
            return Err(crate::ConfigError::Validation(
                "engine.backoff_unit_ms must be greater than 0".to_string(),
            ));
        }

        ValidationUtils::validate_timeout(
            self.execution_timeout_seconds,
            "engine.execution_timeout_seconds",
            600,
        )?;
        ValidationUtils::validate_timeout(
            self.shutdown_grace_seconds,
            "engine.shutdown_grace_seconds",
            3600,
        )?;

        Ok(())
    }
}
