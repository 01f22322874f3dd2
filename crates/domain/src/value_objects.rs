//! 部分更新的值类型
//!
//! 用显式的可选字段结构代替任意字段映射，区分"设为某值"、"置空"和"不修改"三种语义。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use taskflow_errors::{TaskflowError, TaskflowResult};

use crate::entities::{validate_execution_timeout, Task, TaskResult};

/// 单个字段的更新操作
///
/// - `Set(T)`: 设为指定值
/// - `Unset`: 置空（仅对可空字段有意义）
/// - `NoChange`: 保持原值，等价于请求中未出现该字段
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(untagged)]
pub enum UpdateValue<T> {
    Set(T),
    Unset,
    #[default]
    NoChange,
}

impl<T> UpdateValue<T> {
    pub fn set(value: T) -> Self {
        UpdateValue::Set(value)
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, UpdateValue::NoChange)
    }

    pub fn is_no_change(&self) -> bool {
        matches!(self, UpdateValue::NoChange)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            UpdateValue::Set(value) => Some(value),
            _ => None,
        }
    }

    /// 应用到可空字段
    pub fn apply_to(self, existing: Option<T>) -> Option<T> {
        match self {
            UpdateValue::Set(value) => Some(value),
            UpdateValue::Unset => None,
            UpdateValue::NoChange => existing,
        }
    }

    /// 应用到必填字段，`Unset` 视为非法
    pub fn apply_required(self, existing: &mut T, field_name: &str) -> TaskflowResult<()> {
        match self {
            UpdateValue::Set(value) => {
                *existing = value;
                Ok(())
            }
            UpdateValue::Unset => Err(TaskflowError::validation_error(format!(
                "{field_name} cannot be unset"
            ))),
            UpdateValue::NoChange => Ok(()),
        }
    }
}

// JSON 中的 null 映射为 Unset；字段缺失时由 #[serde(default)] 给出 NoChange
impl<'de, T: Deserialize<'de>> Deserialize<'de> for UpdateValue<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => UpdateValue::Set(value),
            None => UpdateValue::Unset,
        })
    }
}

/// 任务的部分更新
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "UpdateValue::is_no_change")]
    pub title: UpdateValue<String>,
    #[serde(skip_serializing_if = "UpdateValue::is_no_change")]
    pub user_id: UpdateValue<String>,
    #[serde(skip_serializing_if = "UpdateValue::is_no_change")]
    pub priority: UpdateValue<i32>,
    #[serde(skip_serializing_if = "UpdateValue::is_no_change")]
    pub can_user_change_status: UpdateValue<bool>,
    #[serde(skip_serializing_if = "UpdateValue::is_no_change")]
    pub payload: UpdateValue<String>,
    #[serde(skip_serializing_if = "UpdateValue::is_no_change")]
    pub max_retries: UpdateValue<i32>,
    #[serde(skip_serializing_if = "UpdateValue::is_no_change")]
    pub scheduled_at: UpdateValue<DateTime<Utc>>,
    #[serde(skip_serializing_if = "UpdateValue::is_no_change")]
    pub execution_timeout_seconds: UpdateValue<u32>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        !(self.title.is_change()
            || self.user_id.is_change()
            || self.priority.is_change()
            || self.can_user_change_status.is_change()
            || self.payload.is_change()
            || self.max_retries.is_change()
            || self.scheduled_at.is_change()
            || self.execution_timeout_seconds.is_change())
    }

    /// 把更新应用到任务上，先校验再修改，失败时任务保持原样
    pub fn apply(self, task: &mut Task, now: DateTime<Utc>) -> TaskflowResult<()> {
        if let Some(title) = self.title.value() {
            if title.trim().is_empty() {
                return Err(TaskflowError::validation_error("title must not be empty"));
            }
        }
        if let Some(&max_retries) = self.max_retries.value() {
            if max_retries < task.retries {
                return Err(TaskflowError::validation_error(format!(
                    "max_retries {max_retries} is below the {} retries already consumed",
                    task.retries
                )));
            }
        }
        if let Some(&seconds) = self.execution_timeout_seconds.value() {
            validate_execution_timeout(seconds)?;
        }

        let mut updated = task.clone();
        self.title.apply_required(&mut updated.title, "title")?;
        self.user_id.apply_required(&mut updated.user_id, "user_id")?;
        self.priority.apply_required(&mut updated.priority, "priority")?;
        self.can_user_change_status
            .apply_required(&mut updated.can_user_change_status, "can_user_change_status")?;
        self.payload.apply_required(&mut updated.payload, "payload")?;
        self.max_retries
            .apply_required(&mut updated.max_retries, "max_retries")?;
        updated.scheduled_at = self.scheduled_at.apply_to(updated.scheduled_at);
        updated.execution_timeout_seconds = self
            .execution_timeout_seconds
            .apply_to(updated.execution_timeout_seconds);
        updated.updated_at = now;

        *task = updated;
        Ok(())
    }
}

/// 任务结果的部分更新，仅允许修正产物地址
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskResultUpdate {
    #[serde(skip_serializing_if = "UpdateValue::is_no_change")]
    pub file_url: UpdateValue<String>,
    #[serde(skip_serializing_if = "UpdateValue::is_no_change")]
    pub git_url: UpdateValue<String>,
}

impl TaskResultUpdate {
    pub fn apply(self, result: &mut TaskResult) {
        result.file_url = self.file_url.apply_to(Some(result.file_url.clone())).unwrap_or_default();
        result.git_url = self.git_url.apply_to(Some(result.git_url.clone())).unwrap_or_default();
    }
}
