//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use chrono::{DateTime, Utc};
use taskflow_domain::entities::{NewTask, Task, TaskStatus};

/// Builder for creating test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            task: Task {
                id: "test-task".to_string(),
                creator_id: "creator".to_string(),
                user_id: "user".to_string(),
                title: "test task".to_string(),
                priority: 0,
                status: TaskStatus::Pending,
                can_user_change_status: false,
                payload: "{}".to_string(),
                retries: 0,
                max_retries: 3,
                scheduled_at: None,
                next_retry_at: None,
                execution_timeout_seconds: None,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.task.id = id.to_string();
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.task.title = title.to_string();
        self
    }

    pub fn with_creator(mut self, creator_id: &str) -> Self {
        self.task.creator_id = creator_id.to_string();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.task.payload = payload.to_string();
        self
    }

    pub fn with_raw_payload(mut self, payload: &str) -> Self {
        self.task.payload = payload.to_string();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_retries(mut self, retries: i32) -> Self {
        self.task.retries = retries;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.task.max_retries = max_retries;
        self
    }

    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.task.scheduled_at = Some(scheduled_at);
        self
    }

    pub fn with_execution_timeout(mut self, seconds: u32) -> Self {
        self.task.execution_timeout_seconds = Some(seconds);
        self
    }

    pub fn with_next_retry_at(mut self, next_retry_at: DateTime<Utc>) -> Self {
        self.task.next_retry_at = Some(next_retry_at);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.task.created_at = created_at;
        self.task.updated_at = created_at;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for submission requests
pub struct NewTaskBuilder {
    request: NewTask,
}

impl NewTaskBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            request: NewTask::new(title),
        }
    }

    pub fn with_creator(mut self, creator_id: &str) -> Self {
        self.request.creator_id = creator_id.to_string();
        self
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.request.user_id = user_id.to_string();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.request.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.request.payload = Some(payload.to_string());
        self
    }

    pub fn with_raw_payload(mut self, payload: &str) -> Self {
        self.request.payload = Some(payload.to_string());
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.request.max_retries = Some(max_retries);
        self
    }

    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.request.scheduled_at = Some(scheduled_at);
        self
    }

    pub fn with_execution_timeout(mut self, seconds: u32) -> Self {
        self.request.execution_timeout_seconds = Some(seconds);
        self
    }

    pub fn build(self) -> NewTask {
        self.request
    }
}
