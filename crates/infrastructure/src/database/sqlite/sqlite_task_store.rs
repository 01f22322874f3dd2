use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use taskflow_config::DatabaseConfig;
use taskflow_domain::entities::{Task, TaskFilter, TaskResult, TaskStatus};
use taskflow_domain::repositories::{ResultStore, TaskStore};
use taskflow_errors::{TaskflowError, TaskflowResult};
use tracing::{debug, instrument};

const TASK_COLUMNS: &str = "id, creator_id, user_id, title, priority, status, \
    can_user_change_status, payload, retries, max_retries, scheduled_at, next_retry_at, \
    execution_timeout_seconds, created_at, updated_at, deleted_at";

const RESULT_COLUMNS: &str = "id, task_id, file_url, git_url, completed_at";

/// SQLite任务存储，同时实现任务与结果两个仓储
#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 按配置建立连接池并初始化表结构
    ///
    /// 内存数据库只能使用单个常驻连接，否则每个连接各自看到一个空库。
    pub async fn connect(config: &DatabaseConfig) -> TaskflowResult<Self> {
        debug!("Connecting SQLite task store at: {}", config.url);

        let mut connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new().min_connections(1);
        if config.is_in_memory() {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
            pool_options = pool_options.max_connections(config.max_connections);
        }

        let pool = pool_options.connect_with(connect_options).await?;
        Self::run_migrations(&pool).await?;

        debug!("Successfully connected SQLite task store");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// 运行数据库迁移
    async fn run_migrations(pool: &SqlitePool) -> TaskflowResult<()> {
        debug!("Running SQLite database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                creator_id TEXT NOT NULL DEFAULT '',
                user_id TEXT NOT NULL DEFAULT '',
                title TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                can_user_change_status BOOLEAN NOT NULL DEFAULT 0,
                payload TEXT NOT NULL DEFAULT '{}',
                retries INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 0,
                scheduled_at TEXT,
                next_retry_at TEXT,
                execution_timeout_seconds INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_results (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                file_url TEXT NOT NULL DEFAULT '',
                git_url TEXT NOT NULL DEFAULT '',
                completed_at TEXT NOT NULL,
                FOREIGN KEY (task_id) REFERENCES tasks(id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_creator_id ON tasks(creator_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_task_results_task_id ON task_results(task_id)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(pool).await?;
        }

        debug!("Successfully completed SQLite database migrations");
        Ok(())
    }

    fn row_to_task(row: &SqliteRow) -> TaskflowResult<Task> {
        let status: String = row.try_get("status")?;

        Ok(Task {
            id: row.try_get("id")?,
            creator_id: row.try_get("creator_id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            priority: row.try_get("priority")?,
            status: status.parse()?,
            can_user_change_status: row.try_get("can_user_change_status")?,
            payload: row.try_get("payload")?,
            retries: row.try_get("retries")?,
            max_retries: row.try_get("max_retries")?,
            scheduled_at: row.try_get("scheduled_at")?,
            next_retry_at: row.try_get("next_retry_at")?,
            execution_timeout_seconds: row.try_get("execution_timeout_seconds")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }

    /// 条件写入未命中时区分任务不存在和状态不符
    async fn status_conflict(&self, id: &str, target: TaskStatus) -> TaskflowResult<TaskflowError> {
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM tasks WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match current {
            Some(status) => TaskflowError::invalid_transition(status, target),
            None => TaskflowError::task_not_found(id),
        })
    }

    fn row_to_result(row: &SqliteRow) -> TaskflowResult<TaskResult> {
        Ok(TaskResult {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            file_url: row.try_get("file_url")?,
            git_url: row.try_get("git_url")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn create_task(&self, task: &Task) -> TaskflowResult<String> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, creator_id, user_id, title, priority, status,
                can_user_change_status, payload, retries, max_retries, scheduled_at,
                next_retry_at, execution_timeout_seconds, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(&task.id)
        .bind(&task.creator_id)
        .bind(&task.user_id)
        .bind(&task.title)
        .bind(task.priority)
        .bind(task.status.as_str())
        .bind(task.can_user_change_status)
        .bind(&task.payload)
        .bind(task.retries)
        .bind(task.max_retries)
        .bind(task.scheduled_at)
        .bind(task.next_retry_at)
        .bind(task.execution_timeout_seconds)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.deleted_at)
        .execute(&self.pool)
        .await?;

        debug!("创建任务成功: {}", task.entity_description());
        Ok(task.id.clone())
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_task(&self, id: &str) -> TaskflowResult<Task> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_task(&row),
            None => {
                debug!("查询任务不存在: ID {}", id);
                Err(TaskflowError::task_not_found(id))
            }
        }
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, status = %task.status))]
    async fn update_task(&self, task: &Task, expected: TaskStatus) -> TaskflowResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                user_id = $2,
                title = $3,
                priority = $4,
                status = $5,
                can_user_change_status = $6,
                payload = $7,
                retries = $8,
                max_retries = $9,
                scheduled_at = $10,
                next_retry_at = $11,
                execution_timeout_seconds = $12,
                updated_at = $13
            WHERE id = $1 AND deleted_at IS NULL AND status = $14
            "#,
        )
        .bind(&task.id)
        .bind(&task.user_id)
        .bind(&task.title)
        .bind(task.priority)
        .bind(task.status.as_str())
        .bind(task.can_user_change_status)
        .bind(&task.payload)
        .bind(task.retries)
        .bind(task.max_retries)
        .bind(task.scheduled_at)
        .bind(task.next_retry_at)
        .bind(task.execution_timeout_seconds)
        .bind(task.updated_at)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.status_conflict(&task.id, task.status).await?);
        }
        Ok(())
    }

    #[instrument(skip(self, updated_at), fields(task_id = %id, from = %from, to = %to))]
    async fn update_task_status(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
        updated_at: DateTime<Utc>,
    ) -> TaskflowResult<()> {
        let result = sqlx::query(
            "UPDATE tasks SET status = $2, updated_at = $3 \
             WHERE id = $1 AND deleted_at IS NULL AND status = $4",
        )
        .bind(id)
        .bind(to.as_str())
        .bind(updated_at)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.status_conflict(id, to).await?);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn delete_task(&self, id: &str) -> TaskflowResult<()> {
        let result =
            sqlx::query("UPDATE tasks SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(TaskflowError::task_not_found(id));
        }
        debug!("删除任务成功: ID {}", id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_tasks(&self, filter: &TaskFilter) -> TaskflowResult<Vec<Task>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE deleted_at IS NULL"
        ));

        if let Some(creator_id) = &filter.creator_id {
            builder.push(" AND creator_id = ").push_bind(creator_id.clone());
        }
        if let Some(user_id) = &filter.user_id {
            builder.push(" AND user_id = ").push_bind(user_id.clone());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }

        builder.push(" ORDER BY created_at DESC, id ASC");
        // SQLite 中 LIMIT -1 表示不限制
        builder.push(" LIMIT ").push_bind(filter.limit.unwrap_or(-1));
        if let Some(offset) = filter.offset {
            builder.push(" OFFSET ").push_bind(offset);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        let tasks = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<TaskflowResult<Vec<_>>>()?;

        debug!("查询到 {} 个任务", tasks.len());
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn list_unfinished_tasks(&self) -> TaskflowResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE deleted_at IS NULL AND status IN ('pending', 'processing') \
             ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_task).collect()
    }
}

#[async_trait]
impl ResultStore for SqliteTaskStore {
    #[instrument(skip(self, result), fields(result_id = %result.id, task_id = %result.task_id))]
    async fn create_result(&self, result: &TaskResult) -> TaskflowResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_results (id, task_id, file_url, git_url, completed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&result.id)
        .bind(&result.task_id)
        .bind(&result.file_url)
        .bind(&result.git_url)
        .bind(result.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(result_id = %id))]
    async fn get_result(&self, id: &str) -> TaskflowResult<TaskResult> {
        let row = sqlx::query(&format!(
            "SELECT {RESULT_COLUMNS} FROM task_results WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_result(&row),
            None => Err(TaskflowError::result_not_found(id)),
        }
    }

    #[instrument(skip(self, result), fields(result_id = %result.id))]
    async fn update_result(&self, result: &TaskResult) -> TaskflowResult<()> {
        let outcome = sqlx::query("UPDATE task_results SET file_url = $2, git_url = $3 WHERE id = $1")
            .bind(&result.id)
            .bind(&result.file_url)
            .bind(&result.git_url)
            .execute(&self.pool)
            .await?;

        if outcome.rows_affected() == 0 {
            return Err(TaskflowError::result_not_found(&result.id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(result_id = %id))]
    async fn delete_result(&self, id: &str) -> TaskflowResult<()> {
        let outcome = sqlx::query("DELETE FROM task_results WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if outcome.rows_affected() == 0 {
            return Err(TaskflowError::result_not_found(id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn list_results_by_task(&self, task_id: &str) -> TaskflowResult<Vec<TaskResult>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESULT_COLUMNS} FROM task_results WHERE task_id = $1 ORDER BY completed_at ASC"
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_result).collect()
    }
}
