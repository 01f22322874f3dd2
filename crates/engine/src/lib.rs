//! 进程内异步任务执行引擎
//!
//! 提交的任务先持久化为 pending，再进入有界队列；固定数量的worker从队列取出任务，
//! 执行完整的生命周期，失败时由重试调度器按指数退避重新入队。

pub mod executors;
pub mod result_service;
pub mod retry_scheduler;
pub mod shutdown;
pub mod task_lifecycle;
pub mod task_service;
pub mod worker_pool;

pub use executors::SimulatedExecutor;
pub use result_service::ResultService;
pub use retry_scheduler::{backoff_delay, RetryDecision, RetryScheduler};
pub use shutdown::ShutdownManager;
pub use task_lifecycle::{LifecycleOutcome, TaskLifecycle};
pub use task_service::{TaskService, TaskServiceBuilder};
pub use worker_pool::WorkerPool;
