use async_trait::async_trait;
use taskflow_errors::TaskflowResult;

use crate::entities::Task;

/// 任务队列抽象
///
/// 入队永不阻塞：队列满或已关闭时立即返回错误。出队会挂起直到有任务或队列关闭，
/// 每个任务只会交给一个出队方。换成持久化或带优先级的实现不需要改动状态机。
#[async_trait]
pub trait TaskQueue: Send + Sync {
    fn try_enqueue(&self, task: Task) -> TaskflowResult<()>;

    /// 队列关闭后返回 `None`
    async fn dequeue(&self) -> Option<Task>;

    /// 关闭队列，唤醒所有等待中的出队方
    fn close(&self);

    fn is_closed(&self) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;
}
