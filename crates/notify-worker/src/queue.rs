//! 进程内任务队列
//!
//! 基于 tokio 无界通道的 JobQueue 实现。入队方持有发送端，
//! worker 持有接收端；入队即返回，不等待投递完成。

use async_trait::async_trait;
use tokio::sync::mpsc;

use notification_service::job::{JobQueue, SendNotificationJob};
use notify_shared::error::NotifyError;

/// 创建一对队列端点：发送端交给分发服务，接收端交给 worker
pub fn delivery_channel() -> (
    InProcessQueue,
    mpsc::UnboundedReceiver<SendNotificationJob>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InProcessQueue { tx }, rx)
}

/// 进程内队列的入队端
#[derive(Clone)]
pub struct InProcessQueue {
    tx: mpsc::UnboundedSender<SendNotificationJob>,
}

#[async_trait]
impl JobQueue for InProcessQueue {
    async fn enqueue(&self, job: SendNotificationJob) -> Result<(), NotifyError> {
        self.tx
            .send(job)
            .map_err(|_| NotifyError::Queue("worker 接收端已关闭".to_string()))
    }
}
