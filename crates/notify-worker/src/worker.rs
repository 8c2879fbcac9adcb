//! 投递 worker
//!
//! 从队列取出投递任务，交给分发服务执行同步逐收件人发送。
//! 单个任务执行失败只记录日志，不影响后续任务的消费。

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use notification_service::job::SendNotificationJob;
use notification_service::service::NotificationService;

/// 通知投递 worker
///
/// 持续消费任务直到收到 shutdown 信号，或队列发送端全部关闭。
pub struct DeliveryWorker {
    rx: mpsc::UnboundedReceiver<SendNotificationJob>,
    service: Arc<NotificationService>,
}

impl DeliveryWorker {
    pub fn new(
        rx: mpsc::UnboundedReceiver<SendNotificationJob>,
        service: Arc<NotificationService>,
    ) -> Self {
        Self { rx, service }
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("通知投递 worker 已启动");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // 信号端关闭等同于要求退出
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                job = self.rx.recv() => {
                    match job {
                        Some(job) => {
                            if let Err(e) = self.service.deliver(&job).await {
                                error!(
                                    job_id = %job.job_id,
                                    identifier = %job.definition.identifier,
                                    error = %e,
                                    "后台投递任务执行失败"
                                );
                            }
                        }
                        // 发送端全部关闭，没有新任务了
                        None => break,
                    }
                }
            }
        }

        info!("通知投递 worker 已停止");
    }
}
