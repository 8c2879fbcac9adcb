//! 后台投递任务
//!
//! 收件人数量超过阈值时，分发服务不在调用方线程里逐个发送，
//! 而是把定义、上下文快照与附加数据打包成任务交给队列。
//! 队列运行时是外部协作者，这里只定义任务载荷与入队抽象。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use notify_shared::error::NotifyError;

use crate::model::{ContextSnapshot, NotificationDefinition, NotifyContext};

/// 附加数据中携带指定渠道的保留键
pub const SEND_CHANNEL_KEY: &str = "SEND_CHANNEL";

/// 后台投递任务载荷
///
/// 任务自带完整的通知定义与上下文快照，worker 侧不需要回查存储
/// 即可重建发送所需的全部信息。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationJob {
    pub job_id: String,
    pub definition: NotificationDefinition,
    pub context: ContextSnapshot,
    pub extra: Value,
}

impl SendNotificationJob {
    pub fn new(
        definition: NotificationDefinition,
        context: &dyn NotifyContext,
        extra: Value,
    ) -> Self {
        Self {
            job_id: Uuid::now_v7().to_string(),
            definition,
            context: ContextSnapshot::capture(context),
            extra,
        }
    }

    /// 任务中指定的发送渠道（来自附加数据的保留键）
    pub fn requested_channel(&self) -> Option<&str> {
        self.extra.get(SEND_CHANNEL_KEY).and_then(|v| v.as_str())
    }
}

/// 任务队列抽象
///
/// 入队即返回，投递在 worker 侧异步发生，任务间的执行顺序不做保证。
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: SendNotificationJob) -> Result<(), NotifyError>;
}
