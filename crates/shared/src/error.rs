//! 统一错误处理模块
//!
//! 定义通知系统所有共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 渠道赋值校验失败不是错误值——按约定仅记录警告并保留原值。

use thiserror::Error;

/// 通知系统错误类型
#[derive(Debug, Error)]
pub enum NotifyError {
    // ==================== 分发错误 ====================
    #[error("通知未找到: identifier={identifier}")]
    NotificationNotFound { identifier: String },

    #[error("上下文类型不匹配: identifier={identifier}, 要求={expected}, 实际={actual}")]
    ContextMismatch {
        identifier: String,
        expected: String,
        actual: String,
    },

    // ==================== 渠道错误 ====================
    #[error("渠道发送器不可用: channel={channel}")]
    SenderUnavailable { channel: String },

    // ==================== 模板错误 ====================
    #[error("模板错误: {0}")]
    Template(String),

    // ==================== 投递错误 ====================
    #[error("投递失败: channel={channel}, 原因={reason}")]
    Transport { channel: String, reason: String },

    #[error("任务入队失败: {0}")]
    Queue(String),

    // ==================== 校验与存储错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("记录未找到: {entity} id={id}")]
    Store { entity: String, id: String },
}
