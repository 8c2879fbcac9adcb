//! 多渠道通知发送器
//!
//! 通过 `NotificationSender` trait 抽象发送行为，每种渠道一个实现，
//! 由配置的渠道映射选择。邮件传输本身以 `Mailer` trait 注入，
//! 单个收件人的投递失败只记录日志，不会中断整批发送。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use notify_shared::config::NotifyConfig;
use notify_shared::directory::{Member, MemberDirectory};
use notify_shared::error::NotifyError;

use crate::model::{Channel, NotificationDefinition, NotifyContext};
use crate::recipients::RecipientResolver;
use crate::template::{self, TemplateEngine};

// ---------------------------------------------------------------------------
// Mailer — 邮件传输
// ---------------------------------------------------------------------------

/// 待投递的邮件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// 邮件传输抽象，由宿主应用注入具体实现
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, mail: OutboundEmail) -> Result<(), NotifyError>;
}

/// 仅记录日志的邮件传输
///
/// 无外部依赖时验证分发管道的完整性，接入真实 SMTP 时替换为同一 trait 的实现。
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, mail: OutboundEmail) -> Result<(), NotifyError> {
        info!(
            from = %mail.from,
            to = %mail.to,
            subject = %mail.subject,
            "模拟投递邮件通知"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NotificationSender trait 与注册表
// ---------------------------------------------------------------------------

/// 通知发送器 trait，每种渠道实现具体的投递逻辑
///
/// 发送器是无状态的共享实例，当前渠道（携带模板名）由参数传入。
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// 扇出发送：解析通知的收件人集合并逐个投递
    async fn send_notification(
        &self,
        channel: &Channel,
        definition: &NotificationDefinition,
        context: &dyn NotifyContext,
        extra: &Value,
    ) -> Result<(), NotifyError>;

    /// 向单个收件人投递
    async fn send_to_user(
        &self,
        channel: &Channel,
        definition: &NotificationDefinition,
        context: &dyn NotifyContext,
        user: &Member,
        extra: &Value,
    ) -> Result<(), NotifyError>;

    /// 该发送器服务的渠道标识
    fn channel_kind(&self) -> &str;
}

/// 发送器注册表
///
/// 配置的渠道映射把渠道标识解析为发送器标识，再由注册表取得实例。
#[derive(Default)]
pub struct SenderRegistry {
    senders: HashMap<String, Arc<dyn NotificationSender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: &str, sender: Arc<dyn NotificationSender>) {
        self.senders.insert(id.to_string(), sender);
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<dyn NotificationSender>> {
        self.senders.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.senders.contains_key(id)
    }
}

// ---------------------------------------------------------------------------
// 邮件发送器
// ---------------------------------------------------------------------------

/// 邮件渠道发送器
///
/// 标题与正文都是模板：针对上下文、收件人与附加数据渲染。
/// 渠道模板在渲染引擎中存在时，渲染后的正文作为 Body 变量再包一层。
pub struct EmailNotificationSender {
    config: Arc<NotifyConfig>,
    engine: Arc<TemplateEngine>,
    resolver: Arc<RecipientResolver>,
    directory: MemberDirectory,
    mailer: Arc<dyn Mailer>,
}

impl EmailNotificationSender {
    pub fn new(
        config: Arc<NotifyConfig>,
        engine: Arc<TemplateEngine>,
        resolver: Arc<RecipientResolver>,
        directory: MemberDirectory,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            engine,
            resolver,
            directory,
            mailer,
        }
    }

    /// 渲染正文：按配置选择 HTML/纯文本源，纯文本先做换行转 <br />
    fn render_message(
        &self,
        definition: &NotificationDefinition,
        context: &dyn NotifyContext,
        user: &Member,
        extra: &Value,
    ) -> String {
        let source = definition.notification_content(&self.config);
        let source = if self.config.html_notifications {
            source.to_string()
        } else {
            template::nl2br(source)
        };
        self.engine.format(&source, context, Some(user), extra)
    }
}

#[async_trait]
impl NotificationSender for EmailNotificationSender {
    async fn send_notification(
        &self,
        channel: &Channel,
        definition: &NotificationDefinition,
        context: &dyn NotifyContext,
        extra: &Value,
    ) -> Result<(), NotifyError> {
        for user in self.resolver.resolve(definition) {
            if let Err(e) = self
                .send_to_user(channel, definition, context, &user, extra)
                .await
            {
                // 单个收件人失败不影响其余收件人
                warn!(
                    identifier = %definition.identifier,
                    user_id = %user.id,
                    error = %e,
                    "收件人投递失败，继续处理剩余收件人"
                );
            }
        }
        Ok(())
    }

    async fn send_to_user(
        &self,
        channel: &Channel,
        definition: &NotificationDefinition,
        context: &dyn NotifyContext,
        user: &Member,
        extra: &Value,
    ) -> Result<(), NotifyError> {
        let subject = self
            .engine
            .format(&definition.title, context, Some(user), extra);
        let message = self.render_message(definition, context, user, extra);

        // 渠道模板存在时把正文作为 Body 变量包装一层，否则直接使用正文
        let body = match channel.template.as_deref() {
            Some(name) if self.engine.has_template(name) => {
                let mut data = template::build_template_data(context, Some(user), extra);
                data["Body"] = Value::String(message.clone());
                self.engine.render_named(name, &data).unwrap_or(message)
            }
            _ => message,
        };

        // 直接邮箱优先，其次目录的备用地址；都没有则跳过该收件人
        let Some(to) = self.directory.address_of(user) else {
            warn!(
                identifier = %definition.identifier,
                user_id = %user.id,
                "收件人没有可用的投递地址，跳过"
            );
            return Ok(());
        };

        info!(
            channel = %channel.kind,
            to = %to,
            subject = %subject,
            "发送邮件通知"
        );

        let mail = OutboundEmail {
            from: self.config.send_notifications_from.clone(),
            to,
            subject,
            body,
        };

        // 传输失败被吞掉：该收件人的这次投递静默丢失，没有重试
        if let Err(e) = self.mailer.deliver(mail).await {
            warn!(
                identifier = %definition.identifier,
                user_id = %user.id,
                error = %e,
                "邮件投递失败"
            );
        }

        Ok(())
    }

    fn channel_kind(&self) -> &str {
        "EMAIL"
    }
}
