//! 通知分发服务
//!
//! 分发策略的编排入口：校验通知与上下文的配对、解析收件人、
//! 按收件人数量决定同步发送还是转入后台队列、逐渠道调用发送器，
//! 最后按需记录投递轨迹。
//!
//! 配置在构造时注入，服务本身不持有全局状态；
//! 未提供队列运行时时自动关闭队列分流。

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use notify_shared::config::NotifyConfig;
use notify_shared::directory::{Member, MemberDirectory};
use notify_shared::error::NotifyError;

use crate::job::{JobQueue, SendNotificationJob, SEND_CHANNEL_KEY};
use crate::model::{DeliveryTrace, NotificationDefinition, NotifyContext};
use crate::recipients::{RecipientPolicy, RecipientResolver};
use crate::sender::{EmailNotificationSender, Mailer, NotificationSender, SenderRegistry};
use crate::store::NotificationStore;
use crate::template::TemplateEngine;

/// 收件人数量超过该值且队列可用时，发送转入后台任务
pub const QUEUE_THRESHOLD: usize = 5;

/// notify 的目标：通知定义实例，或按标识查询已保存的定义
pub enum NotifyTarget {
    Definition(NotificationDefinition),
    Identifier(String),
}

impl From<NotificationDefinition> for NotifyTarget {
    fn from(definition: NotificationDefinition) -> Self {
        Self::Definition(definition)
    }
}

impl From<&str> for NotifyTarget {
    fn from(identifier: &str) -> Self {
        Self::Identifier(identifier.to_string())
    }
}

impl From<String> for NotifyTarget {
    fn from(identifier: String) -> Self {
        Self::Identifier(identifier)
    }
}

/// 通知分发服务
pub struct NotificationService {
    config: Arc<NotifyConfig>,
    store: NotificationStore,
    directory: MemberDirectory,
    resolver: Arc<RecipientResolver>,
    registry: SenderRegistry,
    queue: Option<Arc<dyn JobQueue>>,
    /// 配置开启且队列运行时可用才为 true
    use_queues: bool,
}

impl NotificationService {
    /// 构造分发服务
    ///
    /// 默认注册邮件发送器（发送器标识 EMAIL）。
    /// queue 传 None 表示宿主没有队列运行时，队列分流自动关闭。
    pub fn new(
        config: NotifyConfig,
        store: NotificationStore,
        directory: MemberDirectory,
        engine: TemplateEngine,
        mailer: Arc<dyn Mailer>,
        queue: Option<Arc<dyn JobQueue>>,
    ) -> Self {
        let use_queues = config.use_queues && queue.is_some();
        let config = Arc::new(config);
        let engine = Arc::new(engine);
        let resolver = Arc::new(RecipientResolver::new(directory.clone()));

        let mut registry = SenderRegistry::new();
        registry.register(
            "EMAIL",
            Arc::new(EmailNotificationSender::new(
                config.clone(),
                engine,
                resolver.clone(),
                directory.clone(),
                mailer,
            )),
        );

        Self {
            config,
            store,
            directory,
            resolver,
            registry,
            queue,
            use_queues,
        }
    }

    /// 注册额外渠道的发送器
    pub fn register_sender(&mut self, id: &str, sender: Arc<dyn NotificationSender>) {
        self.registry.register(id, sender);
    }

    /// 注册收件人策略扩展
    pub fn register_recipient_policy(&self, policy: Arc<dyn RecipientPolicy>) {
        self.resolver.register_policy(policy);
    }

    /// 队列分流当前是否生效
    pub fn queueing_enabled(&self) -> bool {
        self.use_queues
    }

    /// 触发一次通知事件
    ///
    /// 按标识触发时查询全部同标识的定义参与分发；查询为空报
    /// NotificationNotFound。类型约束不匹配的定义记录后跳过，
    /// 其余定义照常处理；循环结束后如有不匹配，向调用方返回
    /// 首个 ContextMismatch。
    pub async fn notify(
        &self,
        target: impl Into<NotifyTarget>,
        context: &dyn NotifyContext,
        extra: Value,
        channel: Option<&str>,
    ) -> Result<(), NotifyError> {
        let (identifier, definitions) = match target.into() {
            NotifyTarget::Definition(definition) => {
                (definition.identifier.clone(), vec![definition])
            }
            NotifyTarget::Identifier(identifier) => {
                let found = self.store.find_by_identifier(&identifier);
                (identifier, found)
            }
        };

        if definitions.is_empty() {
            return Err(NotifyError::NotificationNotFound { identifier });
        }

        let mut mismatch = None;
        for definition in &definitions {
            if let Some(expected) = &definition.notify_on_type {
                if expected != context.context_type() {
                    warn!(
                        identifier = %definition.identifier,
                        expected = %expected,
                        actual = %context.context_type(),
                        "上下文类型不匹配，跳过该定义"
                    );
                    if mismatch.is_none() {
                        mismatch = Some(NotifyError::ContextMismatch {
                            identifier: definition.identifier.clone(),
                            expected: expected.clone(),
                            actual: context.context_type().to_string(),
                        });
                    }
                    continue;
                }
            }
            self.send_notification(definition, context, extra.clone(), channel)
                .await?;
        }

        match mismatch {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// 发送一条通知
    ///
    /// 收件人为空直接返回；数量超过阈值且队列可用时打包入队，
    /// 指定渠道以保留键嵌入附加数据随任务传递；否则同步逐个发送。
    pub async fn send_notification(
        &self,
        definition: &NotificationDefinition,
        context: &dyn NotifyContext,
        mut extra: Value,
        channel: Option<&str>,
    ) -> Result<(), NotifyError> {
        let recipients = self.resolver.resolve(definition);
        if recipients.is_empty() {
            debug!(identifier = %definition.identifier, "没有收件人，跳过发送");
            return Ok(());
        }

        if !extra.is_object() {
            extra = Value::Object(Default::default());
        }
        if let Some(kind) = channel {
            extra[SEND_CHANNEL_KEY] = Value::String(kind.to_string());
        }

        if self.use_queues && recipients.len() > QUEUE_THRESHOLD {
            if let Some(queue) = &self.queue {
                let job = SendNotificationJob::new(definition.clone(), context, extra);
                queue.enqueue(job).await?;
                info!(
                    identifier = %definition.identifier,
                    recipients = recipients.len(),
                    "收件人数量超过阈值，通知已转入后台队列"
                );
                return Ok(());
            }
        }

        for user in &recipients {
            self.send_to_user(definition, context, user, &extra).await?;
        }
        Ok(())
    }

    /// 向单个收件人发送
    ///
    /// 遍历定义挂接的渠道，跳过不可发送的；附加数据指定了渠道时
    /// 只保留该渠道。每个渠道的发送失败只记录日志。
    /// 全部渠道处理完后记录投递轨迹。
    pub async fn send_to_user(
        &self,
        definition: &NotificationDefinition,
        context: &dyn NotifyContext,
        user: &Member,
        extra: &Value,
    ) -> Result<(), NotifyError> {
        let requested = extra.get(SEND_CHANNEL_KEY).and_then(|v| v.as_str());

        for channel in &definition.channels {
            if !channel.can_send(&self.config, &self.registry) {
                continue;
            }
            if let Some(kind) = requested {
                if channel.kind != kind {
                    continue;
                }
            }

            match channel.sender(&self.config, &self.registry) {
                Ok(sender) => {
                    if let Err(e) = sender
                        .send_to_user(channel, definition, context, user, extra)
                        .await
                    {
                        warn!(
                            identifier = %definition.identifier,
                            channel = %channel.kind,
                            user_id = %user.id,
                            error = %e,
                            "渠道发送失败"
                        );
                    }
                }
                Err(e) => {
                    warn!(channel = %channel.kind, error = %e, "发送器解析失败");
                }
            }
        }

        self.trace_notification(definition, user);
        Ok(())
    }

    /// 执行后台投递任务：重建上下文后走同步逐个发送路径
    pub async fn deliver(&self, job: &SendNotificationJob) -> Result<(), NotifyError> {
        let recipients = self.resolver.resolve(&job.definition);
        info!(
            job_id = %job.job_id,
            identifier = %job.definition.identifier,
            recipients = recipients.len(),
            "执行后台投递任务"
        );
        for user in &recipients {
            self.send_to_user(&job.definition, &job.context, user, &job.extra)
                .await?;
        }
        Ok(())
    }

    /// 记录投递轨迹
    ///
    /// 仅当定义开启轨迹时生效；轨迹要求定义已落库，未落库的先保存。
    /// 只为目录中真实存在的成员记录，临时收件人静默跳过。
    pub fn trace_notification(&self, definition: &NotificationDefinition, user: &Member) {
        if !definition.trace {
            return;
        }

        if !self.store.contains_definition(&definition.id) {
            if let Err(e) = self
                .store
                .save_definition(definition.clone(), &self.config)
            {
                warn!(
                    identifier = %definition.identifier,
                    error = %e,
                    "通知落库失败，跳过轨迹记录"
                );
                return;
            }
        }

        if self.directory.member_exists(&user.id) {
            self.store
                .insert_trace(DeliveryTrace::new(&definition.id, &user.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, RecipientRef};
    use crate::recipients::RecipientPolicy;
    use crate::test_utils::{seeded_directory, CollectingQueue, RecordingMailer, StaticContext};
    use notify_shared::config::ChannelConfig;
    use serde_json::json;
    use std::sync::Mutex;

    /// 测试环境：服务 + 可断言的传输、队列与存储
    struct Harness {
        service: NotificationService,
        mailer: Arc<RecordingMailer>,
        queue: Arc<CollectingQueue>,
        store: NotificationStore,
    }

    fn harness_with(config: NotifyConfig, member_count: usize) -> Harness {
        let (directory, _) = seeded_directory(member_count);
        let store = NotificationStore::new();
        let mailer = Arc::new(RecordingMailer::new());
        let queue = Arc::new(CollectingQueue::new());
        let service = NotificationService::new(
            config,
            store.clone(),
            directory,
            TemplateEngine::new(),
            mailer.clone(),
            Some(queue.clone()),
        );
        Harness {
            service,
            mailer,
            queue,
            store,
        }
    }

    fn harness(member_count: usize) -> Harness {
        harness_with(NotifyConfig::default(), member_count)
    }

    /// 创建并保存一条直接指定 count 个成员收件人的定义
    fn saved_definition(h: &Harness, identifier: &str, count: usize) -> NotificationDefinition {
        let mut definition = NotificationDefinition::new(identifier);
        definition.title = "标题".to_string();
        definition.text_body = "正文".to_string();
        for i in 1..=count {
            definition.add_recipient(RecipientRef::Member(format!("m{i}")));
        }
        h.store
            .save_definition(definition, &NotifyConfig::default())
            .unwrap()
    }

    fn order_context() -> StaticContext {
        StaticContext::new("Order", json!({"order_no": "SO-1001"}))
    }

    // 场景 A：3 个收件人，队列开启但未超阈值 -> 同步发送，无轨迹
    #[tokio::test]
    async fn test_small_batch_sends_synchronously() {
        let h = harness(3);
        saved_definition(&h, "welcome", 3);

        h.service
            .notify("welcome", &order_context(), json!({}), None)
            .await
            .unwrap();

        assert_eq!(h.mailer.sent_count(), 3);
        assert!(h.queue.is_empty());
        assert_eq!(h.store.trace_count(), 0);
    }

    // 场景 B：10 个收件人 -> 恰好一个任务入队，零同步发送
    #[tokio::test]
    async fn test_large_batch_enqueues_single_job() {
        let h = harness(10);
        saved_definition(&h, "welcome", 10);

        h.service
            .notify("welcome", &order_context(), json!({}), None)
            .await
            .unwrap();

        assert_eq!(h.mailer.sent_count(), 0);
        assert_eq!(h.queue.len(), 1);
        assert_eq!(h.queue.jobs()[0].definition.identifier, "welcome");
    }

    // 阈值边界：恰好 5 个收件人仍走同步
    #[tokio::test]
    async fn test_threshold_boundary_is_exclusive() {
        let h = harness(5);
        saved_definition(&h, "welcome", 5);

        h.service
            .notify("welcome", &order_context(), json!({}), None)
            .await
            .unwrap();

        assert_eq!(h.mailer.sent_count(), 5);
        assert!(h.queue.is_empty());
    }

    // 配置关闭队列时大批量也同步发送
    #[tokio::test]
    async fn test_queueing_disabled_by_config() {
        let config = NotifyConfig {
            use_queues: false,
            ..Default::default()
        };
        let h = harness_with(config, 10);
        saved_definition(&h, "welcome", 10);

        h.service
            .notify("welcome", &order_context(), json!({}), None)
            .await
            .unwrap();

        assert_eq!(h.mailer.sent_count(), 10);
        assert!(h.queue.is_empty());
    }

    // 未提供队列运行时时自动关闭队列分流
    #[tokio::test]
    async fn test_queueing_auto_disabled_without_runtime() {
        let (directory, _) = seeded_directory(10);
        let store = NotificationStore::new();
        let mailer = Arc::new(RecordingMailer::new());
        let service = NotificationService::new(
            NotifyConfig::default(),
            store.clone(),
            directory,
            TemplateEngine::new(),
            mailer.clone(),
            None,
        );
        assert!(!service.queueing_enabled());

        let mut definition = NotificationDefinition::new("welcome");
        definition.title = "标题".to_string();
        definition.text_body = "正文".to_string();
        for i in 1..=10 {
            definition.add_recipient(RecipientRef::Member(format!("m{i}")));
        }
        let definition = store
            .save_definition(definition, &NotifyConfig::default())
            .unwrap();

        service
            .notify(definition, &order_context(), json!({}), None)
            .await
            .unwrap();
        assert_eq!(mailer.sent_count(), 10);
    }

    // 场景 C：类型约束不匹配 -> ContextMismatch
    #[tokio::test]
    async fn test_context_mismatch_raised() {
        let h = harness(3);
        let mut definition = NotificationDefinition::new("order-shipped");
        definition.notify_on_type = Some("Order".to_string());
        definition.add_recipient(RecipientRef::Member("m1".to_string()));
        h.store
            .save_definition(definition, &NotifyConfig::default())
            .unwrap();

        let invoice = StaticContext::new("Invoice", json!({}));
        let result = h
            .service
            .notify("order-shipped", &invoice, json!({}), None)
            .await;

        assert!(matches!(
            result,
            Err(NotifyError::ContextMismatch { expected, actual, .. })
                if expected == "Order" && actual == "Invoice"
        ));
        assert_eq!(h.mailer.sent_count(), 0);
    }

    // 场景 D：标识查询为空 -> NotificationNotFound
    #[tokio::test]
    async fn test_unknown_identifier() {
        let h = harness(1);
        let result = h
            .service
            .notify("nonexistent", &order_context(), json!({}), None)
            .await;

        assert!(matches!(
            result,
            Err(NotifyError::NotificationNotFound { identifier }) if identifier == "nonexistent"
        ));
    }

    // 同标识多条定义：不匹配的跳过，其余照常发送，调用方仍看到不匹配
    #[tokio::test]
    async fn test_mismatch_skips_but_continues_batch() {
        let h = harness(2);

        let mut constrained = NotificationDefinition::new("mixed");
        constrained.notify_on_type = Some("Invoice".to_string());
        constrained.add_recipient(RecipientRef::Member("m1".to_string()));
        h.store
            .save_definition(constrained, &NotifyConfig::default())
            .unwrap();

        let mut open = NotificationDefinition::new("mixed");
        open.title = "标题".to_string();
        open.text_body = "正文".to_string();
        open.add_recipient(RecipientRef::Member("m2".to_string()));
        h.store
            .save_definition(open, &NotifyConfig::default())
            .unwrap();

        let result = h
            .service
            .notify("mixed", &order_context(), json!({}), None)
            .await;

        // 不匹配的定义上报错误，但不阻止另一条定义的发送
        assert!(matches!(result, Err(NotifyError::ContextMismatch { .. })));
        assert_eq!(h.mailer.sent_count(), 1);
        assert_eq!(h.mailer.sent()[0].to, "m2@example.com");
    }

    // 空收件人集合：不报错也不入队
    #[tokio::test]
    async fn test_empty_recipients_is_noop() {
        let h = harness(3);
        saved_definition(&h, "welcome", 0);

        h.service
            .notify("welcome", &order_context(), json!({}), None)
            .await
            .unwrap();

        assert_eq!(h.mailer.sent_count(), 0);
        assert!(h.queue.is_empty());
    }

    /// 记录被调用渠道的测试发送器
    struct CountingSender {
        kind: String,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl NotificationSender for CountingSender {
        async fn send_notification(
            &self,
            _channel: &Channel,
            _definition: &NotificationDefinition,
            _context: &dyn NotifyContext,
            _extra: &Value,
        ) -> Result<(), NotifyError> {
            Ok(())
        }

        async fn send_to_user(
            &self,
            channel: &Channel,
            _definition: &NotificationDefinition,
            _context: &dyn NotifyContext,
            _user: &Member,
            _extra: &Value,
        ) -> Result<(), NotifyError> {
            self.calls.lock().unwrap().push(channel.kind.clone());
            Ok(())
        }

        fn channel_kind(&self) -> &str {
            &self.kind
        }
    }

    // 指定渠道时只有该渠道发送；未指定时所有可发送渠道都触发
    #[tokio::test]
    async fn test_requested_channel_restricts_dispatch() {
        let mut config = NotifyConfig::default();
        config.channels.insert(
            "SMS".to_string(),
            ChannelConfig {
                sender: "SMS".to_string(),
                default_template: None,
            },
        );
        let mut h = harness_with(config, 1);

        let calls = Arc::new(Mutex::new(Vec::new()));
        h.service.register_sender(
            "SMS",
            Arc::new(CountingSender {
                kind: "SMS".to_string(),
                calls: calls.clone(),
            }),
        );

        let mut definition = NotificationDefinition::new("welcome");
        definition.title = "标题".to_string();
        definition.text_body = "正文".to_string();
        definition.add_recipient(RecipientRef::Member("m1".to_string()));
        // save_definition 按配置补齐 EMAIL 与 SMS 两个渠道
        let definition = h
            .store
            .save_definition(definition, &{
                let mut c = NotifyConfig::default();
                c.channels.insert(
                    "SMS".to_string(),
                    ChannelConfig {
                        sender: "SMS".to_string(),
                        default_template: None,
                    },
                );
                c
            })
            .unwrap();
        assert_eq!(definition.channels.len(), 2);

        // 未指定渠道：两个渠道都发送
        h.service
            .notify("welcome", &order_context(), json!({}), None)
            .await
            .unwrap();
        assert_eq!(h.mailer.sent_count(), 1);
        assert_eq!(calls.lock().unwrap().len(), 1);

        // 指定 SMS：邮件渠道不再发送
        h.service
            .notify("welcome", &order_context(), json!({}), Some("SMS"))
            .await
            .unwrap();
        assert_eq!(h.mailer.sent_count(), 1);
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    // 不可发送的渠道被静默跳过
    #[tokio::test]
    async fn test_unsendable_channel_skipped() {
        let h = harness(1);

        let mut definition = NotificationDefinition::new("welcome");
        definition.title = "标题".to_string();
        definition.text_body = "正文".to_string();
        definition.add_recipient(RecipientRef::Member("m1".to_string()));
        definition.channels.push(Channel::new("EMAIL", None));
        // SMS 未配置发送器，can_send 为 false
        definition.channels.push(Channel::new("SMS", None));
        let definition = h
            .store
            .save_definition(definition, &NotifyConfig::default())
            .unwrap();

        h.service
            .notify(definition, &order_context(), json!({}), None)
            .await
            .unwrap();
        assert_eq!(h.mailer.sent_count(), 1);
    }

    /// 向收件人集合追加一个临时成员的策略
    struct AppendEphemeral;

    impl RecipientPolicy for AppendEphemeral {
        fn adjust(&self, _definition: &NotificationDefinition, recipients: &mut Vec<Member>) {
            recipients.push(Member::new(
                "ephemeral",
                "临时收件人",
                Some("tmp@example.com".into()),
            ));
        }
    }

    // 场景 E：轨迹开启，一真实一临时收件人 -> 恰好 1 条轨迹
    #[tokio::test]
    async fn test_trace_only_for_persisted_recipients() {
        let h = harness(1);
        h.service.register_recipient_policy(Arc::new(AppendEphemeral));

        let mut definition = NotificationDefinition::new("welcome");
        definition.title = "标题".to_string();
        definition.text_body = "正文".to_string();
        definition.trace = true;
        definition.add_recipient(RecipientRef::Member("m1".to_string()));
        let definition = h
            .store
            .save_definition(definition, &NotifyConfig::default())
            .unwrap();
        let definition_id = definition.id.clone();

        h.service
            .notify(definition, &order_context(), json!({}), None)
            .await
            .unwrap();

        // 两个收件人都收到了邮件
        assert_eq!(h.mailer.sent_count(), 2);
        // 但只有真实成员留下轨迹
        let traces = h.store.traces_for_notification(&definition_id);
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].recipient_id, "m1");
        assert!(!traces[0].read);
    }

    // 轨迹关闭时不产生任何记录
    #[tokio::test]
    async fn test_no_trace_when_disabled() {
        let h = harness(2);
        saved_definition(&h, "welcome", 2);

        h.service
            .notify("welcome", &order_context(), json!({}), None)
            .await
            .unwrap();
        assert_eq!(h.store.trace_count(), 0);
    }

    // 轨迹要求定义落库：以未保存的实例触发时先保存定义
    #[tokio::test]
    async fn test_trace_persists_unsaved_definition() {
        let h = harness(1);

        let mut definition = NotificationDefinition::new("adhoc");
        definition.title = "标题".to_string();
        definition.text_body = "正文".to_string();
        definition.trace = true;
        definition.add_recipient(RecipientRef::Member("m1".to_string()));
        definition.populate_default_channels(&NotifyConfig::default());
        let definition_id = definition.id.clone();
        assert!(!h.store.contains_definition(&definition_id));

        h.service
            .notify(definition, &order_context(), json!({}), None)
            .await
            .unwrap();

        assert!(h.store.contains_definition(&definition_id));
        assert_eq!(h.store.traces_for_notification(&definition_id).len(), 1);
    }

    // 后台任务执行：deliver 走同步路径补完发送
    #[tokio::test]
    async fn test_deliver_executes_queued_job() {
        let h = harness(10);
        saved_definition(&h, "welcome", 10);

        h.service
            .notify("welcome", &order_context(), json!({}), None)
            .await
            .unwrap();
        assert_eq!(h.queue.len(), 1);

        let job = h.queue.jobs().remove(0);
        h.service.deliver(&job).await.unwrap();
        assert_eq!(h.mailer.sent_count(), 10);
    }

    // 全员发送覆盖收件人配置
    #[tokio::test]
    async fn test_send_to_everyone() {
        let h = harness(4);
        let mut definition = NotificationDefinition::new("broadcast");
        definition.title = "公告".to_string();
        definition.text_body = "全体注意".to_string();
        definition.set_send_to_everyone(true);
        let definition = h
            .store
            .save_definition(definition, &NotifyConfig::default())
            .unwrap();

        h.service
            .notify(definition, &order_context(), json!({}), None)
            .await
            .unwrap();
        assert_eq!(h.mailer.sent_count(), 4);
    }
}
