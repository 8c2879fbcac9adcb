//! 通知数据模型
//!
//! 通知定义、渠道、投递轨迹与触发上下文抽象。
//! 渠道由通知定义独占持有（删除定义即删除其渠道）；
//! 收件人（成员/用户组/角色）仅按 id 引用，生命周期独立于通知。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;
use validator::Validate;

use notify_shared::config::NotifyConfig;
use notify_shared::error::NotifyError;

use crate::sender::{NotificationSender, SenderRegistry};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// NotifyContext — 触发上下文
// ---------------------------------------------------------------------------

/// 模板关键字及其说明，供通知作者参考
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyword {
    pub keyword: String,
    pub description: String,
}

impl Keyword {
    pub fn new(keyword: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            description: description.into(),
        }
    }
}

/// 触发通知的上下文对象
///
/// 应用侧的业务对象实现此 trait 即可作为通知上下文：
/// - `context_type` 与通知定义的 notify_on_type 匹配
/// - `template_data` 暴露给标题/正文模板的字段
/// - `available_keywords` 该类型可用的模板关键字说明
pub trait NotifyContext: Send + Sync {
    fn context_type(&self) -> &str;

    fn template_data(&self) -> Value;

    fn available_keywords(&self) -> Vec<Keyword> {
        Vec::new()
    }
}

/// 上下文快照
///
/// 上下文的可序列化形态，后台任务携带它而不是 trait 对象。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub context_type: String,
    pub data: Value,
}

impl ContextSnapshot {
    /// 捕获任意上下文的快照
    pub fn capture(context: &dyn NotifyContext) -> Self {
        Self {
            context_type: context.context_type().to_string(),
            data: context.template_data(),
        }
    }
}

impl NotifyContext for ContextSnapshot {
    fn context_type(&self) -> &str {
        &self.context_type
    }

    fn template_data(&self) -> Value {
        self.data.clone()
    }
}

// ---------------------------------------------------------------------------
// Channel — 投递渠道
// ---------------------------------------------------------------------------

/// 通知的投递渠道
///
/// 渠道标识必须出现在配置的渠道集合中才可发送；
/// 模板为该渠道的包装模板名，缺省取渠道配置的默认模板。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub kind: String,
    pub template: Option<String>,
}

impl Channel {
    pub fn new(kind: impl Into<String>, template: Option<String>) -> Self {
        Self {
            kind: kind.into(),
            template,
        }
    }

    /// 修改渠道标识，仅允许配置中出现的渠道
    ///
    /// 非法值不会报错：记录警告并保留原值。
    pub fn set_kind(&mut self, kind: &str, config: &NotifyConfig) {
        if config.has_channel(kind) {
            self.kind = kind.to_string();
        } else {
            warn!(channel = %kind, "渠道未在配置中定义，保留原值");
        }
    }

    /// 渠道当前是否可发送：配置中存在该渠道且其发送器可解析
    pub fn can_send(&self, config: &NotifyConfig, registry: &SenderRegistry) -> bool {
        config
            .channel(&self.kind)
            .map(|c| registry.contains(&c.sender))
            .unwrap_or(false)
    }

    /// 获取渠道的发送器，调用前应以 can_send 判断
    pub fn sender(
        &self,
        config: &NotifyConfig,
        registry: &SenderRegistry,
    ) -> Result<Arc<dyn NotificationSender>, NotifyError> {
        config
            .channel(&self.kind)
            .and_then(|c| registry.resolve(&c.sender))
            .ok_or_else(|| NotifyError::SenderUnavailable {
                channel: self.kind.clone(),
            })
    }
}

// ---------------------------------------------------------------------------
// NotificationDefinition — 通知定义
// ---------------------------------------------------------------------------

/// 收件人引用，按 id 关联成员目录中的三类实体
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientRef {
    Member(String),
    Group(String),
    Role(String),
}

/// 系统通知定义
///
/// 应用在引导阶段注册通知，管理员后续可修改内容与收件人。
/// 同一 identifier 允许存在多条定义，触发时全部参与分发。
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDefinition {
    pub id: String,
    /// 代码侧引用通知的标识，必须非空
    #[validate(length(min = 1, message = "通知必须有标识"))]
    pub identifier: String,
    pub title: String,
    pub description: String,
    /// 纯文本正文
    pub text_body: String,
    /// HTML 正文
    pub html_body: String,
    /// 类型约束：仅当触发上下文为该类型时才发送
    pub notify_on_type: Option<String>,
    /// 覆盖渠道默认模板的自定义模板名
    pub custom_template: Option<String>,
    /// 是否记录投递轨迹
    pub trace: bool,
    /// 发送给全体成员，忽略收件人配置
    pub send_to_everyone: bool,
    /// 定义独占持有的渠道列表
    pub channels: Vec<Channel>,
    pub member_ids: Vec<String>,
    pub group_ids: Vec<String>,
    pub role_ids: Vec<String>,
}

impl NotificationDefinition {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            identifier: identifier.into(),
            title: String::new(),
            description: String::new(),
            text_body: String::new(),
            html_body: String::new(),
            notify_on_type: None,
            custom_template: None,
            trace: false,
            send_to_everyone: false,
            channels: Vec::new(),
            member_ids: Vec::new(),
            group_ids: Vec::new(),
            role_ids: Vec::new(),
        }
    }

    /// 校验定义是否可保存：标识非空，且在配置的允许列表内
    pub fn ensure_valid(&self, config: &NotifyConfig) -> Result<(), NotifyError> {
        if let Err(errors) = self.validate() {
            return Err(NotifyError::Validation(errors.to_string()));
        }
        if !config.identifier_allowed(&self.identifier) {
            return Err(NotifyError::Validation(format!(
                "通知标识不在允许列表内: {}",
                self.identifier
            )));
        }
        Ok(())
    }

    /// 首次保存时按配置补齐默认渠道
    ///
    /// 每个配置的渠道生成一条渠道记录，模板取渠道的默认模板。
    /// 已有渠道的定义不再补齐。
    pub fn populate_default_channels(&mut self, config: &NotifyConfig) {
        if !self.channels.is_empty() {
            return;
        }
        let mut kinds: Vec<_> = config.channels.keys().collect();
        kinds.sort();
        for kind in kinds {
            let template = config
                .channel(kind)
                .and_then(|c| c.default_template.clone());
            self.channels.push(Channel::new(kind.clone(), template));
        }
    }

    /// 登记收件人，按引用类别落入对应的 id 列表，重复登记被忽略
    pub fn add_recipient(&mut self, recipient: RecipientRef) {
        let (list, id) = match recipient {
            RecipientRef::Member(id) => (&mut self.member_ids, id),
            RecipientRef::Group(id) => (&mut self.group_ids, id),
            RecipientRef::Role(id) => (&mut self.role_ids, id),
        };
        if !list.contains(&id) {
            list.push(id);
        }
    }

    /// 修改某个已挂接渠道的模板
    ///
    /// 渠道未挂接到该通知时记录警告，不产生错误。
    pub fn set_channel_template(&mut self, kind: &str, template: &str) {
        match self.channels.iter_mut().find(|c| c.kind == kind) {
            Some(channel) => channel.template = Some(template.to_string()),
            None => warn!(channel = %kind, "渠道未挂接到该通知"),
        }
    }

    /// 开关投递轨迹，不触发保存
    pub fn set_tracing(&mut self, trace: bool) -> &mut Self {
        self.trace = trace;
        self
    }

    /// 开关全员发送，不触发保存
    pub fn set_send_to_everyone(&mut self, everyone: bool) -> &mut Self {
        self.send_to_everyone = everyone;
        self
    }

    /// 按配置选择通知正文：HTML 模式取 html_body，否则取 text_body
    pub fn notification_content<'a>(&'a self, config: &NotifyConfig) -> &'a str {
        if config.html_notifications {
            &self.html_body
        } else {
            &self.text_body
        }
    }

    /// 该通知可用的模板关键字：全局关键字 + 上下文类型提供的关键字
    pub fn keywords(
        &self,
        config: &NotifyConfig,
        context: Option<&dyn NotifyContext>,
    ) -> Vec<Keyword> {
        let mut keywords: Vec<Keyword> = config
            .global_keywords
            .iter()
            .map(|(k, v)| Keyword::new(k.clone(), v.clone()))
            .collect();
        keywords.sort_by(|a, b| a.keyword.cmp(&b.keyword));

        if let Some(context) = context {
            keywords.extend(context.available_keywords());
        }
        keywords
    }
}

// ---------------------------------------------------------------------------
// DeliveryTrace — 投递轨迹
// ---------------------------------------------------------------------------

/// 投递轨迹
///
/// 记录某条通知发给了某个收件人。只为目录中真实存在的成员记录，
/// 临时收件人静默跳过。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryTrace {
    pub id: String,
    pub notification_id: String,
    pub recipient_id: String,
    /// 收件人已读标记
    pub read: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl DeliveryTrace {
    pub fn new(notification_id: &str, recipient_id: &str) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            notification_id: notification_id.to_string(),
            recipient_id: recipient_id.to_string(),
            read: false,
            created_at: chrono::Utc::now(),
        }
    }
}
