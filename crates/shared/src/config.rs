//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。
//! 渠道到发送器的映射、队列开关等分发策略均来源于此，
//! 服务在构造时接收配置实例，不依赖全局状态。

use std::collections::HashMap;
use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// 渠道配置
///
/// 将渠道标识绑定到发送器实现，以及该渠道的默认渲染模板。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// 发送器注册表中的发送器标识
    pub sender: String,
    /// 渠道默认模板名，新建通知时写入该渠道的模板字段
    pub default_template: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            sender: "EMAIL".to_string(),
            default_template: Some("email_default".to_string()),
        }
    }
}

/// 通知系统配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// 渠道标识 -> 渠道配置。未出现在此映射中的渠道不可发送
    pub channels: HashMap<String, ChannelConfig>,
    /// 是否允许将大批量发送转入后台任务队列
    pub use_queues: bool,
    /// 通知正文使用 HTML 还是纯文本
    pub html_notifications: bool,
    /// 允许的通知标识列表，为空时不做限制
    pub identifiers: Vec<String>,
    /// 全局可用的模板关键字 -> 描述，供所有通知作者参考
    pub global_keywords: HashMap<String, String>,
    /// 邮件通知的发件地址
    pub send_notifications_from: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        let mut channels = HashMap::new();
        channels.insert("EMAIL".to_string(), ChannelConfig::default());
        Self {
            channels,
            use_queues: true,
            html_notifications: false,
            identifiers: Vec::new(),
            global_keywords: HashMap::new(),
            send_notifications_from: "noreply@localhost".to_string(),
        }
    }
}

impl NotifyConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（NOTIFY_ 前缀，如 NOTIFY_USE_QUEUES -> use_queues）
    ///
    /// 所有配置文件均为可选，缺失时回退到内置默认值。
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("NOTIFY_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{env}.toml"))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{service_name}.toml")))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("NOTIFY")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 获取某个渠道的配置，未配置的渠道返回 None
    pub fn channel(&self, kind: &str) -> Option<&ChannelConfig> {
        self.channels.get(kind)
    }

    /// 渠道是否出现在配置中
    pub fn has_channel(&self, kind: &str) -> bool {
        self.channels.contains_key(kind)
    }

    /// 标识是否在允许列表内；列表为空时一律允许
    pub fn identifier_allowed(&self, identifier: &str) -> bool {
        self.identifiers.is_empty() || self.identifiers.iter().any(|i| i == identifier)
    }
}
