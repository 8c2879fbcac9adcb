//! 模板引擎
//!
//! 基于 handlebars 的字符串模板渲染。通知的标题与正文都是模板，
//! 针对触发上下文、收件人与附加数据渲染。渲染失败时回退到原始模板文本，
//! 保证收件人总能收到内容而不是什么都收不到。

use std::collections::HashMap;

use handlebars::Handlebars;
use serde_json::Value;
use tracing::debug;

use notify_shared::directory::Member;
use notify_shared::error::NotifyError;

use crate::model::NotifyContext;

/// 默认的邮件包装模板，渲染后的正文作为 Body 变量注入
const EMAIL_DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"></head>
<body>
<div class="notification">{{{Body}}}</div>
</body>
</html>
"#;

/// 模板引擎
///
/// 同时承担两种渲染：字符串模板的即时渲染（format），
/// 以及具名模板的注册与渲染（渠道包装模板）。
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
    /// 已注册的具名模板源码，用于存在性检查
    templates: HashMap<String, String>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut engine = Self {
            handlebars: Handlebars::new(),
            templates: HashMap::new(),
        };

        // 内置的邮件默认模板，渠道未指定模板时由配置指向它
        engine
            .register_template("email_default", EMAIL_DEFAULT_TEMPLATE)
            .expect("内置模板注册失败");
        engine
    }

    /// 注册具名模板
    pub fn register_template(&mut self, name: &str, source: &str) -> Result<(), NotifyError> {
        self.handlebars
            .register_template_string(name, source)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        self.templates.insert(name.to_string(), source.to_string());
        Ok(())
    }

    /// 具名模板是否已注册
    pub fn has_template(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// 渲染具名模板
    pub fn render_named(&self, name: &str, data: &Value) -> Result<String, NotifyError> {
        self.handlebars
            .render(name, data)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// 渲染字符串模板
    ///
    /// 数据上下文 = 触发上下文的模板数据，合并附加数据（附加数据优先），
    /// 收件人信息挂在 user 键下。任何渲染错误都回退到原始模板文本。
    pub fn format(
        &self,
        template: &str,
        context: &dyn NotifyContext,
        user: Option<&Member>,
        extra: &Value,
    ) -> String {
        let data = build_template_data(context, user, extra);
        match self.handlebars.render_template(template, &data) {
            Ok(rendered) => rendered,
            Err(e) => {
                debug!(error = %e, "模板渲染失败，回退到原始文本");
                template.to_string()
            }
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// 构造渲染用的数据上下文
pub(crate) fn build_template_data(
    context: &dyn NotifyContext,
    user: Option<&Member>,
    extra: &Value,
) -> Value {
    let mut data = match context.template_data() {
        Value::Object(map) => Value::Object(map),
        // 非对象的上下文数据挂在 context 键下
        other => serde_json::json!({ "context": other }),
    };

    if let (Value::Object(map), Value::Object(extra_map)) = (&mut data, extra) {
        for (key, value) in extra_map {
            map.insert(key.clone(), value.clone());
        }
    }

    if let Some(user) = user {
        data["user"] = serde_json::json!({
            "id": user.id,
            "name": user.name,
            "email": user.email,
        });
    }

    data
}

/// 换行转 <br />，纯文本正文按 HTML 展示前使用
pub fn nl2br(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "<br />\n")
}
