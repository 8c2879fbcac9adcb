//! 测试工具模块
//!
//! 提供测试所需的固定上下文、记录型邮件传输与收集型队列实现。
//! 供本 crate 的单元测试与 worker crate 的集成测试复用。

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use notify_shared::directory::{Member, MemberDirectory};
use notify_shared::error::NotifyError;

use crate::job::{JobQueue, SendNotificationJob};
use crate::model::{Keyword, NotifyContext};
use crate::sender::{Mailer, OutboundEmail};

// ==================== 固定上下文 ====================

/// 携带固定类型与数据的测试上下文
pub struct StaticContext {
    kind: String,
    data: Value,
    keywords: Vec<Keyword>,
}

impl StaticContext {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            keywords: Vec::new(),
        }
    }

    pub fn with_keywords(mut self, keywords: Vec<Keyword>) -> Self {
        self.keywords = keywords;
        self
    }
}

impl NotifyContext for StaticContext {
    fn context_type(&self) -> &str {
        &self.kind
    }

    fn template_data(&self) -> Value {
        self.data.clone()
    }

    fn available_keywords(&self) -> Vec<Keyword> {
        self.keywords.clone()
    }
}

// ==================== 记录型邮件传输 ====================

/// 把投递的邮件记录在内存里的传输实现
///
/// 可按收件地址模拟失败，验证单个收件人失败不影响整批发送。
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutboundEmail>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定向该地址的投递一律失败
    pub fn set_failing(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    /// 成功投递的邮件
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn deliver(&self, mail: OutboundEmail) -> Result<(), NotifyError> {
        if self.failing.lock().unwrap().contains(&mail.to) {
            return Err(NotifyError::Transport {
                channel: "EMAIL".to_string(),
                reason: format!("模拟失败: {}", mail.to),
            });
        }
        self.sent.lock().unwrap().push(mail);
        Ok(())
    }
}

// ==================== 收集型队列 ====================

/// 只收集任务不执行的队列实现，用于断言入队行为
#[derive(Default)]
pub struct CollectingQueue {
    jobs: Mutex<Vec<SendNotificationJob>>,
}

impl CollectingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<SendNotificationJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobQueue for CollectingQueue {
    async fn enqueue(&self, job: SendNotificationJob) -> Result<(), NotifyError> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

// ==================== 目录构造辅助 ====================

/// 生成带 n 个成员（m1..mn，均有邮箱）的目录
pub fn seeded_directory(count: usize) -> (MemberDirectory, Vec<Member>) {
    let directory = MemberDirectory::new();
    let mut members = Vec::with_capacity(count);
    for i in 1..=count {
        let member = Member::new(
            format!("m{i}"),
            format!("成员{i}"),
            Some(format!("m{i}@example.com")),
        );
        directory.add_member(member.clone());
        members.push(member);
    }
    (directory, members)
}
