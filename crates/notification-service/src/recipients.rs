//! 收件人解析
//!
//! 通知的收件人集合是派生视图，每次分发时重新计算，不做持久化。
//! 三个来源按序累积：直接成员、用户组成员、角色挂接的用户组成员，
//! 按成员 id 去重；全员发送时直接取成员目录的全量人口。

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use notify_shared::directory::{Member, MemberDirectory};

use crate::model::NotificationDefinition;

/// 收件人策略扩展点
///
/// 基础集合计算完成后按注册顺序依次调用，可增删收件人。
/// 解析器对策略的行为不做任何约束。
pub trait RecipientPolicy: Send + Sync {
    fn adjust(&self, definition: &NotificationDefinition, recipients: &mut Vec<Member>);
}

/// 收件人解析器
pub struct RecipientResolver {
    directory: MemberDirectory,
    policies: RwLock<Vec<Arc<dyn RecipientPolicy>>>,
}

impl RecipientResolver {
    pub fn new(directory: MemberDirectory) -> Self {
        Self {
            directory,
            policies: RwLock::new(Vec::new()),
        }
    }

    /// 注册收件人策略
    pub fn register_policy(&self, policy: Arc<dyn RecipientPolicy>) {
        self.policies.write().push(policy);
    }

    /// 解析通知的收件人集合
    ///
    /// 空集合是正常结果而非错误——调用方据此跳过发送。
    pub fn resolve(&self, definition: &NotificationDefinition) -> Vec<Member> {
        let mut recipients = if definition.send_to_everyone {
            self.directory.all_members()
        } else {
            self.resolve_assigned(definition)
        };

        for policy in self.policies.read().iter() {
            policy.adjust(definition, &mut recipients);
        }

        recipients
    }

    /// 累积三个来源的成员 id，保持首次出现的顺序去重后查目录
    fn resolve_assigned(&self, definition: &NotificationDefinition) -> Vec<Member> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();

        let mut push = |id: &str| {
            if seen.insert(id.to_string()) {
                ids.push(id.to_string());
            }
        };

        for id in &definition.member_ids {
            push(id);
        }

        for group_id in &definition.group_ids {
            for member in self.directory.members_of_group(group_id) {
                push(&member.id);
            }
        }

        for role_id in &definition.role_ids {
            for group in self.directory.groups_of_role(role_id) {
                for member in self.directory.members_of_group(&group.id) {
                    push(&member.id);
                }
            }
        }

        // 目录中不存在的 id 在最终查找时被丢弃
        ids.iter()
            .filter_map(|id| self.directory.member(id))
            .collect()
    }
}
