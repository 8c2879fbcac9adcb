//! 成员目录
//!
//! 通知收件人背后的成员、用户组、角色三类实体及其成员关系查询。
//! 目录中不存在的成员视为临时收件人——可以收到通知，但不会留下投递轨迹。

use serde::{Deserialize, Serialize};

use crate::store::MemoryStore;

/// 成员（通知的最终收件人）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub name: String,
    /// 直接邮箱地址；为空时投递前会查询目录的备用地址
    pub email: Option<String>,
}

impl Member {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email,
        }
    }
}

/// 用户组，持有成员 id 列表
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub member_ids: Vec<String>,
}

/// 角色，挂接若干用户组
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    pub name: String,
    pub group_ids: Vec<String>,
}

/// 成员目录
///
/// 克隆实例共享同一份数据，可同时交给分发服务和后台 worker 使用。
#[derive(Debug, Clone, Default)]
pub struct MemberDirectory {
    members: MemoryStore<Member>,
    groups: MemoryStore<Group>,
    roles: MemoryStore<Role>,
    /// 成员 id -> 备用投递地址（地址查询能力）
    fallback_addresses: MemoryStore<String>,
}

impl MemberDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, member: Member) {
        let id = member.id.clone();
        self.members.insert(&id, member);
    }

    pub fn add_group(&self, group: Group) {
        let id = group.id.clone();
        self.groups.insert(&id, group);
    }

    pub fn add_role(&self, role: Role) {
        let id = role.id.clone();
        self.roles.insert(&id, role);
    }

    /// 登记成员的备用投递地址，供无直接邮箱的成员使用
    pub fn register_fallback_address(&self, member_id: &str, address: impl Into<String>) {
        self.fallback_addresses.insert(member_id, address.into());
    }

    pub fn member(&self, id: &str) -> Option<Member> {
        self.members.get(id)
    }

    /// 成员是否真实存在于目录中（投递轨迹只为真实成员记录）
    pub fn member_exists(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// 全体成员，按 id 排序保证遍历顺序稳定
    pub fn all_members(&self) -> Vec<Member> {
        let mut members = self.members.list();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    /// 某个用户组的全部成员，未知的成员 id 被跳过
    pub fn members_of_group(&self, group_id: &str) -> Vec<Member> {
        self.groups
            .get(group_id)
            .map(|group| {
                group
                    .member_ids
                    .iter()
                    .filter_map(|id| self.members.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 某个角色挂接的全部用户组
    pub fn groups_of_role(&self, role_id: &str) -> Vec<Group> {
        self.roles
            .get(role_id)
            .map(|role| {
                role.group_ids
                    .iter()
                    .filter_map(|id| self.groups.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 解析成员的投递地址：直接邮箱优先，其次备用地址
    pub fn address_of(&self, member: &Member) -> Option<String> {
        member
            .email
            .clone()
            .filter(|e| !e.is_empty())
            .or_else(|| self.fallback_addresses.get(&member.id))
    }
}
