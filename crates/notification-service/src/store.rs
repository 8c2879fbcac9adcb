//! 通知存储
//!
//! 通知定义与投递轨迹的持久化接口，当前由共享库的内存存储承载。
//! 渠道随定义一起存取（独占持有），删除定义即删除其渠道；
//! 同一标识允许存在多条定义，按标识查询返回全部匹配。

use notify_shared::config::NotifyConfig;
use notify_shared::error::NotifyError;
use notify_shared::store::MemoryStore;

use crate::model::{DeliveryTrace, NotificationDefinition};

/// 通知对象存储
///
/// 克隆实例共享同一份数据，可同时交给分发服务和后台 worker。
#[derive(Clone, Default)]
pub struct NotificationStore {
    definitions: MemoryStore<NotificationDefinition>,
    traces: MemoryStore<DeliveryTrace>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存通知定义
    ///
    /// 保存前校验；首次保存且未挂接任何渠道时按配置补齐默认渠道。
    pub fn save_definition(
        &self,
        mut definition: NotificationDefinition,
        config: &NotifyConfig,
    ) -> Result<NotificationDefinition, NotifyError> {
        definition.ensure_valid(config)?;
        definition.populate_default_channels(config);
        let id = definition.id.clone();
        self.definitions.insert(&id, definition.clone());
        Ok(definition)
    }

    pub fn definition(&self, id: &str) -> Option<NotificationDefinition> {
        self.definitions.get(id)
    }

    pub fn contains_definition(&self, id: &str) -> bool {
        self.definitions.contains(id)
    }

    /// 删除定义，其渠道随之消失（渠道由定义独占持有）
    pub fn remove_definition(&self, id: &str) -> Option<NotificationDefinition> {
        self.definitions.remove(id)
    }

    /// 按标识查询全部定义，按 id 排序保证顺序稳定
    pub fn find_by_identifier(&self, identifier: &str) -> Vec<NotificationDefinition> {
        let mut found = self
            .definitions
            .list_by(|d| d.identifier == identifier);
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    // ==================== 投递轨迹 ====================

    pub fn insert_trace(&self, trace: DeliveryTrace) {
        let id = trace.id.clone();
        self.traces.insert(&id, trace);
    }

    pub fn traces_for_recipient(&self, recipient_id: &str) -> Vec<DeliveryTrace> {
        self.traces.list_by(|t| t.recipient_id == recipient_id)
    }

    pub fn traces_for_notification(&self, notification_id: &str) -> Vec<DeliveryTrace> {
        self.traces.list_by(|t| t.notification_id == notification_id)
    }

    pub fn trace_count(&self) -> usize {
        self.traces.count()
    }

    /// 标记轨迹已读
    pub fn mark_read(&self, trace_id: &str) -> Result<(), NotifyError> {
        self.set_read(trace_id, true)
    }

    /// 标记轨迹未读
    pub fn mark_unread(&self, trace_id: &str) -> Result<(), NotifyError> {
        self.set_read(trace_id, false)
    }

    fn set_read(&self, trace_id: &str, read: bool) -> Result<(), NotifyError> {
        if self.traces.update(trace_id, |t| t.read = read) {
            Ok(())
        } else {
            Err(NotifyError::Store {
                entity: "DeliveryTrace".to_string(),
                id: trace_id.to_string(),
            })
        }
    }
}
