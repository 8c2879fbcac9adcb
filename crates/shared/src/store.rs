//! 内存对象存储
//!
//! 使用 DashMap 实现的通用键值存储，承载通知定义、投递轨迹等
//! 需要按 id 查找和按条件过滤的对象。克隆实例共享同一份底层数据，
//! 便于在服务与后台 worker 之间传递。

use std::sync::Arc;

use dashmap::DashMap;

/// 通用内存存储
///
/// 值以克隆形式读出，调用方不会持有内部锁。
#[derive(Debug)]
pub struct MemoryStore<T> {
    data: Arc<DashMap<String, T>>,
}

impl<T: Clone> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    /// 插入或覆盖一条记录
    pub fn insert(&self, id: &str, value: T) {
        self.data.insert(id.to_string(), value);
    }

    /// 按 id 读取记录的克隆
    pub fn get(&self, id: &str) -> Option<T> {
        self.data.get(id).map(|v| v.clone())
    }

    /// 删除记录，返回被删除的值
    pub fn remove(&self, id: &str) -> Option<T> {
        self.data.remove(id).map(|(_, v)| v)
    }

    /// 原地修改一条记录，记录不存在时返回 false
    pub fn update<F>(&self, id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        match self.data.get_mut(id) {
            Some(mut entry) => {
                mutate(entry.value_mut());
                true
            }
            None => false,
        }
    }

    /// 列出所有记录
    pub fn list(&self) -> Vec<T> {
        self.data.iter().map(|entry| entry.value().clone()).collect()
    }

    /// 按条件筛选记录
    pub fn list_by<F>(&self, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.data
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.data.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }
}

impl<T: Clone> Clone for MemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Record {
        id: String,
        flag: bool,
    }

    fn record(id: &str, flag: bool) -> Record {
        Record {
            id: id.to_string(),
            flag,
        }
    }

    #[test]
    fn test_store_crud() {
        let store: MemoryStore<Record> = MemoryStore::new();

        store.insert("a", record("a", false));
        assert!(store.contains("a"));
        assert_eq!(store.get("a").unwrap().id, "a");

        store.insert("a", record("a", true));
        assert!(store.get("a").unwrap().flag);

        let removed = store.remove("a").unwrap();
        assert!(removed.flag);
        assert!(store.get("a").is_none());
    }

    #[test]
    fn test_store_update_in_place() {
        let store: MemoryStore<Record> = MemoryStore::new();
        store.insert("a", record("a", false));

        assert!(store.update("a", |r| r.flag = true));
        assert!(store.get("a").unwrap().flag);

        // 不存在的 id 返回 false 且不产生记录
        assert!(!store.update("missing", |r| r.flag = true));
        assert!(!store.contains("missing"));
    }

    #[test]
    fn test_store_list_by() {
        let store: MemoryStore<Record> = MemoryStore::new();
        store.insert("a", record("a", true));
        store.insert("b", record("b", false));
        store.insert("c", record("c", true));

        assert_eq!(store.count(), 3);
        let flagged = store.list_by(|r| r.flag);
        assert_eq!(flagged.len(), 2);
        assert!(flagged.iter().all(|r| r.flag));
    }

    #[test]
    fn test_clones_share_data() {
        let store: MemoryStore<Record> = MemoryStore::new();
        let other = store.clone();

        store.insert("a", record("a", false));
        assert!(other.contains("a"));
    }
}
