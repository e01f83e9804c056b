//! 主机管理器
//!
//! 主机不参与 GC，CDN 主机的增删跟随动态配置

use crate::entity::Host;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// 主机注册表
#[derive(Debug, Default)]
pub struct HostManager {
    /// 主机表：主机 UUID -> 主机
    hosts: DashMap<String, Arc<Host>>,
}

impl HostManager {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 按 UUID 查找主机
    pub fn load(&self, key: &str) -> Option<Arc<Host>> {
        self.hosts.get(key).map(|host| host.value().clone())
    }

    /// 写入主机
    pub fn store(&self, host: Arc<Host>) {
        self.hosts.insert(host.id.clone(), host);
    }

    /// 已存在则返回既有主机，否则写入并返回入参
    pub fn load_or_store(&self, host: Arc<Host>) -> (Arc<Host>, bool) {
        match self.hosts.entry(host.id.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), true),
            Entry::Vacant(entry) => {
                entry.insert(host.clone());
                (host, false)
            }
        }
    }

    /// 删除主机
    pub fn delete(&self, key: &str) {
        self.hosts.remove(key);
    }

    /// 主机数量，O(n)，不要放在热路径
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// 注册表是否为空
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_host(id: &str) -> Arc<Host> {
        Arc::new(Host::new(
            id.to_string(),
            "10.0.0.1".to_string(),
            "node-1".to_string(),
            8003,
            8001,
        ))
    }

    #[test]
    fn test_five_operations() {
        let manager = HostManager::new();
        assert!(manager.is_empty());

        let host = make_host("h1");
        manager.store(host.clone());
        assert!(Arc::ptr_eq(&manager.load("h1").unwrap(), &host));
        assert_eq!(manager.len(), 1);

        let (stored, loaded) = manager.load_or_store(make_host("h1"));
        assert!(loaded);
        assert!(Arc::ptr_eq(&stored, &host));

        let (_, loaded) = manager.load_or_store(make_host("h2"));
        assert!(!loaded);
        assert_eq!(manager.len(), 2);

        manager.delete("h1");
        assert!(manager.load("h1").is_none());
    }
}
