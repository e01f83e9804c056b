//! Peer 管理器
//!
//! Peer 的唯一强引用归属地。写入同时登记到所属任务的 peer 子表，
//! 删除同时从子表摘除，保证两张表不发生漂移

use crate::entity::Peer;
use crate::gc::GcRunner;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Peer 注册表
#[derive(Debug, Default)]
pub struct PeerManager {
    /// Peer 表：peer ID -> peer
    peers: DashMap<String, Arc<Peer>>,
}

impl PeerManager {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 按 ID 查找 peer
    pub fn load(&self, key: &str) -> Option<Arc<Peer>> {
        self.peers.get(key).map(|peer| peer.value().clone())
    }

    /// 写入 peer，同时登记到所属任务的 peer 子表
    pub fn store(&self, peer: Arc<Peer>) {
        peer.task.store_peer(&peer);
        self.peers.insert(peer.id.clone(), peer);
    }

    /// 已存在则返回既有 peer，否则写入并返回入参
    pub fn load_or_store(&self, peer: Arc<Peer>) -> (Arc<Peer>, bool) {
        match self.peers.entry(peer.id.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), true),
            Entry::Vacant(entry) => {
                peer.task.store_peer(&peer);
                entry.insert(peer.clone());
                (peer, false)
            }
        }
    }

    /// 删除 peer，同时从所属任务的 peer 子表摘除
    pub fn delete(&self, key: &str) {
        if let Some((_, peer)) = self.peers.remove(key) {
            peer.task.delete_peer(key);
        }
    }

    /// Peer 数量，O(n)，不要放在热路径
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// 注册表是否为空
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl GcRunner for PeerManager {
    fn name(&self) -> &'static str {
        "peer"
    }

    /// 清理一轮过期 peer
    ///
    /// 只回收终态且空闲超过 expire 的 peer，
    /// 回收运行中的 peer 会破坏其所属任务的下载
    fn run_gc(&self, expire: Duration, now_nanos: i64) {
        let expire = expire.as_nanos() as i64;
        let mut expired = Vec::new();
        for entry in self.peers.iter() {
            let peer = entry.value();
            if peer.state().is_terminal()
                && peer.update_at.load(Ordering::SeqCst).saturating_add(expire) < now_nanos
            {
                expired.push(peer.id.clone());
            }
        }

        for id in expired {
            info!(peer_id = %id, "peer 已过期，从注册表移除");
            self.delete(&id);
        }
    }
}
