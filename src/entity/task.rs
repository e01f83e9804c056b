//! 任务实体
//!
//! 任务由 URL + 下载元数据唯一标识，持有分片表、参与 peer 表、
//! 回源名额集合以及一个四状态的下载状态机

use crate::entity::peer::Peer;
use crate::entity::{advance_timestamp, now_nanos};
use crate::error::SchedulerError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// 小文件阈值：内容长度不超过 128 字节的任务直接内联缓存
pub const TINY_FILE_SIZE: i64 = 128;

/// 任务下载元数据
///
/// 范围、摘要、过滤器与透传 header，对调度核心不透明
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMeta {
    /// 内容摘要（如 md5:xxx / sha256:xxx）
    #[serde(default)]
    pub digest: String,
    /// 任务分组标签
    #[serde(default)]
    pub tag: String,
    /// Range 下载区间
    #[serde(default)]
    pub range: String,
    /// URL 参数过滤器
    #[serde(default)]
    pub filter: String,
    /// 透传给源站的请求头
    #[serde(default)]
    pub header: HashMap<String, String>,
}

/// 分片信息
///
/// 以任务内的分片号为身份标识，一经写入不再变更
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PieceInfo {
    /// 分片号（非负）
    pub piece_num: i32,
    /// 分片在内容中的起始偏移
    pub range_start: u64,
    /// 分片长度
    pub range_size: i32,
    /// 分片 md5
    pub piece_md5: String,
    /// 分片在文件中的偏移
    pub piece_offset: u64,
    /// 分片存储样式
    pub piece_style: i32,
    /// 分片下载耗时（毫秒）
    pub download_cost_ms: u32,
}

/// 任务尺寸档位，按需计算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeScope {
    /// 内容长度 <= 128 字节，调度器直接内联返回
    Tiny,
    /// 只有一个分片
    Small,
    /// 常规任务
    Normal,
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// 已创建，尚未开始下载
    Pending,
    /// 正在从 CDN 或回源下载
    Running,
    /// 下载成功
    Succeeded,
    /// 下载失败
    Failed,
}

impl TaskState {
    /// 是否为终态（GC 只回收终态实体）
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "Pending"),
            TaskState::Running => write!(f, "Running"),
            TaskState::Succeeded => write!(f, "Succeeded"),
            TaskState::Failed => write!(f, "Failed"),
        }
    }
}

/// 任务状态机事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    /// 开始下载（Pending 或 Failed 重试）
    Download,
    /// 下载成功
    Succeeded,
    /// 下载失败
    Failed,
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskEvent::Download => write!(f, "Download"),
            TaskEvent::Succeeded => write!(f, "Succeeded"),
            TaskEvent::Failed => write!(f, "Failed"),
        }
    }
}

/// 任务状态转换表，纯函数，非法转换返回 None
fn transition(state: TaskState, event: TaskEvent) -> Option<TaskState> {
    match (state, event) {
        (TaskState::Pending, TaskEvent::Download) => Some(TaskState::Running),
        (TaskState::Failed, TaskEvent::Download) => Some(TaskState::Running),
        (TaskState::Running, TaskEvent::Succeeded) => Some(TaskState::Succeeded),
        (TaskState::Running, TaskEvent::Failed) => Some(TaskState::Failed),
        _ => None,
    }
}

/// 任务实体
#[derive(Debug)]
pub struct Task {
    /// 任务 ID
    pub id: String,
    /// 下载 URL
    pub url: String,
    /// 下载元数据
    pub url_meta: UrlMeta,
    /// 内容总长度，未知时为 0
    pub content_length: AtomicI64,
    /// 分片总数
    pub total_piece_count: AtomicI32,
    /// 允许回源的 peer 上限
    pub back_to_source_limit: AtomicI32,
    /// 创建时间（epoch 纳秒）
    pub create_at: AtomicI64,
    /// 最近一次状态变更时间（epoch 纳秒），GC 依据此判断空闲
    pub update_at: AtomicI64,
    /// 小文件内联缓存，仅 Tiny 档位任务填充
    direct_piece: RwLock<Vec<u8>>,
    /// 正在回源的 peer ID 集合，长度不超过 back_to_source_limit
    back_to_source_peers: RwLock<HashSet<String>>,
    /// 任务状态机
    state: RwLock<TaskState>,
    /// 分片表：分片号 -> 分片信息
    pieces: DashMap<i32, PieceInfo>,
    /// 参与 peer 表：peer ID -> 弱引用（强引用归 peer 管理器）
    peers: DashMap<String, Weak<Peer>>,
}

impl Task {
    /// 创建新任务，初始状态 Pending
    pub fn new(id: String, url: String, back_to_source_limit: i32, url_meta: UrlMeta) -> Self {
        let now = now_nanos();
        Self {
            id,
            url,
            url_meta,
            content_length: AtomicI64::new(0),
            total_piece_count: AtomicI32::new(0),
            back_to_source_limit: AtomicI32::new(back_to_source_limit),
            create_at: AtomicI64::new(now),
            update_at: AtomicI64::new(now),
            direct_piece: RwLock::new(Vec::new()),
            back_to_source_peers: RwLock::new(HashSet::new()),
            state: RwLock::new(TaskState::Pending),
            pieces: DashMap::new(),
            peers: DashMap::new(),
        }
    }

    /// 当前状态
    pub fn state(&self) -> TaskState {
        *self.state.read().unwrap()
    }

    /// 驱动状态机
    ///
    /// 转换成功时推进 update_at；非法转换返回 IllegalTaskState，
    /// 并发下 FSM 拒绝属于正常情况，调用方自行决定重试或上抛
    pub fn transition(&self, event: TaskEvent) -> Result<(), SchedulerError> {
        let mut state = self.state.write().unwrap();
        match transition(*state, event) {
            Some(next) => {
                *state = next;
                advance_timestamp(&self.update_at);
                Ok(())
            }
            None => Err(SchedulerError::IllegalTaskState {
                state: state.to_string(),
                event: event.to_string(),
            }),
        }
    }

    /// 任务尺寸档位，(content_length, total_piece_count) 的纯函数
    pub fn size_scope(&self) -> SizeScope {
        if self.content_length.load(Ordering::SeqCst) <= TINY_FILE_SIZE {
            return SizeScope::Tiny;
        }

        if self.total_piece_count.load(Ordering::SeqCst) == 1 {
            return SizeScope::Small;
        }

        SizeScope::Normal
    }

    /// 是否还有回源名额
    pub fn can_back_to_source(&self) -> bool {
        let used = self.back_to_source_peers.read().unwrap().len() as i32;
        used < self.back_to_source_limit.load(Ordering::SeqCst)
    }

    /// 尝试占用一个回源名额
    ///
    /// 检查与写入在同一把写锁内完成，集合长度不会超过上限。
    /// 已持有名额的 peer 重复申请视为成功
    pub fn add_back_to_source_peer(&self, peer_id: &str) -> bool {
        let mut peers = self.back_to_source_peers.write().unwrap();
        if peers.contains(peer_id) {
            return true;
        }
        if (peers.len() as i32) < self.back_to_source_limit.load(Ordering::SeqCst) {
            peers.insert(peer_id.to_string());
            return true;
        }
        false
    }

    /// 释放回源名额
    pub fn delete_back_to_source_peer(&self, peer_id: &str) {
        self.back_to_source_peers.write().unwrap().remove(peer_id);
    }

    /// peer 是否正在回源
    pub fn is_back_to_source_peer(&self, peer_id: &str) -> bool {
        self.back_to_source_peers.read().unwrap().contains(peer_id)
    }

    /// 正在回源的 peer 数量
    pub fn len_back_to_source_peers(&self) -> usize {
        self.back_to_source_peers.read().unwrap().len()
    }

    /// 读取小文件内联缓存
    pub fn direct_piece(&self) -> Vec<u8> {
        self.direct_piece.read().unwrap().clone()
    }

    /// 写入小文件内联缓存
    pub fn set_direct_piece(&self, data: Vec<u8>) {
        *self.direct_piece.write().unwrap() = data;
    }

    // ==================== peer 子表 ====================

    /// 按 ID 查找参与 peer，失效的弱引用视为不存在并顺手清理
    pub fn load_peer(&self, key: &str) -> Option<Arc<Peer>> {
        let peer = self.peers.get(key).and_then(|weak| weak.upgrade());
        if peer.is_none() {
            self.peers.remove_if(key, |_, weak| weak.upgrade().is_none());
        }
        peer
    }

    /// 记录参与 peer
    pub fn store_peer(&self, peer: &Arc<Peer>) {
        self.peers.insert(peer.id.clone(), Arc::downgrade(peer));
    }

    /// 已存在则返回既有 peer，否则写入并返回入参
    pub fn load_or_store_peer(&self, peer: Arc<Peer>) -> (Arc<Peer>, bool) {
        match self.peers.entry(peer.id.clone()) {
            Entry::Occupied(mut entry) => match entry.get().upgrade() {
                Some(existing) => (existing, true),
                None => {
                    entry.insert(Arc::downgrade(&peer));
                    (peer, false)
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(Arc::downgrade(&peer));
                (peer, false)
            }
        }
    }

    /// 删除参与 peer 记录
    pub fn delete_peer(&self, key: &str) {
        self.peers.remove(key);
    }

    /// 存活的参与 peer 数量，O(n)
    pub fn len_peers(&self) -> usize {
        self.peers
            .iter()
            .filter(|entry| entry.value().upgrade().is_some())
            .count()
    }

    // ==================== 分片子表 ====================

    /// 按分片号查找分片
    pub fn load_piece(&self, key: i32) -> Option<PieceInfo> {
        self.pieces.get(&key).map(|piece| piece.value().clone())
    }

    /// 写入分片
    pub fn store_piece(&self, piece: PieceInfo) {
        self.pieces.insert(piece.piece_num, piece);
    }

    /// 已存在则返回既有分片，否则写入并返回入参（并发写入的权威入口）
    pub fn load_or_store_piece(&self, piece: PieceInfo) -> (PieceInfo, bool) {
        match self.pieces.entry(piece.piece_num) {
            Entry::Occupied(entry) => (entry.get().clone(), true),
            Entry::Vacant(entry) => {
                let stored = entry.insert(piece);
                (stored.clone(), false)
            }
        }
    }

    /// 删除分片
    pub fn delete_piece(&self, key: i32) {
        self.pieces.remove(&key);
    }

    /// 分片数量，O(n)
    pub fn len_pieces(&self) -> usize {
        self.pieces.len()
    }
}
