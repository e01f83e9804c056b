//! Peer 实体
//!
//! 参与任务分发的下载端实例，CDN 种子节点表现为一个合成 peer。
//! 持有分片位图、逐分片耗时序列与自身状态机

use crate::entity::host::Host;
use crate::entity::task::Task;
use crate::entity::{advance_timestamp, now_nanos};
use crate::error::SchedulerError;
use bit_set::BitSet;
use std::fmt;
use std::sync::atomic::AtomicI64;
use std::sync::{Arc, Mutex, RwLock};

/// Peer 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// 已注册，尚未开始下载
    Pending,
    /// 正在下载
    Running,
    /// 下载完成
    Finished,
    /// 下载失败
    Failed,
}

impl PeerState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Finished | PeerState::Failed)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Pending => write!(f, "Pending"),
            PeerState::Running => write!(f, "Running"),
            PeerState::Finished => write!(f, "Finished"),
            PeerState::Failed => write!(f, "Failed"),
        }
    }
}

/// Peer 状态机事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    /// 开始下载（Pending 或 Failed 重试）
    Download,
    /// 下载完成
    Finished,
    /// 下载失败
    Failed,
}

impl fmt::Display for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerEvent::Download => write!(f, "Download"),
            PeerEvent::Finished => write!(f, "Finished"),
            PeerEvent::Failed => write!(f, "Failed"),
        }
    }
}

/// Peer 状态转换表，纯函数，非法转换返回 None
fn transition(state: PeerState, event: PeerEvent) -> Option<PeerState> {
    match (state, event) {
        (PeerState::Pending, PeerEvent::Download) => Some(PeerState::Running),
        (PeerState::Failed, PeerEvent::Download) => Some(PeerState::Running),
        (PeerState::Running, PeerEvent::Finished) => Some(PeerState::Finished),
        (PeerState::Running, PeerEvent::Failed) => Some(PeerState::Failed),
        _ => None,
    }
}

/// Peer 实体
///
/// 强引用指向所属任务与主机；任务侧只保留弱引用，
/// 因此 peer 管理器删除后不会残留引用环
#[derive(Debug)]
pub struct Peer {
    /// Peer ID
    pub id: String,
    /// 所属任务
    pub task: Arc<Task>,
    /// 所在主机（多个 peer 可共享一台主机）
    pub host: Arc<Host>,
    /// 创建时间（epoch 纳秒）
    pub create_at: AtomicI64,
    /// 最近一次状态变更时间（epoch 纳秒）
    pub update_at: AtomicI64,
    /// 已持有的分片位图
    pieces: Mutex<BitSet>,
    /// 逐分片下载耗时（毫秒），只追加
    piece_costs: Mutex<Vec<u32>>,
    /// Peer 状态机
    state: RwLock<PeerState>,
}

impl Peer {
    /// 创建新 peer，初始状态 Pending
    pub fn new(id: String, task: Arc<Task>, host: Arc<Host>) -> Self {
        let now = now_nanos();
        Self {
            id,
            task,
            host,
            create_at: AtomicI64::new(now),
            update_at: AtomicI64::new(now),
            pieces: Mutex::new(BitSet::new()),
            piece_costs: Mutex::new(Vec::new()),
            state: RwLock::new(PeerState::Pending),
        }
    }

    /// 当前状态
    pub fn state(&self) -> PeerState {
        *self.state.read().unwrap()
    }

    /// 驱动状态机，转换成功时推进 update_at
    pub fn transition(&self, event: PeerEvent) -> Result<(), SchedulerError> {
        let mut state = self.state.write().unwrap();
        match transition(*state, event) {
            Some(next) => {
                *state = next;
                advance_timestamp(&self.update_at);
                Ok(())
            }
            None => Err(SchedulerError::IllegalPeerState {
                state: state.to_string(),
                event: event.to_string(),
            }),
        }
    }

    /// 标记已持有某个分片
    pub fn set_piece(&self, piece_num: u32) {
        self.pieces.lock().unwrap().insert(piece_num as usize);
    }

    /// 是否已持有某个分片
    pub fn has_piece(&self, piece_num: u32) -> bool {
        self.pieces.lock().unwrap().contains(piece_num as usize)
    }

    /// 已持有的分片数量
    pub fn len_pieces(&self) -> usize {
        self.pieces.lock().unwrap().len()
    }

    /// 追加一条分片耗时记录
    pub fn append_piece_cost(&self, cost_ms: u32) {
        self.piece_costs.lock().unwrap().push(cost_ms);
    }

    /// 耗时序列快照
    pub fn piece_costs(&self) -> Vec<u32> {
        self.piece_costs.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::task::UrlMeta;
    use std::sync::atomic::Ordering;

    fn make_peer() -> Peer {
        let task = Arc::new(Task::new(
            "task-1".to_string(),
            "http://example.com/a".to_string(),
            3,
            UrlMeta::default(),
        ));
        let host = Arc::new(Host::new(
            "host-1".to_string(),
            "10.0.0.1".to_string(),
            "node-1".to_string(),
            8003,
            8001,
        ));
        Peer::new("peer-1".to_string(), task, host)
    }

    #[test]
    fn test_fsm_happy_path() {
        let peer = make_peer();
        assert_eq!(peer.state(), PeerState::Pending);

        peer.transition(PeerEvent::Download).unwrap();
        assert_eq!(peer.state(), PeerState::Running);

        peer.transition(PeerEvent::Finished).unwrap();
        assert_eq!(peer.state(), PeerState::Finished);
        assert!(peer.state().is_terminal());
    }

    #[test]
    fn test_fsm_retry_after_failed() {
        let peer = make_peer();
        peer.transition(PeerEvent::Download).unwrap();
        peer.transition(PeerEvent::Failed).unwrap();

        peer.transition(PeerEvent::Download).unwrap();
        assert_eq!(peer.state(), PeerState::Running);
    }

    #[test]
    fn test_fsm_rejects_illegal_transition() {
        let peer = make_peer();

        // 未开始下载不能直接完成
        let err = peer.transition(PeerEvent::Finished).unwrap_err();
        assert!(matches!(err, SchedulerError::IllegalPeerState { .. }));

        // Finished 的 peer 不能再次启动
        peer.transition(PeerEvent::Download).unwrap();
        peer.transition(PeerEvent::Finished).unwrap();
        assert!(peer.transition(PeerEvent::Download).is_err());
    }

    #[test]
    fn test_transition_advances_update_at() {
        let peer = make_peer();
        let t0 = peer.update_at.load(Ordering::SeqCst);

        peer.transition(PeerEvent::Download).unwrap();
        assert!(peer.update_at.load(Ordering::SeqCst) > t0);
    }

    #[test]
    fn test_piece_bitmap() {
        let peer = make_peer();
        peer.set_piece(0);
        peer.set_piece(2);
        peer.set_piece(2);

        assert!(peer.has_piece(0));
        assert!(!peer.has_piece(1));
        assert!(peer.has_piece(2));
        assert_eq!(peer.len_pieces(), 2);
    }

    #[test]
    fn test_piece_costs_append_only() {
        let peer = make_peer();
        peer.append_piece_cost(0);
        peer.append_piece_cost(12);
        peer.append_piece_cost(7);

        assert_eq!(peer.piece_costs(), vec![0, 12, 7]);
    }
}
