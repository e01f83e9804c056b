//! 实体模块
//!
//! 任务、Peer、主机三类实体，各自携带独立的状态机。
//! 实体之间通过 ID 与弱引用关联，强引用的唯一归属在各自的管理器

pub mod host;
pub mod peer;
pub mod task;

pub use host::Host;
pub use peer::{Peer, PeerEvent, PeerState};
pub use task::{PieceInfo, SizeScope, Task, TaskEvent, TaskState, UrlMeta, TINY_FILE_SIZE};

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// 当前时间的 epoch 纳秒值，用于原子时间戳字段
pub(crate) fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// 推进原子时间戳，保证严格单调递增
///
/// 粗粒度时钟下连续两次转换可能读到相同的 now，取 max(now, prev + 1)
pub(crate) fn advance_timestamp(ts: &AtomicI64) {
    let now = now_nanos();
    let _ = ts.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
        Some(now.max(prev.saturating_add(1)))
    });
}
