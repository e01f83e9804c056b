//! 调度核心错误类型
//!
//! 错误种类保持稳定，传输层可以将其映射为对应的 RPC 状态码

use thiserror::Error;

/// 调度核心统一错误类型
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// 种子节点上报了未知的主机 UUID，本次种子触发失败
    #[error("can not find host uuid: {uuid}")]
    HostNotFound { uuid: String },

    /// 任务状态机拒绝了本次转换，上层可以决定是否重试
    #[error("task state machine rejects event {event} in state {state}")]
    IllegalTaskState { state: String, event: String },

    /// Peer 状态机拒绝了本次转换
    #[error("peer state machine rejects event {event} in state {state}")]
    IllegalPeerState { state: String, event: String },

    /// 种子流接收失败（底层 I/O 或传输错误），已初始化的 peer 留给 GC 回收
    #[error("receive piece seed failed: {0}")]
    StreamRecvFailed(String),

    /// 小文件实际数据长度与声明的内容长度不一致，禁止缓存
    #[error("piece actual data length is different from content length, content length is {expected}, data length is {actual}")]
    TinyFileLengthMismatch { expected: i64, actual: usize },

    /// 小文件 HTTP 下载失败
    #[error("download tiny file failed: {0}")]
    TinyFileFetchFailed(String),

    /// 配置校验失败，启动期致命
    #[error("invalid config: {0}")]
    ConfigInvalid(String),
}

impl From<reqwest::Error> for SchedulerError {
    fn from(err: reqwest::Error) -> Self {
        SchedulerError::TinyFileFetchFailed(err.to_string())
    }
}
