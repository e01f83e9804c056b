// P2P CDN Scheduler Core
// P2P 内容分发调度核心库

// 配置管理模块
pub mod config;

// 动态配置模块（CDN 列表订阅）
pub mod dynconfig;

// 实体模块（任务 / Peer / 主机）
pub mod entity;

// 错误类型
pub mod error;

// 元数据 GC 模块
pub mod gc;

// ID 生成模块
pub mod idgen;

// 日志系统模块
pub mod logging;

// 注册表与 CDN 驱动模块
pub mod manager;

// 调度服务模块
pub mod service;

// 导出常用类型
pub use config::{AppConfig, LogConfig, TaskConfig};
pub use dynconfig::{CdnClusterConfig, CdnSpec, Dynconfig, DynconfigData, LocalDynconfig, Observer};
pub use entity::{Host, Peer, PeerEvent, PeerState, PieceInfo, SizeScope, Task, TaskEvent, TaskState, UrlMeta};
pub use error::SchedulerError;
pub use gc::{GcRunner, GcScheduler};
pub use manager::{
    Cdn, CdnClient, HostManager, PeerManager, PeerResult, PieceSeed, SeedRequest, SeederTransport,
    TaskManager,
};
pub use service::SchedulerService;
