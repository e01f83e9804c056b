//! 注册表与 CDN 驱动模块
//!
//! 任务 / Peer / 主机三张并发注册表共享同一组操作：
//! load / store / load_or_store / delete / len，单键操作各自原子，
//! 不承诺跨键原子性

pub mod cdn;
pub mod host;
pub mod peer;
pub mod task;

pub use cdn::{Cdn, CdnClient, PeerResult, PieceSeed, SeedRequest, SeederTransport};
pub use host::HostManager;
pub use peer::PeerManager;
pub use task::TaskManager;
