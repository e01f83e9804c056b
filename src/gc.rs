//! 元数据 GC 模块
//!
//! 每类实体一个后台 worker：启动后先等 gc_initial_delay，
//! 之后按 gc_meta_interval 的节拍执行清理。
//! 关停信号在下一个节拍边界生效，进行中的清理会跑完

use crate::config::TaskConfig;
use crate::entity::now_nanos;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 可被周期清理的注册表
pub trait GcRunner: Send + Sync {
    /// 实体类型名，日志用
    fn name(&self) -> &'static str;

    /// 执行一轮清理，now_nanos 为本轮扫描时间
    fn run_gc(&self, expire: Duration, now_nanos: i64);
}

/// 元数据 GC 调度器
pub struct GcScheduler {
    /// 取消令牌
    cancel_token: CancellationToken,
    /// worker 句柄
    handles: Vec<JoinHandle<()>>,
}

impl GcScheduler {
    /// 为每个注册表启动一个 GC worker
    pub fn start(config: &TaskConfig, runners: Vec<Arc<dyn GcRunner>>) -> Self {
        let cancel_token = CancellationToken::new();
        let handles = runners
            .into_iter()
            .map(|runner| {
                let token = cancel_token.child_token();
                let initial_delay = config.gc_initial_delay;
                let interval = config.gc_meta_interval;
                let expire = config.expire_time;
                tokio::spawn(async move {
                    Self::run_worker(runner, initial_delay, interval, expire, token).await;
                })
            })
            .collect();

        Self {
            cancel_token,
            handles,
        }
    }

    /// 单个 GC worker 的主循环
    async fn run_worker(
        runner: Arc<dyn GcRunner>,
        initial_delay: Duration,
        interval: Duration,
        expire: Duration,
        token: CancellationToken,
    ) {
        info!(
            kind = runner.name(),
            "GC worker 启动, 首次延迟 {:?}, 间隔 {:?}, 过期窗口 {:?}",
            initial_delay,
            interval,
            expire
        );

        tokio::select! {
            _ = tokio::time::sleep(initial_delay) => {}
            _ = token.cancelled() => {
                debug!(kind = runner.name(), "GC worker 在首次延迟期间退出");
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    debug!(kind = runner.name(), "开始一轮 GC 清理");
                    runner.run_gc(expire, now_nanos());
                }
                _ = token.cancelled() => {
                    debug!(kind = runner.name(), "GC worker 退出");
                    break;
                }
            }
        }
    }

    /// 发出关停信号并等待所有 worker 退出
    pub async fn shutdown(mut self) {
        self.cancel_token.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        info!("所有 GC worker 已停止");
    }
}

impl Drop for GcScheduler {
    fn drop(&mut self) {
        // 兜底关停信号，worker 在下一个节拍边界退出
        self.cancel_token.cancel();
    }
}
