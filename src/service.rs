//! 调度服务
//!
//! 任务准入与种子触发的编排层：确保任务存在、围绕 CDN 触发驱动任务状态机、
//! 管理源站访问失败后的冷却重试与回源名额发放。
//! gRPC 接入层在此之上做请求解析与应答

use crate::config::TaskConfig;
use crate::entity::{Peer, Task, TaskEvent, TaskState, UrlMeta};
use crate::error::SchedulerError;
use crate::manager::{Cdn, PeerResult, TaskManager};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 调度服务
pub struct SchedulerService {
    /// 任务生命周期配置
    config: TaskConfig,
    /// 任务管理器
    task_manager: Arc<TaskManager>,
    /// CDN 驱动
    cdn: Arc<Cdn>,
}

impl SchedulerService {
    /// 创建调度服务
    pub fn new(config: TaskConfig, task_manager: Arc<TaskManager>, cdn: Arc<Cdn>) -> Self {
        Self {
            config,
            task_manager,
            cdn,
        }
    }

    /// 任务管理器
    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.task_manager
    }

    /// 确保任务存在
    ///
    /// 并发准入同一任务时只有一个实例胜出，落败方同样拿到共享实例
    pub fn get_or_create_task(
        &self,
        id: String,
        url: String,
        back_to_source_limit: i32,
        url_meta: UrlMeta,
    ) -> (Arc<Task>, bool) {
        let task = Arc::new(Task::new(id, url, back_to_source_limit, url_meta));
        self.task_manager.load_or_store(task)
    }

    /// 任务是否需要（重新）触发种子
    ///
    /// 新任务需要；失败任务冷却 failAccessInterval 之后允许重试
    pub fn need_seed(&self, task: &Task, now_nanos: i64) -> bool {
        match task.state() {
            TaskState::Pending => true,
            TaskState::Failed => {
                let idle = now_nanos.saturating_sub(task.update_at.load(Ordering::SeqCst));
                idle > self.config.fail_access_interval.as_nanos() as i64
            }
            _ => false,
        }
    }

    /// 触发种子下载并驱动任务状态机
    ///
    /// 成功时把终止帧的内容长度与分片总数写回任务并置 Succeeded；
    /// 失败时置 Failed 并原样上抛，冷却结束后允许重新触发
    pub async fn seed_task(
        &self,
        token: &CancellationToken,
        task: &Arc<Task>,
    ) -> Result<(Arc<Peer>, PeerResult), SchedulerError> {
        task.transition(TaskEvent::Download)?;
        info!(task_id = %task.id, url = %task.url, "开始触发种子下载");

        match self.cdn.trigger_task(token, task).await {
            Ok((peer, result)) => {
                task.content_length
                    .store(result.content_length, Ordering::SeqCst);
                task.total_piece_count
                    .store(result.total_piece_count, Ordering::SeqCst);
                task.transition(TaskEvent::Succeeded)?;
                info!(
                    task_id = %task.id,
                    peer_id = %peer.id,
                    content_length = result.content_length,
                    total_piece_count = result.total_piece_count,
                    "种子下载完成"
                );
                Ok((peer, result))
            }
            Err(err) => {
                error!(task_id = %task.id, error = %err, "种子下载失败");
                if let Err(fsm_err) = task.transition(TaskEvent::Failed) {
                    // 并发触发下状态机可能已被别人推走
                    warn!(task_id = %task.id, error = %fsm_err, "任务置失败态被拒绝");
                }
                Err(err)
            }
        }
    }

    /// 尝试为 peer 发放回源名额
    pub fn try_back_to_source(&self, task: &Task, peer_id: &str) -> bool {
        let granted = task.add_back_to_source_peer(peer_id);
        if granted {
            info!(task_id = %task.id, peer_id = %peer_id, "回源名额发放成功");
        } else {
            info!(task_id = %task.id, peer_id = %peer_id, "回源名额已用尽");
        }
        granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynconfig::{CdnSpec, DynconfigData, LocalDynconfig};
    use crate::entity::{now_nanos, PieceInfo, SizeScope};
    use crate::idgen;
    use crate::manager::{CdnClient, HostManager, PeerManager, PieceSeed, SeedRequest, SeederTransport};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct FakeTransport {
        frames: Mutex<Vec<Vec<Result<PieceSeed, SchedulerError>>>>,
    }

    #[async_trait]
    impl SeederTransport for FakeTransport {
        async fn obtain_seeds(
            &self,
            _request: SeedRequest,
        ) -> Result<mpsc::Receiver<Result<PieceSeed, SchedulerError>>, SchedulerError> {
            let mut scripts = self.frames.lock().unwrap();
            let frames = if scripts.is_empty() {
                Vec::new()
            } else {
                scripts.remove(0)
            };
            let (tx, rx) = mpsc::channel(frames.len().max(1));
            tokio::spawn(async move {
                for frame in frames {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }

        fn update_state(&self, _addrs: Vec<String>) {}
    }

    fn make_service(scripts: Vec<Vec<Result<PieceSeed, SchedulerError>>>) -> SchedulerService {
        let transport = Arc::new(FakeTransport {
            frames: Mutex::new(scripts),
        });
        let dynconfig = LocalDynconfig::new(DynconfigData {
            cdns: vec![CdnSpec {
                hostname: "cdn-0".to_string(),
                ip: "10.0.0.1".to_string(),
                port: 8003,
                download_port: 8001,
                security_group: String::new(),
                idc: String::new(),
                location: String::new(),
                cluster: None,
            }],
        });
        let client = CdnClient::new(transport, &dynconfig);
        let peer_manager = Arc::new(PeerManager::new());
        let host_manager = Arc::new(HostManager::new());
        let cdn = Arc::new(Cdn::new(client, peer_manager, host_manager));
        SchedulerService::new(TaskConfig::default(), Arc::new(TaskManager::new()), cdn)
    }

    fn seed_frames(piece_count: i32, content_length: i64) -> Vec<Result<PieceSeed, SchedulerError>> {
        let host_uuid = idgen::cdn_host_id("cdn-0", 8003);
        let mut frames: Vec<Result<PieceSeed, SchedulerError>> = (0..piece_count)
            .map(|piece_num| {
                Ok(PieceSeed {
                    peer_id: "cdn-peer-1".to_string(),
                    host_uuid: host_uuid.clone(),
                    piece_info: Some(PieceInfo {
                        piece_num,
                        range_start: piece_num as u64 * 1024,
                        range_size: 1024,
                        ..Default::default()
                    }),
                    ..Default::default()
                })
            })
            .collect();
        frames.push(Ok(PieceSeed {
            done: true,
            content_length,
            total_piece_count: piece_count,
            ..Default::default()
        }));
        frames
    }

    #[tokio::test]
    async fn test_get_or_create_task_deduplicates() {
        let service = make_service(Vec::new());

        let (first, loaded) = service.get_or_create_task(
            "t1".to_string(),
            "http://example.com/a".to_string(),
            3,
            UrlMeta::default(),
        );
        assert!(!loaded);

        let (second, loaded) = service.get_or_create_task(
            "t1".to_string(),
            "http://example.com/a".to_string(),
            3,
            UrlMeta::default(),
        );
        assert!(loaded);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_seed_task_success_drives_fsm() {
        let service = make_service(vec![seed_frames(4, 4096)]);
        let (task, _) = service.get_or_create_task(
            "t1".to_string(),
            "http://example.com/a".to_string(),
            3,
            UrlMeta::default(),
        );

        let (peer, result) = service
            .seed_task(&CancellationToken::new(), &task)
            .await
            .unwrap();

        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.content_length.load(Ordering::SeqCst), 4096);
        assert_eq!(task.total_piece_count.load(Ordering::SeqCst), 4);
        assert_eq!(task.size_scope(), SizeScope::Normal);
        assert_eq!(result.total_piece_count, 4);
        assert_eq!(peer.id, "cdn-peer-1");
    }

    #[tokio::test]
    async fn test_seed_task_single_piece_is_small() {
        let service = make_service(vec![seed_frames(1, 4096)]);
        let (task, _) = service.get_or_create_task(
            "t1".to_string(),
            "http://example.com/a".to_string(),
            3,
            UrlMeta::default(),
        );

        service
            .seed_task(&CancellationToken::new(), &task)
            .await
            .unwrap();
        assert_eq!(task.size_scope(), SizeScope::Small);
    }

    #[tokio::test]
    async fn test_seed_task_failure_enters_cooldown() {
        // 种子流直接关闭，触发失败
        let service = make_service(vec![Vec::new()]);
        let (task, _) = service.get_or_create_task(
            "t1".to_string(),
            "http://example.com/a".to_string(),
            3,
            UrlMeta::default(),
        );

        let err = service
            .seed_task(&CancellationToken::new(), &task)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::StreamRecvFailed(_)));
        assert_eq!(task.state(), TaskState::Failed);

        // 冷却期内不允许重试，冷却结束后允许
        let now = now_nanos();
        assert!(!service.need_seed(&task, now));
        let after_cooldown = now
            + TaskConfig::default().fail_access_interval.as_nanos() as i64
            + Duration::from_secs(1).as_nanos() as i64;
        assert!(service.need_seed(&task, after_cooldown));
    }

    #[tokio::test]
    async fn test_need_seed_states() {
        let service = make_service(vec![seed_frames(2, 4096)]);
        let (task, _) = service.get_or_create_task(
            "t1".to_string(),
            "http://example.com/a".to_string(),
            3,
            UrlMeta::default(),
        );

        // 新任务需要触发
        assert!(service.need_seed(&task, now_nanos()));

        service
            .seed_task(&CancellationToken::new(), &task)
            .await
            .unwrap();

        // 成功的任务不再触发
        assert!(!service.need_seed(&task, now_nanos()));
    }

    #[tokio::test]
    async fn test_try_back_to_source_respects_limit() {
        let service = make_service(Vec::new());
        let (task, _) = service.get_or_create_task(
            "t1".to_string(),
            "http://example.com/a".to_string(),
            1,
            UrlMeta::default(),
        );

        assert!(service.try_back_to_source(&task, "peer-1"));
        assert!(!service.try_back_to_source(&task, "peer-2"));
        assert_eq!(task.len_back_to_source_peers(), 1);
    }
}
