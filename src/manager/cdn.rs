//! CDN 驱动
//!
//! 消费种子节点的流式分片回传，把种子节点物化为一个合成 peer，
//! 并在小文件场景下把内容直接拉回调度器内联缓存。
//! 种子 RPC 的具体传输实现（gRPC 连接池）由外层注入

use crate::dynconfig::{CdnSpec, Dynconfig, DynconfigData, Observer};
use crate::entity::{Host, Peer, PeerEvent, PieceInfo, Task, UrlMeta, TINY_FILE_SIZE};
use crate::error::SchedulerError;
use crate::idgen;
use crate::manager::{HostManager, PeerManager};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 种子请求
#[derive(Debug, Clone)]
pub struct SeedRequest {
    /// 任务 ID
    pub task_id: String,
    /// 下载 URL
    pub url: String,
    /// 下载元数据
    pub url_meta: UrlMeta,
}

/// 种子节点回传的分片事件
///
/// content_length 与 total_piece_count 只在终止帧（done == true）上权威
#[derive(Debug, Clone, Default)]
pub struct PieceSeed {
    /// 种子 peer ID
    pub peer_id: String,
    /// 种子所在主机 UUID
    pub host_uuid: String,
    /// 是否为终止帧
    pub done: bool,
    /// 内容总长度
    pub content_length: i64,
    /// 分片总数
    pub total_piece_count: i32,
    /// 分片信息，终止帧上可为空
    pub piece_info: Option<PieceInfo>,
}

/// 种子完成摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerResult {
    /// 分片总数
    pub total_piece_count: i32,
    /// 内容总长度
    pub content_length: i64,
}

/// 种子节点传输层
///
/// 对一池种子节点端点的抽象，gRPC 实现位于传输层
#[async_trait]
pub trait SeederTransport: Send + Sync {
    /// 打开种子流，流以 done 帧或错误结束
    async fn obtain_seeds(
        &self,
        request: SeedRequest,
    ) -> Result<mpsc::Receiver<Result<PieceSeed, SchedulerError>>, SchedulerError>;

    /// 种子节点地址变更后重建连接
    fn update_state(&self, addrs: Vec<String>);
}

/// CDN 客户端内部状态
struct ClientState {
    /// 最近一次动态配置数据，用于深比较去重
    data: DynconfigData,
    /// CDN 主机表：主机 UUID -> 主机
    hosts: HashMap<String, Arc<Host>>,
}

/// CDN 客户端
///
/// 订阅动态配置，维护 hostUuid -> Host 缓存；
/// 查表走读锁，刷新走写锁
pub struct CdnClient {
    /// 种子节点传输层
    transport: Arc<dyn SeederTransport>,
    /// 主机表与配置快照
    state: RwLock<ClientState>,
}

impl CdnClient {
    /// 创建客户端并注册为动态配置订阅者
    pub fn new(transport: Arc<dyn SeederTransport>, dynconfig: &dyn Dynconfig) -> Arc<Self> {
        let data = dynconfig.get();
        let hosts = cdns_to_hosts(&data.cdns);
        let client = Arc::new(Self {
            transport,
            state: RwLock::new(ClientState { data, hosts }),
        });

        dynconfig.register(client.clone());
        client
    }

    /// 按 UUID 查找 CDN 主机
    pub fn load_host(&self, key: &str) -> Option<Arc<Host>> {
        self.state.read().unwrap().hosts.get(key).cloned()
    }

    /// 打开种子流
    pub async fn obtain_seeds(
        &self,
        request: SeedRequest,
    ) -> Result<mpsc::Receiver<Result<PieceSeed, SchedulerError>>, SchedulerError> {
        self.transport.obtain_seeds(request).await
    }
}

impl Observer for CdnClient {
    fn on_notify(&self, data: &DynconfigData) {
        {
            let state = self.state.read().unwrap();
            if state.data == *data {
                info!("cdn 列表未变化，忽略本次通知");
                return;
            }
        }

        // 主机表替换与重建连接在同一写临界区内完成，
        // 读者不会看到新主机表配旧连接状态
        let mut state = self.state.write().unwrap();
        state.data = data.clone();
        state.hosts = cdns_to_hosts(&data.cdns);
        self.transport.update_state(cdn_net_addrs(&data.cdns));
        info!(cdns = data.cdns.len(), "cdn 列表已更新并重建连接");
    }
}

/// 把 CDN 记录转换为主机表
fn cdns_to_hosts(cdns: &[CdnSpec]) -> HashMap<String, Arc<Host>> {
    let mut hosts = HashMap::with_capacity(cdns.len());
    for cdn in cdns {
        let id = idgen::cdn_host_id(&cdn.hostname, cdn.port);
        let mut host = Host::new(
            id.clone(),
            cdn.ip.clone(),
            cdn.hostname.clone(),
            cdn.port,
            cdn.download_port,
        )
        .with_is_cdn(true)
        .with_security_domain(cdn.security_group.clone())
        .with_idc(cdn.idc.clone())
        .with_location(cdn.location.clone());

        if let Some(cluster) = &cdn.cluster {
            host = host
                .with_upload_load_limit(cluster.load_limit as i32)
                .with_net_topology(cluster.net_topology.clone());
        }

        hosts.insert(id, Arc::new(host));
    }
    hosts
}

/// 把 CDN 记录转换为拨号地址
fn cdn_net_addrs(cdns: &[CdnSpec]) -> Vec<String> {
    cdns.iter()
        .map(|cdn| format!("{}:{}", cdn.ip, cdn.port))
        .collect()
}

/// CDN 驱动
pub struct Cdn {
    /// CDN 客户端
    client: Arc<CdnClient>,
    /// Peer 管理器
    peer_manager: Arc<PeerManager>,
    /// 主机管理器
    host_manager: Arc<HostManager>,
}

impl Cdn {
    /// 创建 CDN 驱动
    pub fn new(
        client: Arc<CdnClient>,
        peer_manager: Arc<PeerManager>,
        host_manager: Arc<HostManager>,
    ) -> Self {
        Self {
            client,
            peer_manager,
            host_manager,
        }
    }

    /// CDN 客户端
    pub fn client(&self) -> &Arc<CdnClient> {
        &self.client
    }

    /// 触发种子下载
    ///
    /// 消费种子流直到终止帧，返回种子 peer 与完成摘要。
    /// 所有错误原样上抛，由调用方决定重试、回源或继续上抛；
    /// 半初始化的种子 peer 留在注册表里等 GC
    pub async fn trigger_task(
        &self,
        token: &CancellationToken,
        task: &Arc<Task>,
    ) -> Result<(Arc<Peer>, PeerResult), SchedulerError> {
        let mut stream = self
            .client
            .obtain_seeds(SeedRequest {
                task_id: task.id.clone(),
                url: task.url.clone(),
                url_meta: task.url_meta.clone(),
            })
            .await?;

        let mut seeder: Option<Arc<Peer>> = None;

        loop {
            let piece = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(SchedulerError::StreamRecvFailed(
                        "seed stream cancelled".to_string(),
                    ));
                }
                received = stream.recv() => match received {
                    Some(Ok(piece)) => piece,
                    Some(Err(err)) => return Err(err),
                    None => {
                        return Err(SchedulerError::StreamRecvFailed(
                            "seed stream closed before done frame".to_string(),
                        ));
                    }
                },
            };

            debug!(task_id = %task.id, ?piece, "收到分片事件");

            // 第一帧是获知种子 peer 身份的唯一可靠时机，在此处惰性注册
            let peer = if let Some(peer) = &seeder {
                peer.clone()
            } else {
                let peer = self.init_peer(task, &piece)?;
                peer.transition(PeerEvent::Download)?;
                seeder = Some(peer.clone());
                peer
            };

            // 终止帧
            if piece.done {
                info!(task_id = %task.id, peer_id = %peer.id, "收到最后一个分片事件");
                peer.transition(PeerEvent::Finished)?;

                if piece.content_length <= TINY_FILE_SIZE {
                    info!(task_id = %task.id, "任务为小文件，直接拉回内容内联缓存");
                    let data = self.download_tiny_file(token, task, &peer).await?;
                    if data.len() as i64 != piece.content_length {
                        return Err(SchedulerError::TinyFileLengthMismatch {
                            expected: piece.content_length,
                            actual: data.len(),
                        });
                    }
                    task.set_direct_piece(data);
                }

                return Ok((
                    peer,
                    PeerResult {
                        total_piece_count: piece.total_piece_count,
                        content_length: piece.content_length,
                    },
                ));
            }

            if let Some(info) = &piece.piece_info {
                if info.piece_num >= 0 {
                    peer.set_piece(info.piece_num as u32);
                }
                // TODO(seeder): 种子节点尚未上报分片耗时，先记 0
                peer.append_piece_cost(0);
                task.load_or_store_piece(info.clone());
            }
        }
    }

    /// 初始化种子 peer
    ///
    /// 已注册则直接复用；主机先查主机管理器，再查 CDN 客户端的主机表
    fn init_peer(&self, task: &Arc<Task>, piece: &PieceSeed) -> Result<Arc<Peer>, SchedulerError> {
        if let Some(peer) = self.peer_manager.load(&piece.peer_id) {
            return Ok(peer);
        }

        info!(task_id = %task.id, peer_id = %piece.peer_id, "未找到种子 peer，开始初始化");
        let host = match self.host_manager.load(&piece.host_uuid) {
            Some(host) => host,
            None => match self.client.load_host(&piece.host_uuid) {
                Some(host) => {
                    self.host_manager.store(host.clone());
                    info!(host_id = %host.id, "cdn 主机注册成功");
                    host
                }
                None => {
                    error!(task_id = %task.id, host_uuid = %piece.host_uuid, "未找到 cdn 主机");
                    return Err(SchedulerError::HostNotFound {
                        uuid: piece.host_uuid.clone(),
                    });
                }
            },
        };

        let peer = Arc::new(Peer::new(piece.peer_id.clone(), task.clone(), host));
        self.peer_manager.store(peer.clone());
        info!(peer_id = %peer.id, "种子 peer 注册成功");
        Ok(peer)
    }

    /// 从 CDN 拉回小文件内容
    ///
    /// 地址格式: http://{ip}:{download_port}/download/{taskID 前 3 位}/{taskID}?peerId=scheduler
    async fn download_tiny_file(
        &self,
        token: &CancellationToken,
        task: &Arc<Task>,
        peer: &Arc<Peer>,
    ) -> Result<Vec<u8>, SchedulerError> {
        let prefix = task.id.get(..3).unwrap_or(&task.id);
        let url = format!(
            "http://{}:{}/download/{}/{}?peerId=scheduler",
            peer.host.ip, peer.host.download_port, prefix, task.id
        );
        info!(task_id = %task.id, url = %url, "下载小文件");

        let fetch = async {
            let response = reqwest::get(&url).await?;
            response.bytes().await
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(SchedulerError::TinyFileFetchFailed(
                "tiny file download cancelled".to_string(),
            )),
            result = fetch => match result {
                Ok(body) => Ok(body.to_vec()),
                Err(err) => Err(err.into()),
            },
        }
    }
}
