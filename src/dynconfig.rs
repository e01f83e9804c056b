//! 动态配置模块
//!
//! CDN 种子节点列表的订阅发布契约：配置源持有订阅者列表，
//! 每次更新时逐个通知。OnNotify 会拿 CDN 主机表的写锁，
//! 实现方不得在回调里再进入配置源

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::info;

/// CDN 集群级配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdnClusterConfig {
    /// 上传负载上限
    #[serde(default)]
    pub load_limit: u32,
    /// 网络拓扑提示
    #[serde(default)]
    pub net_topology: String,
}

/// 单个 CDN 种子节点记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdnSpec {
    /// 主机名
    pub hostname: String,
    /// IP 地址
    pub ip: String,
    /// RPC 端口
    pub port: i32,
    /// 下载端口
    pub download_port: i32,
    /// 安全组
    #[serde(default)]
    pub security_group: String,
    /// 机房
    #[serde(default)]
    pub idc: String,
    /// 地理位置
    #[serde(default)]
    pub location: String,
    /// 集群级配置（可选）
    #[serde(default)]
    pub cluster: Option<CdnClusterConfig>,
}

/// 动态配置数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynconfigData {
    /// 当前 CDN 种子节点列表
    #[serde(default)]
    pub cdns: Vec<CdnSpec>,
}

/// 动态配置订阅者
pub trait Observer: Send + Sync {
    /// 配置更新通知，可重入安全
    fn on_notify(&self, data: &DynconfigData);
}

/// 动态配置源
pub trait Dynconfig: Send + Sync {
    /// 读取当前配置
    fn get(&self) -> DynconfigData;

    /// 注册订阅者
    fn register(&self, observer: Arc<dyn Observer>);
}

/// 进程内动态配置源
///
/// 生产部署由配置中心客户端驱动 refresh；
/// 单机部署直接用配置文件里的静态 CDN 列表初始化
pub struct LocalDynconfig {
    /// 当前配置
    data: RwLock<DynconfigData>,
    /// 订阅者列表
    observers: RwLock<Vec<Arc<dyn Observer>>>,
}

impl LocalDynconfig {
    /// 用初始 CDN 列表创建配置源
    pub fn new(data: DynconfigData) -> Self {
        Self {
            data: RwLock::new(data),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// 替换配置并通知所有订阅者
    pub fn refresh(&self, data: DynconfigData) {
        {
            *self.data.write().unwrap() = data.clone();
        }

        let observers = self.observers.read().unwrap().clone();
        info!(cdns = data.cdns.len(), observers = observers.len(), "动态配置已刷新");
        for observer in observers {
            observer.on_notify(&data);
        }
    }
}

impl Dynconfig for LocalDynconfig {
    fn get(&self) -> DynconfigData {
        self.data.read().unwrap().clone()
    }

    fn register(&self, observer: Arc<dyn Observer>) {
        self.observers.write().unwrap().push(observer);
    }
}
