//! 主机实体
//!
//! 一台机器上可以运行多个 peer，主机被所有 peer 共享，
//! 生命周期随最长的持有者。CDN 主机不参与 GC，跟随动态配置更新

use std::sync::atomic::AtomicI32;

/// 默认上传负载上限
pub const DEFAULT_UPLOAD_LOAD_LIMIT: i32 = 100;

/// 主机实体
#[derive(Debug)]
pub struct Host {
    /// 主机 UUID，由 (主机名, RPC 端口) 派生
    pub id: String,
    /// 主机 IP
    pub ip: String,
    /// 主机名
    pub hostname: String,
    /// RPC 端口
    pub rpc_port: i32,
    /// 下载端口
    pub download_port: i32,
    /// 安全域
    pub security_domain: String,
    /// 机房
    pub idc: String,
    /// 地理位置
    pub location: String,
    /// 网络拓扑提示
    pub net_topology: String,
    /// 是否为 CDN 种子主机
    pub is_cdn: bool,
    /// 上传负载上限
    pub upload_load_limit: AtomicI32,
}

impl Host {
    /// 创建普通主机
    pub fn new(id: String, ip: String, hostname: String, rpc_port: i32, download_port: i32) -> Self {
        Self {
            id,
            ip,
            hostname,
            rpc_port,
            download_port,
            security_domain: String::new(),
            idc: String::new(),
            location: String::new(),
            net_topology: String::new(),
            is_cdn: false,
            upload_load_limit: AtomicI32::new(DEFAULT_UPLOAD_LOAD_LIMIT),
        }
    }

    /// 标记为 CDN 种子主机
    pub fn with_is_cdn(mut self, is_cdn: bool) -> Self {
        self.is_cdn = is_cdn;
        self
    }

    /// 设置上传负载上限
    pub fn with_upload_load_limit(self, limit: i32) -> Self {
        self.upload_load_limit
            .store(limit, std::sync::atomic::Ordering::SeqCst);
        self
    }

    /// 设置安全域
    pub fn with_security_domain(mut self, security_domain: String) -> Self {
        self.security_domain = security_domain;
        self
    }

    /// 设置机房
    pub fn with_idc(mut self, idc: String) -> Self {
        self.idc = idc;
        self
    }

    /// 设置地理位置
    pub fn with_location(mut self, location: String) -> Self {
        self.location = location;
        self
    }

    /// 设置网络拓扑提示
    pub fn with_net_topology(mut self, net_topology: String) -> Self {
        self.net_topology = net_topology;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_new_host_defaults() {
        let host = Host::new(
            "host-1".to_string(),
            "10.0.0.1".to_string(),
            "node-1".to_string(),
            8003,
            8001,
        );

        assert!(!host.is_cdn);
        assert_eq!(
            host.upload_load_limit.load(Ordering::SeqCst),
            DEFAULT_UPLOAD_LOAD_LIMIT
        );
        assert!(host.idc.is_empty());
    }

    #[test]
    fn test_cdn_host_options() {
        let host = Host::new(
            "host-1".to_string(),
            "10.0.0.1".to_string(),
            "cdn-0".to_string(),
            8003,
            8001,
        )
        .with_is_cdn(true)
        .with_upload_load_limit(300)
        .with_idc("hz".to_string())
        .with_location("cn-east".to_string())
        .with_security_domain("prod".to_string())
        .with_net_topology("switch-3".to_string());

        assert!(host.is_cdn);
        assert_eq!(host.upload_load_limit.load(Ordering::SeqCst), 300);
        assert_eq!(host.idc, "hz");
        assert_eq!(host.location, "cn-east");
        assert_eq!(host.security_domain, "prod");
        assert_eq!(host.net_topology, "switch-3");
    }
}
