//! CDN 主机 ID 生成
//!
//! 同一台种子节点在每次动态配置刷新后必须得到相同的 ID，
//! 否则 peer 初始化时会查不到已注册的主机

use uuid::Uuid;

/// 根据 (主机名, RPC 端口) 派生稳定的 CDN 主机 UUID
pub fn cdn_host_id(hostname: &str, port: i32) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}-{}", hostname, port).as_bytes(),
    )
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cdn_host_id_deterministic() {
        let a = cdn_host_id("cdn-0.example.com", 8003);
        let b = cdn_host_id("cdn-0.example.com", 8003);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cdn_host_id_distinguishes_host_and_port() {
        let a = cdn_host_id("cdn-0.example.com", 8003);
        let b = cdn_host_id("cdn-0.example.com", 8004);
        let c = cdn_host_id("cdn-1.example.com", 8003);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_cdn_host_id_is_uuid() {
        let id = cdn_host_id("cdn-0.example.com", 8003);
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
