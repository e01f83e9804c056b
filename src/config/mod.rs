//! 配置管理模块
//!
//! YAML 配置，缺省字段取默认值，时长字段支持 "6s" / "2m" / "30m" 写法。
//! 校验不短路，一次返回所有问题，方便配置界面整体展示

use crate::dynconfig::CdnSpec;
use crate::error::SchedulerError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 默认首次 GC 延迟
pub const DEFAULT_GC_INITIAL_DELAY: Duration = Duration::from_secs(6);

/// 默认 GC 执行间隔
pub const DEFAULT_GC_META_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// 默认空闲过期窗口
pub const DEFAULT_EXPIRE_TIME: Duration = Duration::from_secs(30 * 60);

/// 默认源站访问失败后的冷却时间
pub const DEFAULT_FAIL_ACCESS_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// 应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// 任务生命周期配置
    #[serde(default)]
    pub task: TaskConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
    /// 静态 CDN 种子节点列表（未接配置中心时使用）
    #[serde(default)]
    pub cdns: Vec<CdnSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            task: TaskConfig::default(),
            log: LogConfig::default(),
            cdns: Vec::new(),
        }
    }
}

/// 任务生命周期配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskConfig {
    /// 启动到第一次 GC 执行的延迟
    #[serde(with = "humantime_serde")]
    pub gc_initial_delay: Duration,
    /// GC 元数据清理的执行间隔
    #[serde(with = "humantime_serde")]
    pub gc_meta_interval: Duration,
    /// 实体空闲超过该时长视为过期
    #[serde(rename = "taskExpireTime", with = "humantime_serde")]
    pub expire_time: Duration,
    /// 源站访问失败后的冷却时间，冷却结束前不重新触发
    #[serde(with = "humantime_serde")]
    pub fail_access_interval: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            gc_initial_delay: DEFAULT_GC_INITIAL_DELAY,
            gc_meta_interval: DEFAULT_GC_META_INTERVAL,
            expire_time: DEFAULT_EXPIRE_TIME,
            fail_access_interval: DEFAULT_FAIL_ACCESS_INTERVAL,
        }
    }
}

impl TaskConfig {
    /// 把显式写成 0 的时长回填为默认值，幂等
    pub fn apply_defaults(mut self) -> Self {
        if self.gc_initial_delay.is_zero() {
            self.gc_initial_delay = DEFAULT_GC_INITIAL_DELAY;
        }
        if self.gc_meta_interval.is_zero() {
            self.gc_meta_interval = DEFAULT_GC_META_INTERVAL;
        }
        if self.expire_time.is_zero() {
            self.expire_time = DEFAULT_EXPIRE_TIME;
        }
        if self.fail_access_interval.is_zero() {
            self.fail_access_interval = DEFAULT_FAIL_ACCESS_INTERVAL;
        }
        self
    }

    /// 校验配置，不短路，返回所有问题
    ///
    /// gcInitialDelay 允许为 0（类型本身排除负值），其余三项必须大于 0
    pub fn validate(&self) -> Vec<SchedulerError> {
        let mut errors = Vec::new();
        if self.gc_meta_interval.is_zero() {
            errors.push(SchedulerError::ConfigInvalid(format!(
                "gcMetaInterval must be greater than 0, but is: {:?}",
                self.gc_meta_interval
            )));
        }
        if self.expire_time.is_zero() {
            errors.push(SchedulerError::ConfigInvalid(format!(
                "taskExpireTime must be greater than 0, but is: {:?}",
                self.expire_time
            )));
        }
        if self.fail_access_interval.is_zero() {
            errors.push(SchedulerError::ConfigInvalid(format!(
                "failAccessInterval must be greater than 0, but is: {:?}",
                self.fail_access_interval
            )));
        }
        errors
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 是否写日志文件（控制台输出始终开启）
    pub enabled: bool,
    /// 日志目录
    pub log_dir: PathBuf,
    /// 日志级别
    pub level: String,
    /// 日志保留天数
    pub retention_days: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: PathBuf::from("logs"),
            level: "info".to_string(),
            retention_days: 7,
        }
    }
}

impl AppConfig {
    /// 校验整体配置
    pub fn validate(&self) -> Vec<SchedulerError> {
        self.task.validate()
    }

    /// 从文件加载配置
    ///
    /// 缺省字段取默认值；显式写出的 0 交给 validate 拒绝；
    /// 校验失败时汇总所有问题一次报出
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;

        let errors = config.validate();
        if !errors.is_empty() {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::bail!("配置校验失败: {}", messages.join("; "));
        }

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载配置，失败时退回默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {}", e);
                Self::default()
            }
        }
    }
}
