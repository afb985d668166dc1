//! 引擎配置
//!
//! 设备名称、厂商 ID、协议版本范围等设置。配置可以从 TOML 文件读取，
//! 但引擎从不写回磁盘。

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 当前实现支持的协议版本
pub const PROTOCOL_VERSION: u32 = 1;

/// 厂商 ID 枚举
///
/// 与 CatShare 兼容的厂商 ID 列表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BrandId {
    #[default]
    Unknown = 0,
    Oppo = 10,
    Realme = 11,
    Vivo = 20,
    Xiaomi = 30,
    OnePlus = 41,
    Meizu = 50,
    Samsung = 70,
    Lenovo = 100,
    // 自定义 ID 用于 Linux 设备
    Linux = 200,
}

impl BrandId {
    /// 获取厂商名称
    pub fn name(&self) -> &'static str {
        match self {
            BrandId::Unknown => "Unknown",
            BrandId::Oppo => "OPPO",
            BrandId::Realme => "realme",
            BrandId::Vivo => "vivo",
            BrandId::Xiaomi => "Xiaomi",
            BrandId::OnePlus => "OnePlus",
            BrandId::Meizu => "Meizu",
            BrandId::Samsung => "Samsung",
            BrandId::Lenovo => "Lenovo",
            BrandId::Linux => "Linux",
        }
    }

    /// 从 ID 值创建（厂商通常占用一段 ID）
    pub fn from_id(id: u8) -> Self {
        match id {
            10 => BrandId::Oppo,
            11 => BrandId::Realme,
            20..=29 => BrandId::Vivo,
            30..=39 => BrandId::Xiaomi,
            41..=45 => BrandId::OnePlus,
            50..=59 => BrandId::Meizu,
            70..=75 => BrandId::Samsung,
            100..=109 => BrandId::Lenovo,
            200 => BrandId::Linux,
            _ => BrandId::Unknown,
        }
    }

    /// 获取 ID 值
    pub fn id(&self) -> u8 {
        *self as u8
    }
}

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 设备名称（接收端通过 DeviceInfo 发布，发送端写入 sendRequest）
    pub device_name: String,
    /// 厂商 ID
    pub brand_id: BrandId,
    /// 本机 WiFi MAC 地址
    pub mac_address: String,
    /// 支持的最低协议版本
    pub min_version: u32,
    /// 支持的最高协议版本
    pub max_version: u32,
    /// 是否支持会话加密
    pub encryption: bool,
    /// 是否支持 5GHz WiFi
    pub supports_5ghz: bool,
    /// 是否自动接受传输
    pub auto_accept: bool,
    /// 接收端建议的并发下载线程数
    pub thread_limit: u32,
    /// 任务进入终态后保留的秒数
    pub task_grace_secs: u64,
    /// 未完成任务的最长存活秒数
    pub session_lifetime_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_name: get_default_device_name(),
            brand_id: BrandId::Linux,
            mac_address: "02:00:00:00:00:00".to_string(),
            min_version: PROTOCOL_VERSION,
            max_version: PROTOCOL_VERSION,
            encryption: true,
            supports_5ghz: true,
            auto_accept: true,
            thread_limit: 5,
            task_grace_secs: 30,
            session_lifetime_secs: 600,
        }
    }
}

impl EngineConfig {
    /// 从 TOML 文本解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载（只读，不会写回）
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!("Loaded engine config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_version == 0 {
            return Err(ConfigError::Invalid("min_version must be at least 1".into()));
        }
        if self.min_version > self.max_version {
            return Err(ConfigError::Invalid(format!(
                "min_version {} is greater than max_version {}",
                self.min_version, self.max_version
            )));
        }
        Ok(())
    }

    pub fn supports_version(&self, version: u32) -> bool {
        (self.min_version..=self.max_version).contains(&version)
    }

    pub fn task_grace(&self) -> Duration {
        Duration::from_secs(self.task_grace_secs)
    }

    pub fn session_lifetime(&self) -> Duration {
        Duration::from_secs(self.session_lifetime_secs)
    }
}

/// 获取默认设备名称（主机名）
fn get_default_device_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "MTA Device".to_string())
}
