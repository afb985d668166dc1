//! 平台驱动接口
//!
//! 协议引擎只产生意图；真正的 BLE 与 WiFi P2P 操作由这些接口的实现完成。
//! Linux 上可以用 BlueZ / NetworkManager 实现，测试与演示使用 [`crate::loopback`]。

use async_trait::async_trait;
use mta_core::P2pInfo;
use rand::Rng;

use crate::error::Result;

/// 发送端的 BLE 中心角色：读 STATUS 特征、写 P2P 特征
///
/// 扫描 [`ADV_SERVICE_UUID`] 广播，在 [`MAIN_SERVICE_UUID`] 下读
/// [`STATUS_CHAR_UUID`]，写 [`P2P_CHAR_UUID`]。
///
/// [`ADV_SERVICE_UUID`]: mta_core::codec::ADV_SERVICE_UUID
/// [`MAIN_SERVICE_UUID`]: mta_core::codec::MAIN_SERVICE_UUID
/// [`STATUS_CHAR_UUID`]: mta_core::codec::STATUS_CHAR_UUID
/// [`P2P_CHAR_UUID`]: mta_core::codec::P2P_CHAR_UUID
#[async_trait]
pub trait RadioCentral: Send + Sync {
    async fn read_device_info(&self) -> Result<Vec<u8>>;

    async fn write_credentials(&self, data: &[u8]) -> Result<()>;
}

/// 接收端的 BLE 外设角色：发布 STATUS 特征、等待 P2P 特征被写入
///
/// 特征 UUID 与 [`RadioCentral`] 相同。
#[async_trait]
pub trait RadioPeripheral: Send + Sync {
    async fn publish_device_info(&self, data: Vec<u8>) -> Result<()>;

    async fn await_credentials(&self) -> Result<Vec<u8>>;
}

/// 发送端：建立 P2P 组（热点）
#[async_trait]
pub trait NetworkHost: Send + Sync {
    /// 为指定服务端口建立网络，返回要交给接收端的凭据
    async fn create_group(&self, port: u16) -> Result<P2pInfo>;

    async fn remove_group(&self) -> Result<()>;
}

/// 接收端：加入发送端的网络
#[async_trait]
pub trait NetworkJoiner: Send + Sync {
    /// 返回发送端在该网络中的地址
    async fn join(&self, credentials: &P2pInfo) -> Result<String>;

    async fn leave(&self) -> Result<()>;
}

/// 生成随机 SSID (`DIRECT-` + 8 位) 和 PSK (8 位)，字符集 [0-9a-z]
pub fn generate_credentials() -> (String, String) {
    const CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let mut random = |len: usize| -> String {
        (0..len)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect()
    };

    let ssid = format!("DIRECT-{}", random(8));
    let psk = random(8);
    (ssid, psk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_credentials() {
        let (ssid, psk) = generate_credentials();

        assert!(ssid.starts_with("DIRECT-"));
        assert_eq!(ssid.len(), 15);
        assert_eq!(psk.len(), 8);
        assert!(
            psk.chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
        );
    }
}
