//! 进程内的驱动实现
//!
//! 发送端与接收端共享同一个 [`LoopbackRadio`] / [`LoopbackNetwork`]，
//! 网络"加入"后对端地址固定为 127.0.0.1。用于演示与测试。

use async_trait::async_trait;
use log::{debug, info};
use mta_core::P2pInfo;
use mta_core::codec::{ADV_SERVICE_UUID, MAIN_SERVICE_UUID, P2P_CHAR_UUID, STATUS_CHAR_UUID};
use tokio::sync::{Mutex, mpsc, watch};
use uuid::Uuid;

use crate::drivers::{
    NetworkHost, NetworkJoiner, RadioCentral, RadioPeripheral, generate_credentials,
};
use crate::error::{Result, TransportError};

const LOOPBACK_HOST: &str = "127.0.0.1";

/// 模拟的 GATT 服务：一个可读的 STATUS 特征 + 一个可写的 P2P 特征
pub struct LoopbackRadio {
    status: watch::Sender<Option<Vec<u8>>>,
    p2p_tx: mpsc::Sender<Vec<u8>>,
    p2p_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl LoopbackRadio {
    pub fn new() -> Self {
        let (status, _) = watch::channel(None);
        let (p2p_tx, p2p_rx) = mpsc::channel(4);
        Self {
            status,
            p2p_tx,
            p2p_rx: Mutex::new(p2p_rx),
        }
    }

    /// 按 UUID 读特征的当前值。P2P 特征只可写，读取得到 `None`
    pub fn read_characteristic(&self, uuid: Uuid) -> Option<Vec<u8>> {
        if uuid == STATUS_CHAR_UUID {
            self.status.borrow().clone()
        } else {
            None
        }
    }
}

impl Default for LoopbackRadio {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RadioCentral for LoopbackRadio {
    /// 等到接收端发布了 DeviceInfo 为止
    async fn read_device_info(&self) -> Result<Vec<u8>> {
        let mut rx = self.status.subscribe();
        rx.wait_for(Option::is_some)
            .await
            .map_err(|_| TransportError::Radio("status characteristic gone".into()))?;
        self.read_characteristic(STATUS_CHAR_UUID)
            .ok_or_else(|| TransportError::Radio("Unknown device".into()))
    }

    async fn write_credentials(&self, data: &[u8]) -> Result<()> {
        debug!("Loopback write {} ({} bytes)", P2P_CHAR_UUID, data.len());
        self.p2p_tx
            .send(data.to_vec())
            .await
            .map_err(|_| TransportError::Radio("P2P characteristic gone".into()))
    }
}

#[async_trait]
impl RadioPeripheral for LoopbackRadio {
    async fn publish_device_info(&self, data: Vec<u8>) -> Result<()> {
        debug!(
            "Loopback advertising {}, service {}: {} set ({} bytes)",
            ADV_SERVICE_UUID,
            MAIN_SERVICE_UUID,
            STATUS_CHAR_UUID,
            data.len()
        );
        self.status.send_replace(Some(data));
        Ok(())
    }

    async fn await_credentials(&self) -> Result<Vec<u8>> {
        self.p2p_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::ChannelClosed)
    }
}

/// 模拟的 WiFi P2P 组
pub struct LoopbackNetwork {
    mac: String,
    group: Mutex<Option<P2pInfo>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self {
            mac: "02:00:00:00:00:01".to_string(),
            group: Mutex::new(None),
        }
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkHost for LoopbackNetwork {
    async fn create_group(&self, port: u16) -> Result<P2pInfo> {
        let (ssid, psk) = generate_credentials();
        let info = P2pInfo::new(ssid, psk, self.mac.clone(), i32::from(port));
        info!("Loopback group '{}' created for port {}", info.ssid, port);
        *self.group.lock().await = Some(info.clone());
        Ok(info)
    }

    async fn remove_group(&self) -> Result<()> {
        self.group.lock().await.take();
        Ok(())
    }
}

#[async_trait]
impl NetworkJoiner for LoopbackNetwork {
    async fn join(&self, credentials: &P2pInfo) -> Result<String> {
        let group = self.group.lock().await;
        match group.as_ref() {
            Some(active) if active.ssid == credentials.ssid && active.psk == credentials.psk => {
                info!("Joined loopback group '{}'", active.ssid);
                Ok(LOOPBACK_HOST.to_string())
            }
            Some(_) => Err(TransportError::Network(format!(
                "authentication rejected for '{}'",
                credentials.ssid
            ))),
            None => Err(TransportError::Network(format!(
                "no group named '{}'",
                credentials.ssid
            ))),
        }
    }

    async fn leave(&self) -> Result<()> {
        Ok(())
    }
}
