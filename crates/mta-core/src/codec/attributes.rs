//! BLE GATT 特征载荷
//!
//! - STATUS 特征 (读): 接收端的 [`DeviceInfo`]
//! - P2P 特征 (写): 发送端的 [`P2pInfo`]
//!
//! 两者都是 camelCase JSON，字段必须与 CatShare 保持一致。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DecodeError;

pub const ADV_SERVICE_UUID: Uuid = Uuid::from_u128(0x00003331_0000_1000_8000_008123456789);
pub const MAIN_SERVICE_UUID: Uuid = Uuid::from_u128(0x00009955_0000_1000_8000_00805f9b34fb);
pub const STATUS_CHAR_UUID: Uuid = Uuid::from_u128(0x00009954_0000_1000_8000_00805f9b34fb);
pub const P2P_CHAR_UUID: Uuid = Uuid::from_u128(0x00009953_0000_1000_8000_00805f9b34fb);

/// 能力位：支持会话加密
pub const CAP_ENCRYPTION: u32 = 0x01;
/// 能力位：支持 5GHz
pub const CAP_5GHZ: u32 = 0x02;

/// DeviceInfo - 与 CatShare 的 DeviceInfo 兼容
/// CatShare: data class DeviceInfo(val state: Int, val key: String?, val mac: String, val catShare: Int? = null)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub state: i32,
    /// 凭据加密用的公钥 (Base64 SPKI)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key: Option<String>,
    pub mac: String,
    /// 支持的最高协议版本
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cat_share: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub brand: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub min_version: Option<u32>,
    #[serde(default)]
    pub capabilities: u32,
}

impl DeviceInfo {
    pub fn new(mac: String, public_key: Option<String>) -> Self {
        Self {
            state: 0,
            key: public_key,
            mac,
            cat_share: Some(1),
            name: None,
            brand: None,
            min_version: None,
            capabilities: 0,
        }
    }

    pub fn supports_encryption(&self) -> bool {
        self.capabilities & CAP_ENCRYPTION != 0
    }

    pub fn supports_5ghz(&self) -> bool {
        self.capabilities & CAP_5GHZ != 0
    }
}

/// P2pInfo - 与 CatShare 的 P2pInfo 字段完全一致
/// CatShare: data class P2pInfo(
///     val id: String?,
///     val ssid: String,
///     val psk: String,
///     val mac: String,
///     val port: Int,
///     val key: String? = null,
///     val catShare: Int? = null,
/// )
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct P2pInfo {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    pub ssid: String,
    pub psk: String,
    pub mac: String,
    pub port: i32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cat_share: Option<i32>,
}

impl P2pInfo {
    pub fn new(ssid: String, psk: String, mac: String, port: i32) -> Self {
        Self {
            id: None,
            ssid,
            psk,
            mac,
            port,
            key: None,
            cat_share: Some(1),
        }
    }

    /// Create encrypted P2pInfo with sender's public key
    pub fn with_encryption(
        id: String,
        ssid_encrypted: String,
        psk_encrypted: String,
        mac_encrypted: String,
        port: i32,
        sender_public_key: String,
    ) -> Self {
        Self {
            id: Some(id),
            ssid: ssid_encrypted,
            psk: psk_encrypted,
            mac: mac_encrypted,
            port,
            key: Some(sender_public_key),
            cat_share: Some(1),
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.key.is_some()
    }

    /// 端口转换为 u16；越界时返回 None
    pub fn port(&self) -> Option<u16> {
        u16::try_from(self.port).ok().filter(|p| *p != 0)
    }
}

pub fn encode_device_info(info: &DeviceInfo) -> Vec<u8> {
    // 结构体只含字符串与整数，序列化不会失败
    serde_json::to_vec(info).unwrap_or_default()
}

pub fn decode_device_info(data: &[u8]) -> Result<DeviceInfo, DecodeError> {
    serde_json::from_slice(data)
        .map_err(|e| DecodeError::MalformedMessage(format!("invalid DeviceInfo: {e}")))
}

pub fn encode_p2p_info(info: &P2pInfo) -> Vec<u8> {
    serde_json::to_vec(info).unwrap_or_default()
}

pub fn decode_p2p_info(data: &[u8]) -> Result<P2pInfo, DecodeError> {
    serde_json::from_slice(data)
        .map_err(|e| DecodeError::MalformedMessage(format!("invalid P2pInfo: {e}")))
}
