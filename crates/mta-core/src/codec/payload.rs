//! 握手载荷：版本协商、发送请求、传输状态

use serde::{Deserialize, Serialize};

/// 版本协商载荷（action 与 ack 共用）
///
/// `version` / `versions` 是 CatShare 原有字段，其余字段在其基础上扩展。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionOffer {
    /// action 中为发起方最高版本；ack 中为接收端选定的版本
    pub version: u32,
    #[serde(default)]
    pub versions: Vec<u32>,
    #[serde(default)]
    pub min_version: Option<u32>,
    #[serde(default)]
    pub max_version: Option<u32>,
    #[serde(default)]
    pub supports_encryption: bool,
    /// Base64 编码的临时公钥 (SEC1 uncompressed)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ephemeral_public_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub thread_limit: Option<u32>,
}

impl VersionOffer {
    pub fn new(version: u32, min_version: u32, max_version: u32) -> Self {
        Self {
            version,
            versions: (min_version..=max_version).collect(),
            min_version: Some(min_version),
            max_version: Some(max_version),
            supports_encryption: false,
            ephemeral_public_value: None,
            thread_limit: None,
        }
    }

    /// 对端声明的版本范围（旧实现只带 `version` 字段）
    pub fn range(&self) -> (u32, u32) {
        let min = self
            .min_version
            .or_else(|| self.versions.iter().copied().min())
            .unwrap_or(self.version);
        let max = self
            .max_version
            .or_else(|| self.versions.iter().copied().max())
            .unwrap_or(self.version);
        (min, max)
    }
}

/// 文件清单条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub name: String,
    pub size: u64,
}

/// 发送请求载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    /// 任务 ID (某些版本可能使用 id 代替 taskId)
    #[serde(default)]
    pub task_id: Option<String>,
    /// 任务 ID 的别名
    #[serde(default)]
    pub id: Option<String>,
    /// 发送者 ID (可选)
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default = "default_sender_name")]
    pub sender_name: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub file_count: u32,
    #[serde(default)]
    pub total_size: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cat_share_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub files: Vec<FileSummary>,
}

fn default_sender_name() -> String {
    "Unknown".to_string()
}

fn default_mime_type() -> String {
    "*/*".to_string()
}

impl SendRequest {
    /// 获取任务 ID，优先使用 task_id，否则使用 id
    pub fn task_id(&self) -> Option<&str> {
        self.task_id
            .as_deref()
            .or(self.id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// 是否为纯文本分享
    pub fn is_text(&self) -> bool {
        self.cat_share_text.is_some()
    }
}

/// 传输结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Ok,
    Error,
    /// 用户拒绝
    Refused,
}

impl StatusOutcome {
    pub fn code(self) -> i32 {
        match self {
            StatusOutcome::Ok => 1,
            StatusOutcome::Error => 2,
            StatusOutcome::Refused => 3,
        }
    }

    /// 未知类型按错误处理
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => StatusOutcome::Ok,
            3 => StatusOutcome::Refused,
            _ => StatusOutcome::Error,
        }
    }
}

/// 状态载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub status_type: i32,
    #[serde(default)]
    pub reason: String,
}

impl StatusReport {
    pub fn new(task_id: &str, outcome: StatusOutcome, reason: &str) -> Self {
        Self {
            task_id: Some(task_id.to_string()),
            id: Some(task_id.to_string()),
            status_type: outcome.code(),
            reason: reason.to_string(),
        }
    }

    pub fn outcome(&self) -> StatusOutcome {
        StatusOutcome::from_code(self.status_type)
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref().or(self.id.as_deref())
    }
}
