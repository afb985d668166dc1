//! 传输任务登记表
//!
//! 发送端会话与下载服务共享同一个登记表：会话负责登记、推进状态，
//! 下载服务通过 [`TaskRegistry::authorize_serve`] 取得文件清单。
//! 所有修改都在同一把锁内完成，同一任务最多被授权下载一次。

use log::{debug, info};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub type TaskId = String;

/// 文件内容来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentRef {
    Path(PathBuf),
    Inline(Vec<u8>),
}

/// 待发送文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub content: ContentRef,
}

impl FileDescriptor {
    pub fn inline(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: data.len() as u64,
            mime_type: mime_type.into(),
            content: ContentRef::Inline(data),
        }
    }

    pub fn from_path(
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
        path: PathBuf,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            content: ContentRef::Path(path),
        }
    }
}

/// 一次发送任务：若干文件，或一段文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub id: TaskId,
    pub files: Vec<FileDescriptor>,
    pub text: Option<String>,
}

impl TransferTask {
    pub fn new(files: Vec<FileDescriptor>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), files)
    }

    pub fn with_id(id: impl Into<TaskId>, files: Vec<FileDescriptor>) -> Self {
        Self {
            id: id.into(),
            files,
            text: None,
        }
    }

    /// 纯文本分享
    pub fn text(text: impl Into<String>) -> Self {
        let mut task = Self::new(Vec::new());
        task.text = Some(text.into());
        task
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Offered,
    Requested,
    Serving,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// 任务终态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
}

impl From<TaskOutcome> for TaskState {
    fn from(outcome: TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Completed => TaskState::Completed,
            TaskOutcome::Failed => TaskState::Failed,
        }
    }
}

/// 下载授权：任务 ID 与文件清单
#[derive(Debug, Clone)]
pub struct ServeGrant {
    pub task_id: TaskId,
    pub files: Vec<FileDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {0} is already being served")]
    AlreadyServing(TaskId),

    #[error("task {0} has not been requested yet")]
    NotRequested(TaskId),

    #[error("task {0} has already finished")]
    Terminal(TaskId),

    #[error("task {0} is already registered")]
    Duplicate(TaskId),
}

struct Entry {
    task: TransferTask,
    state: TaskState,
    created: Instant,
    finished: Option<Instant>,
}

pub struct TaskRegistry {
    entries: Mutex<HashMap<TaskId, Entry>>,
    grace: Duration,
    lifetime: Duration,
}

impl TaskRegistry {
    /// `grace`: 终态任务保留多久；`lifetime`: 未完成任务最长存活多久
    pub fn new(grace: Duration, lifetime: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            grace,
            lifetime,
        }
    }

    // 持锁期间不会 panic，中毒时直接取回数据
    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, task: TransferTask) -> Result<TaskId, RegistryError> {
        let mut entries = self.lock();
        let id = task.id.clone();
        if entries.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        entries.insert(
            id.clone(),
            Entry {
                task,
                state: TaskState::Offered,
                created: Instant::now(),
                finished: None,
            },
        );
        debug!("Task {} registered", id);
        Ok(id)
    }

    /// 对端确认了 sendRequest
    pub fn mark_requested(&self, id: &str) -> Result<(), RegistryError> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        match entry.state {
            TaskState::Offered | TaskState::Requested => {
                entry.state = TaskState::Requested;
                Ok(())
            }
            TaskState::Serving => Err(RegistryError::AlreadyServing(id.to_string())),
            TaskState::Completed | TaskState::Failed => {
                Err(RegistryError::Terminal(id.to_string()))
            }
        }
    }

    /// 下载服务调用：检查并切换到 Serving，返回文件清单
    pub fn authorize_serve(&self, id: &str) -> Result<ServeGrant, RegistryError> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        match entry.state {
            TaskState::Requested => {
                entry.state = TaskState::Serving;
                info!("Task {} authorized for download", id);
                Ok(ServeGrant {
                    task_id: entry.task.id.clone(),
                    files: entry.task.files.clone(),
                })
            }
            TaskState::Offered => Err(RegistryError::NotRequested(id.to_string())),
            TaskState::Serving => Err(RegistryError::AlreadyServing(id.to_string())),
            TaskState::Completed | TaskState::Failed => {
                Err(RegistryError::Terminal(id.to_string()))
            }
        }
    }

    /// 标记终态；已是终态的任务保持原状
    pub fn mark_terminal(&self, id: &str, outcome: TaskOutcome) -> Result<(), RegistryError> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if !entry.state.is_terminal() {
            entry.state = outcome.into();
            entry.finished = Some(Instant::now());
            debug!("Task {} finished: {:?}", id, outcome);
        }
        Ok(())
    }

    /// 立即移除
    pub fn evict(&self, id: &str) -> Option<TransferTask> {
        self.lock().remove(id).map(|entry| entry.task)
    }

    pub fn state(&self, id: &str) -> Option<TaskState> {
        self.lock().get(id).map(|entry| entry.state)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn sweep(&self) -> Vec<(TaskId, TaskOutcome)> {
        self.sweep_at(Instant::now())
    }

    /// 清理过期任务，返回被移除的任务及其结果；
    /// 超过存活期仍未完成的任务按 `Failed` 上报
    pub fn sweep_at(&self, now: Instant) -> Vec<(TaskId, TaskOutcome)> {
        let mut entries = self.lock();
        let mut removed = Vec::new();

        entries.retain(|id, entry| {
            let outcome = match (entry.state, entry.finished) {
                (TaskState::Completed, Some(at)) if now.duration_since(at) >= self.grace => {
                    Some(TaskOutcome::Completed)
                }
                (TaskState::Failed, Some(at)) if now.duration_since(at) >= self.grace => {
                    Some(TaskOutcome::Failed)
                }
                (state, _)
                    if !state.is_terminal()
                        && now.duration_since(entry.created) >= self.lifetime =>
                {
                    Some(TaskOutcome::Failed)
                }
                _ => None,
            };
            match outcome {
                Some(outcome) => {
                    removed.push((id.clone(), outcome));
                    false
                }
                None => true,
            }
        });

        if !removed.is_empty() {
            debug!("Swept {} task(s)", removed.len());
        }
        removed
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(600))
    }
}
