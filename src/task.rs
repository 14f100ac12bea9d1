// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 任务定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 任务状态机：`Scheduled -> Running -> {Succeeded, Failed, Cancelled}`，
//! 或在开始前被取消直接进入 `Cancelled`。终止状态不再变化。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, info};

use crate::client::ClientError;
use crate::model::{SamType, SamWeights};
use crate::output::{Decorations, OutputPolicy};
use crate::prompt::PromptError;
use crate::raster::RasterError;
use crate::region::RegionError;
use crate::response::ResponseError;
use crate::scene::Annotation;
use crate::scheduler::{Broadcaster, SchedulerEvent};

mod automask;
mod detection;
mod sequence;
mod text;
mod weights;

pub use self::automask::AutoMaskTask;
pub use self::detection::DetectionTask;
pub use self::sequence::{SequenceInput, SequenceOutput, SequenceTask};
pub use self::text::TextPromptTask;
pub use self::weights::{CancelDownloadTask, DownloadProgressTask, FetchWeightsTask, RegisterWeightsTask};

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
  Scheduled,
  Running,
  Succeeded,
  Failed,
  Cancelled,
}

impl TaskState {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
  Detection,
  AutoMask,
  TextPrompt,
  Sequence,
  FetchWeights,
  RegisterWeights,
  DownloadProgress,
  CancelDownload,
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("任务已取消")]
  Cancelled,
  #[error("输入错误: {0}")]
  Input(String),
  #[error("提示错误: {0}")]
  Prompt(#[from] PromptError),
  #[error("区域错误: {0}")]
  Region(#[from] RegionError),
  #[error("连接失败: {0}")]
  Client(#[from] ClientError),
  #[error("图像读取错误: {0}")]
  Raster(#[from] RasterError),
  #[error("响应解析错误: {0}")]
  Response(#[from] ResponseError),
}

impl TaskError {
  /// 服务端不可达或返回错误
  pub fn is_connection(&self) -> bool {
    matches!(self, TaskError::Client(_))
  }
}

/// 成功任务的结果，随 `TaskSucceeded` 事件广播
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
  Annotations(Vec<Annotation>),
  Weights(Vec<SamWeights>),
  Message(String),
  Done,
}

impl From<Vec<Annotation>> for TaskOutput {
  fn from(objects: Vec<Annotation>) -> Self {
    TaskOutput::Annotations(objects)
  }
}

impl From<Vec<SamWeights>> for TaskOutput {
  fn from(weights: Vec<SamWeights>) -> Self {
    TaskOutput::Weights(weights)
  }
}

impl From<String> for TaskOutput {
  fn from(message: String) -> Self {
    TaskOutput::Message(message)
  }
}

impl From<()> for TaskOutput {
  fn from(_: ()) -> Self {
    TaskOutput::Done
  }
}

/// 推理类任务共用的选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceOptions {
  pub model: SamType,
  pub checkpoint_url: Option<String>,
  pub output: OutputPolicy,
  pub decorations: Decorations,
}

pub trait Task: Sized + Send + 'static {
  type Output: Clone + Into<TaskOutput> + Send + 'static;

  fn kind(&self) -> TaskKind;
  fn run_task(self, ctx: &TaskContext) -> Result<Self::Output, TaskError>;
}

#[derive(Debug, Clone)]
pub struct TaskStatus {
  pub state: TaskState,
  pub progress: f64,
  pub message: Option<String>,
  pub error: Option<String>,
  pub submitted_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
}

pub(crate) struct TaskShared {
  id: TaskId,
  kind: TaskKind,
  cancelled: AtomicBool,
  status: Mutex<TaskStatus>,
  done: Condvar,
}

impl TaskShared {
  pub(crate) fn new(id: TaskId, kind: TaskKind) -> Arc<Self> {
    Arc::new(TaskShared {
      id,
      kind,
      cancelled: AtomicBool::new(false),
      status: Mutex::new(TaskStatus {
        state: TaskState::Scheduled,
        progress: 0.0,
        message: None,
        error: None,
        submitted_at: Utc::now(),
        finished_at: None,
      }),
      done: Condvar::new(),
    })
  }

  pub(crate) fn set_running(&self) {
    let mut status = self.status.lock();
    if status.state == TaskState::Scheduled {
      status.state = TaskState::Running;
    }
  }

  /// 进入终止状态；已经终止时不做任何改变
  pub(crate) fn finish(&self, state: TaskState, error: Option<String>) -> bool {
    let mut status = self.status.lock();
    if status.state.is_terminal() {
      return false;
    }
    status.state = state;
    status.error = error;
    status.finished_at = Some(Utc::now());
    if state == TaskState::Succeeded {
      status.progress = 1.0;
    }
    self.done.notify_all();
    true
  }
}

/// 对已提交任务的引用，可查询状态或请求取消
#[derive(Clone)]
pub struct TaskHandle {
  shared: Arc<TaskShared>,
}

impl std::fmt::Debug for TaskHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TaskHandle")
      .field("id", &self.shared.id)
      .field("kind", &self.shared.kind)
      .field("state", &self.state())
      .finish()
  }
}

impl TaskHandle {
  pub(crate) fn new(shared: Arc<TaskShared>) -> Self {
    TaskHandle { shared }
  }

  pub fn id(&self) -> TaskId {
    self.shared.id
  }

  pub fn kind(&self) -> TaskKind {
    self.shared.kind
  }

  pub fn state(&self) -> TaskState {
    self.shared.status.lock().state
  }

  pub fn status(&self) -> TaskStatus {
    self.shared.status.lock().clone()
  }

  pub fn progress(&self) -> f64 {
    self.shared.status.lock().progress
  }

  pub fn message(&self) -> Option<String> {
    self.shared.status.lock().message.clone()
  }

  pub fn error(&self) -> Option<String> {
    self.shared.status.lock().error.clone()
  }

  /// 请求协作式取消；运行中的任务在下一个检查点退出
  pub fn cancel(&self) {
    if !self.shared.cancelled.swap(true, Ordering::SeqCst) {
      info!("请求取消任务 {}", self.shared.id);
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.shared.cancelled.load(Ordering::SeqCst)
  }

  /// 阻塞直到任务终止
  pub fn wait(&self) -> TaskState {
    let mut status = self.shared.status.lock();
    while !status.state.is_terminal() {
      self.shared.done.wait(&mut status);
    }
    status.state
  }

  pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskState> {
    let mut status = self.shared.status.lock();
    if !status.state.is_terminal() {
      let _ = self.shared.done.wait_while_for(&mut status, |s| !s.state.is_terminal(), timeout);
    }
    status.state.is_terminal().then_some(status.state)
  }
}

/// 任务执行期间可见的上下文：取消检查与进度上报
pub struct TaskContext {
  shared: Arc<TaskShared>,
  events: Option<Arc<Broadcaster>>,
}

impl TaskContext {
  pub(crate) fn new(shared: Arc<TaskShared>, events: Option<Arc<Broadcaster>>) -> Self {
    TaskContext { shared, events }
  }

  /// 不经过调度器直接运行任务时使用
  pub fn detached(kind: TaskKind) -> Self {
    TaskContext::new(TaskShared::new(0, kind), None)
  }

  pub fn id(&self) -> TaskId {
    self.shared.id
  }

  pub fn handle(&self) -> TaskHandle {
    TaskHandle::new(self.shared.clone())
  }

  pub fn is_cancelled(&self) -> bool {
    self.shared.cancelled.load(Ordering::SeqCst)
  }

  pub fn check_cancelled(&self) -> Result<(), TaskError> {
    if self.is_cancelled() {
      debug!("任务 {} 在检查点发现取消请求", self.shared.id);
      Err(TaskError::Cancelled)
    } else {
      Ok(())
    }
  }

  pub fn set_progress(&self, progress: f64) {
    let progress = progress.clamp(0.0, 1.0);
    self.shared.status.lock().progress = progress;
    if let Some(events) = &self.events {
      events.send(SchedulerEvent::TaskProgress {
        id: self.shared.id,
        progress,
      });
    }
  }

  pub fn set_message(&self, message: impl Into<String>) {
    let message = message.into();
    info!("任务 {}: {}", self.shared.id, message);
    self.shared.status.lock().message = Some(message.clone());
    if let Some(events) = &self.events {
      events.send(SchedulerEvent::TaskMessage {
        id: self.shared.id,
        message,
      });
    }
  }
}

#[cfg(test)]
pub(crate) mod testing {
  //! 任务测试用的假服务

  use std::collections::VecDeque;
  use std::sync::Arc;

  use image::{Rgb, RgbImage};
  use parking_lot::Mutex;

  use crate::client::ClientError;
  use crate::geometry::Plane;
  use crate::model::{DetectionRequest, SamProgress, SamService, SamType, SamWeights};
  use crate::raster::ImageFileSource;

  type Hook = Box<dyn Fn(usize) + Send + Sync>;

  /// 依次返回预置响应，并记录收到的请求
  #[derive(Default)]
  pub struct MockService {
    pub responses: Mutex<VecDeque<Result<String, u16>>>,
    pub requests: Mutex<Vec<DetectionRequest>>,
    pub uploads: Mutex<Vec<(String, String, usize)>>,
    pub fail_upload_at: Option<usize>,
    pub on_detect: Option<Hook>,
  }

  impl MockService {
    pub fn with_responses(responses: Vec<Result<String, u16>>) -> Self {
      MockService {
        responses: Mutex::new(responses.into()),
        ..Default::default()
      }
    }
  }

  impl SamService for MockService {
    fn detect(&self, request: &DetectionRequest) -> Result<String, ClientError> {
      let count = {
        let mut requests = self.requests.lock();
        requests.push(request.clone());
        requests.len()
      };
      if let Some(hook) = &self.on_detect {
        hook(count);
      }
      match self.responses.lock().pop_front() {
        Some(Ok(body)) => Ok(body),
        Some(Err(status)) => Err(ClientError::Status {
          status,
          body: "error".into(),
        }),
        None => Ok(r#"{"type": "FeatureCollection", "features": []}"#.into()),
      }
    }

    fn upload_frame(&self, dirname: &str, filename: &str, jpeg: Vec<u8>) -> Result<String, ClientError> {
      let mut uploads = self.uploads.lock();
      if self.fail_upload_at == Some(uploads.len()) {
        return Err(ClientError::Status {
          status: 500,
          body: "upload failed".into(),
        });
      }
      uploads.push((dirname.to_string(), filename.to_string(), jpeg.len()));
      Ok("ok".into())
    }

    fn fetch_weights(&self, model: SamType) -> Result<Vec<SamWeights>, ClientError> {
      Ok(vec![SamWeights {
        model: model.model_name().into(),
        name: "default".into(),
        url: "https://example.org/w.pt".into(),
      }])
    }

    fn register_weights(&self, weights: &SamWeights) -> Result<String, ClientError> {
      Ok(format!("registered {}", weights.name))
    }

    fn progress(&self) -> Result<SamProgress, ClientError> {
      Ok(SamProgress {
        message: "downloading".into(),
        percent: 42.0,
      })
    }

    fn cancel_download(&self) -> Result<String, ClientError> {
      Ok("cancelled".into())
    }
  }

  pub fn raster(width: u32, height: u32, planes: i32) -> Arc<ImageFileSource> {
    let planes = (0..planes)
      .map(|z| (Plane::new(z, 0), RgbImage::from_pixel(width, height, Rgb([z as u8, 0, 0]))))
      .collect();
    Arc::new(ImageFileSource::from_planes("memory.png", planes).expect("raster"))
  }

  pub const PIXEL_AT_10: &str = r#"{"type": "FeatureCollection", "features": [
    {"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[10, 10], [11, 10], [11, 11], [10, 11], [10, 10]]]}, "properties": {"quality": 0.9}}
  ]}"#;

  /// 两个相互重叠、面积不同的要素
  pub const TWO_OVERLAPPING: &str = r#"{"type": "FeatureCollection", "features": [
    {"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [20, 0], [20, 20], [0, 20], [0, 0]]]}, "properties": {"quality": 0.8}},
    {"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[5, 5], [10, 5], [10, 10], [5, 10], [5, 5]]]}, "properties": {"quality": 0.7}}
  ]}"#;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn terminal_state_is_sticky() {
    let shared = TaskShared::new(1, TaskKind::Detection);
    shared.set_running();
    assert!(shared.finish(TaskState::Cancelled, None));
    assert!(!shared.finish(TaskState::Succeeded, None));
    let handle = TaskHandle::new(shared);
    assert_eq!(handle.wait(), TaskState::Cancelled);
  }

  #[test]
  fn cancelled_context_fails_checkpoint() {
    let ctx = TaskContext::detached(TaskKind::AutoMask);
    assert!(ctx.check_cancelled().is_ok());
    ctx.handle().cancel();
    assert!(matches!(ctx.check_cancelled(), Err(TaskError::Cancelled)));
  }

  #[test]
  fn progress_is_clamped() {
    let ctx = TaskContext::detached(TaskKind::Sequence);
    ctx.set_progress(1.7);
    assert_eq!(ctx.handle().progress(), 1.0);
  }
}
