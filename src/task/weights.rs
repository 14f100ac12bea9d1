// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task/weights.rs - 模型权重管理任务
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

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::model::{SamService, SamType, SamWeights};
use crate::task::{Task, TaskContext, TaskError, TaskKind};

pub struct FetchWeightsTask {
  pub service: Arc<dyn SamService>,
  pub model: SamType,
}

impl Task for FetchWeightsTask {
  type Output = Vec<SamWeights>;

  fn kind(&self) -> TaskKind {
    TaskKind::FetchWeights
  }

  fn run_task(self, ctx: &TaskContext) -> Result<Self::Output, TaskError> {
    let weights = self.service.fetch_weights(self.model)?;
    ctx.check_cancelled()?;
    info!("{} 可用权重 {} 个", self.model, weights.len());
    Ok(weights)
  }
}

/// 服务端按 `url` 下载并登记权重；下载进度由 [`DownloadProgressTask`] 观察
pub struct RegisterWeightsTask {
  pub service: Arc<dyn SamService>,
  pub weights: SamWeights,
}

impl Task for RegisterWeightsTask {
  type Output = String;

  fn kind(&self) -> TaskKind {
    TaskKind::RegisterWeights
  }

  fn run_task(self, ctx: &TaskContext) -> Result<Self::Output, TaskError> {
    ctx.set_message(format!("正在登记权重 {}", self.weights.name));
    let reply = self.service.register_weights(&self.weights)?;
    ctx.check_cancelled()?;
    info!("权重 {} 登记完成: {}", self.weights.name, reply);
    Ok(reply)
  }
}

pub struct CancelDownloadTask {
  pub service: Arc<dyn SamService>,
}

impl Task for CancelDownloadTask {
  type Output = String;

  fn kind(&self) -> TaskKind {
    TaskKind::CancelDownload
  }

  fn run_task(self, _ctx: &TaskContext) -> Result<Self::Output, TaskError> {
    let reply = self.service.cancel_download()?;
    info!("已请求取消权重下载: {}", reply);
    Ok(reply)
  }
}

/// 周期性查询下载进度，直到被取消
pub struct DownloadProgressTask {
  pub service: Arc<dyn SamService>,
  pub interval: Duration,
}

impl DownloadProgressTask {
  pub fn new(service: Arc<dyn SamService>) -> Self {
    DownloadProgressTask {
      service,
      interval: Duration::from_millis(100),
    }
  }
}

impl Task for DownloadProgressTask {
  type Output = ();

  fn kind(&self) -> TaskKind {
    TaskKind::DownloadProgress
  }

  fn run_task(self, ctx: &TaskContext) -> Result<Self::Output, TaskError> {
    let mut last_message = String::new();
    loop {
      ctx.check_cancelled()?;
      match self.service.progress() {
        Ok(progress) => {
          debug!("下载进度 {:.1}%", progress.percent);
          ctx.set_progress(progress.percent / 100.0);
          if !progress.message.is_empty() && progress.message != last_message {
            last_message = progress.message.clone();
            ctx.set_message(progress.message);
          }
        }
        Err(e) => warn!("查询下载进度失败: {}", e),
      }
      std::thread::sleep(self.interval);
    }
  }
}
