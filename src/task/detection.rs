// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task/detection.rs - 点/框提示检测任务
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
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::model::{DetectionRequest, PromptRequest, SamService};
use crate::output::select;
use crate::prompt::detection_prompt;
use crate::raster::{RasterSource, png_base64};
use crate::region::{Padding, SourceRegion};
use crate::response::{ClassificationRule, Reprojection, parse_features};
use crate::scene::Annotation;
use crate::task::{InferenceOptions, Task, TaskContext, TaskError, TaskKind};

/// 每个前景提示各发送一次请求，结果按提示顺序拼接。
///
/// 只有全部请求完成且未被取消时才返回结果。
pub struct DetectionTask {
  pub service: Arc<dyn SamService>,
  pub raster: Arc<dyn RasterSource>,
  pub viewer: SourceRegion,
  pub foreground: Vec<Annotation>,
  pub background: Vec<Annotation>,
  pub options: InferenceOptions,
  pub padding: Padding,
  pub classification: ClassificationRule,
}

impl Task for DetectionTask {
  type Output = Vec<Annotation>;

  fn kind(&self) -> TaskKind {
    TaskKind::Detection
  }

  fn run_task(self, ctx: &TaskContext) -> Result<Self::Output, TaskError> {
    let started = Instant::now();
    let bounds = self.raster.bounds();
    let total = self.foreground.len();
    let multimask = self.options.output.multimask();
    let mut detected = Vec::new();

    for (i, foreground) in self.foreground.iter().enumerate() {
      ctx.check_cancelled()?;
      let prompt = match detection_prompt(
        foreground,
        &self.background,
        &self.viewer,
        self.padding,
        bounds,
      ) {
        Ok(prompt) => prompt,
        Err(e) => {
          warn!("跳过提示 {}: {}", foreground.id, e);
          continue;
        }
      };

      let image = self.raster.read_region(&prompt.region)?;
      let request = DetectionRequest::Prompt(PromptRequest::new(
        self.options.model,
        png_base64(&image)?,
        &prompt.prompts,
        multimask,
        self.options.checkpoint_url.clone(),
      ));

      ctx.check_cancelled()?;
      let body = self.service.detect(&request)?;
      ctx.check_cancelled()?;

      let class = self.classification.resolve(foreground.classification.as_ref());
      let mut objects = Reprojection::new(&prompt.region, class).apply(parse_features(&body)?);
      self.options.decorations.apply(&mut objects);
      let objects = select(objects, self.options.output);
      debug!("提示 {} 得到 {} 个对象", foreground.id, objects.len());
      detected.extend(objects);
      ctx.set_progress((i + 1) as f64 / total as f64);
    }

    ctx.check_cancelled()?;
    info!(
      "检测完成: {} 个提示, {} 个对象, 耗时 {:?}",
      total,
      detected.len(),
      started.elapsed()
    );
    Ok(detected)
  }
}
