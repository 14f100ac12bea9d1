// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task/text.rs - 文本/框提示任务
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

use tracing::{info, warn};

use crate::model::{DetectionRequest, SamService, TextPromptRequest};
use crate::output::select;
use crate::prompt::xywh_box;
use crate::raster::{RasterSource, png_base64};
use crate::region::SourceRegion;
use crate::response::{ClassificationRule, Reprojection, parse_features};
use crate::scene::{Annotation, Roi};
use crate::task::{InferenceOptions, Task, TaskContext, TaskError, TaskKind};

/// 服务端会累积多次调用的正负框，除非 `reset_prompts` 为真
pub struct TextPromptTask {
  pub service: Arc<dyn SamService>,
  pub raster: Arc<dyn RasterSource>,
  pub region: SourceRegion,
  pub text: Option<String>,
  pub positive: Vec<Annotation>,
  pub negative: Vec<Annotation>,
  pub reset_prompts: bool,
  pub confidence_threshold: f64,
  pub options: InferenceOptions,
  pub classification: ClassificationRule,
}

fn boxes(objects: &[Annotation], region: &SourceRegion, kind: &str) -> Vec<[i32; 4]> {
  objects
    .iter()
    .filter_map(|object| match &object.roi {
      Roi::Rectangle { rect, .. } => Some(xywh_box(rect, region)),
      _ => {
        warn!("{}框只支持矩形，跳过对象 {}", kind, object.id);
        None
      }
    })
    .collect()
}

impl Task for TextPromptTask {
  type Output = Vec<Annotation>;

  fn kind(&self) -> TaskKind {
    TaskKind::TextPrompt
  }

  fn run_task(self, ctx: &TaskContext) -> Result<Self::Output, TaskError> {
    self.region.ensure_not_empty()?;
    let text = self.text.filter(|t| !t.trim().is_empty());
    let positive_bboxes = boxes(&self.positive, &self.region, "正");
    let negative_bboxes = boxes(&self.negative, &self.region, "负");
    if text.is_none() && positive_bboxes.is_empty() && negative_bboxes.is_empty() && !self.reset_prompts {
      return Err(TaskError::Input("需要文本提示或至少一个框".into()));
    }

    let image = self.raster.read_region(&self.region)?;
    let request = DetectionRequest::Text(TextPromptRequest {
      model: self.options.model,
      b64img: png_base64(&image)?,
      text_prompt: text,
      positive_bboxes,
      negative_bboxes,
      checkpoint_url: self.options.checkpoint_url.clone(),
      reset_prompts: self.reset_prompts,
      confidence_threshold: self.confidence_threshold,
    });

    ctx.check_cancelled()?;
    let body = self.service.detect(&request)?;
    ctx.check_cancelled()?;

    let class = self.classification.resolve(None);
    let mut objects = Reprojection::new(&self.region, class).apply(parse_features(&body)?);
    self.options.decorations.apply(&mut objects);
    let objects = select(objects, self.options.output);
    info!("文本提示得到 {} 个对象", objects.len());
    Ok(objects)
  }
}
