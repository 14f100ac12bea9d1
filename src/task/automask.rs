// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task/automask.rs - 全视口自动分割任务
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

use crate::config::AutoMaskSettings;
use crate::model::{AutoMaskRequest, DetectionRequest, SamService};
use crate::output::select;
use crate::raster::{RasterSource, png_base64};
use crate::region::SourceRegion;
use crate::response::{ClassificationRule, Reprojection, parse_features};
use crate::scene::Annotation;
use crate::task::{InferenceOptions, Task, TaskContext, TaskError, TaskKind};

pub struct AutoMaskTask {
  pub service: Arc<dyn SamService>,
  pub raster: Arc<dyn RasterSource>,
  pub region: SourceRegion,
  pub settings: AutoMaskSettings,
  pub options: InferenceOptions,
  pub classification: ClassificationRule,
}

impl AutoMaskTask {
  fn request(&self, b64img: String) -> AutoMaskRequest {
    let s = &self.settings;
    AutoMaskRequest {
      model: self.options.model,
      b64img,
      points_per_side: s.points_per_side,
      points_per_batch: s.points_per_batch,
      pred_iou_thresh: s.pred_iou_thresh,
      stability_score_thresh: s.stability_score_thresh,
      stability_score_offset: s.stability_score_offset,
      box_nms_thresh: s.box_nms_thresh,
      crop_n_layers: s.crop_n_layers,
      crop_nms_thresh: s.crop_nms_thresh,
      crop_overlap_ratio: s.crop_overlap_ratio,
      crop_n_points_downscale_factor: s.crop_n_points_downscale_factor,
      min_mask_region_area: s.min_mask_region_area,
      output_type: self.options.output.label().to_string(),
      include_image_edge: s.include_image_edge,
      checkpoint_url: self.options.checkpoint_url.clone(),
    }
  }
}

impl Task for AutoMaskTask {
  type Output = Vec<Annotation>;

  fn kind(&self) -> TaskKind {
    TaskKind::AutoMask
  }

  fn run_task(self, ctx: &TaskContext) -> Result<Self::Output, TaskError> {
    self.region.ensure_not_empty()?;
    let image = self.raster.read_region(&self.region)?;
    let request = DetectionRequest::AutoMask(self.request(png_base64(&image)?));

    ctx.check_cancelled()?;
    let body = self.service.detect(&request)?;
    ctx.check_cancelled()?;

    let class = self.classification.resolve(None);
    let mut objects = Reprojection::new(&self.region, class).apply(parse_features(&body)?);
    self.options.decorations.apply(&mut objects);
    let objects = select(objects, self.options.output);
    if objects.is_empty() {
      warn!("自动分割没有检测到对象");
    } else {
      info!("自动分割得到 {} 个对象", objects.len());
    }
    Ok(objects)
  }
}
