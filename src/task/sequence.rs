// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task/sequence.rs - 多帧序列传播任务
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

//! 序列模式先把范围内每一帧的视口区域以 JPEG 上传到服务端的一个新目录，
//! 再发送一次包含全部对象提示的传播请求。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SequenceSettings;
use crate::geometry::Plane;
use crate::identity::IdentityMap;
use crate::model::{DetectionRequest, PromptMode, SamService, VideoObjectPrompt, VideoPromptRequest};
use crate::prompt::{PromptSelector, sequence_prompt};
use crate::raster::{RasterSource, encode_jpeg};
use crate::region::SourceRegion;
use crate::response::{Reprojection, parse_features};
use crate::scene::{Annotation, Classification, ObjectId};
use crate::task::{InferenceOptions, Task, TaskContext, TaskError, TaskKind, TaskOutput};

/// 构建序列任务所需的场景输入
pub struct SequenceInput<'a> {
  pub viewer: &'a SourceRegion,
  /// 当前选中的对象；只有顶层对象参与
  pub selected: &'a [Annotation],
  /// 场景中的全部标注，用于避开已占用的分类名
  pub existing: &'a [Annotation],
  pub mode: PromptMode,
  pub settings: &'a SequenceSettings,
  pub selector: PromptSelector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceOutput {
  pub objects: Vec<Annotation>,
  /// 本次新建、需要登记到宿主的分类
  pub classifications: Vec<Classification>,
}

impl From<SequenceOutput> for TaskOutput {
  fn from(output: SequenceOutput) -> Self {
    TaskOutput::Annotations(output.objects)
  }
}

pub struct SequenceTask {
  service: Arc<dyn SamService>,
  raster: Arc<dyn RasterSource>,
  mode: PromptMode,
  from_index: i32,
  regions: Vec<SourceRegion>,
  plane_position: i32,
  start_frame_idx: i32,
  max_frame_num_to_track: Option<i32>,
  objs: BTreeMap<i32, Vec<VideoObjectPrompt>>,
  identity: IdentityMap,
  prompt_ids: Vec<ObjectId>,
  options: InferenceOptions,
}

impl SequenceTask {
  /// 为选中的顶层对象分配编号并构建每帧的提示。
  ///
  /// 只考虑与视口处于同一 t（`XYZ`）或同一 z（`XYT`）的对象。
  pub fn prepare(
    service: Arc<dyn SamService>,
    raster: Arc<dyn RasterSource>,
    input: SequenceInput<'_>,
    options: InferenceOptions,
  ) -> Result<Self, TaskError> {
    let SequenceInput {
      viewer,
      selected,
      existing,
      mode,
      settings,
      selector,
    } = input;
    if !mode.is_sequence() {
      return Err(TaskError::Input(format!("{mode} 模式不支持序列预测")));
    }
    let (from, to) = (settings.from_index, settings.to_index);
    if from < 0 || to < from {
      return Err(TaskError::Input(format!("帧范围无效: {from}..{to}")));
    }

    let base = viewer.plane;
    let on_axis = |plane: Plane| match mode {
      PromptMode::Xyt => plane.z == base.z,
      _ => plane.t == base.t,
    };
    let candidates: Vec<Annotation> = selected
      .iter()
      .filter(|o| o.level == 1 && on_axis(o.roi.plane()))
      .cloned()
      .collect();
    let prompt_ids = candidates.iter().map(|o| o.id).collect();

    let (identity, assigned) = IdentityMap::assign(&candidates, existing);
    let mut objs: BTreeMap<i32, Vec<VideoObjectPrompt>> = BTreeMap::new();
    for (index, object) in assigned {
      let plane = object.roi.plane();
      let key = match mode {
        PromptMode::Xyt => plane.t,
        _ => plane.z,
      } - from;
      let region = viewer.with_plane(plane);
      let Some(prompts) = sequence_prompt(object, &region, &selector) else {
        debug!("对象 {} 的形状不能作为序列提示", object.id);
        continue;
      };
      objs
        .entry(key)
        .or_default()
        .push(VideoObjectPrompt::new(index, &prompts));
    }
    if objs.is_empty() {
      return Err(TaskError::Input("没有指定提示".into()));
    }

    let regions = (from..=to)
      .map(|i| match mode {
        PromptMode::Xyt => viewer.with_plane(Plane::new(base.z, i)),
        _ => viewer.with_plane(Plane::new(i, base.t)),
      })
      .collect();
    let plane_position = match mode {
      PromptMode::Xyt => base.z,
      _ => base.t,
    };

    Ok(SequenceTask {
      service,
      raster,
      mode,
      from_index: from,
      regions,
      plane_position,
      start_frame_idx: settings.start_frame_idx,
      max_frame_num_to_track: settings.max_frame_num_to_track,
      objs,
      identity,
      prompt_ids,
      options,
    })
  }

  pub fn frame_count(&self) -> usize {
    self.regions.len()
  }

  pub fn identity(&self) -> &IdentityMap {
    &self.identity
  }

  /// 参与传播的顶层提示对象
  pub fn prompt_ids(&self) -> &[ObjectId] {
    &self.prompt_ids
  }

  fn upload_frames(&self, ctx: &TaskContext, dirname: &str) -> Result<(), TaskError> {
    let total = self.regions.len();
    let width = total.to_string().len();
    let uploaded = AtomicUsize::new(0);
    self
      .regions
      .par_iter()
      .enumerate()
      .try_for_each(|(i, region)| -> Result<(), TaskError> {
        ctx.check_cancelled()?;
        let jpeg = encode_jpeg(&self.raster.read_region(region)?)?;
        let filename = format!("{i:0width$}.jpg");
        self.service.upload_frame(dirname, &filename, jpeg)?;
        let done = uploaded.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.set_message(format!("已上传 {done}/{total} 帧"));
        ctx.set_progress(done as f64 / total as f64);
        Ok(())
      })
  }
}

impl Task for SequenceTask {
  type Output = SequenceOutput;

  fn kind(&self) -> TaskKind {
    TaskKind::Sequence
  }

  fn run_task(self, ctx: &TaskContext) -> Result<Self::Output, TaskError> {
    let dirname = Uuid::new_v4().to_string();
    info!("上传 {} 帧到 {}", self.regions.len(), dirname);
    if let Err(e) = self.upload_frames(ctx, &dirname) {
      warn!("帧上传失败，放弃传播: {}", e);
      return Err(e);
    }

    let request = DetectionRequest::Video(VideoPromptRequest {
      model: self.options.model,
      dirname,
      axes: self.mode,
      plane_position: self.plane_position,
      start_frame_idx: self.start_frame_idx,
      max_frame_num_to_track: self.max_frame_num_to_track,
      objs: self.objs.clone(),
      checkpoint_url: self.options.checkpoint_url.clone(),
    });

    ctx.check_cancelled()?;
    ctx.set_message("正在处理...");
    let body = self.service.detect(&request)?;
    ctx.check_cancelled()?;
    ctx.set_message("处理完成");

    let first = self.regions.first().ok_or_else(|| TaskError::Input("帧范围为空".into()))?;
    let mut objects = Reprojection::new(first, None)
      .with_sequence(self.mode, self.from_index, &self.identity)
      .apply(parse_features(&body)?);
    self.options.decorations.apply(&mut objects);
    info!("序列传播得到 {} 个对象", objects.len());
    Ok(SequenceOutput {
      objects,
      classifications: self.identity.synthetic(),
    })
  }
}
