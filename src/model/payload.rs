// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/payload.rs - 请求与响应载荷
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

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{PromptMode, SamType};
use crate::prompt::PromptSet;

/// 单图点/框提示，`POST sam/`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptRequest {
  #[serde(rename = "type")]
  pub model: SamType,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bbox: Option<[i32; 4]>,
  pub b64img: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub b64mask: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub point_coords: Option<Vec<[i32; 2]>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub point_labels: Option<Vec<i32>>,
  pub multimask_output: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub checkpoint_url: Option<String>,
}

impl PromptRequest {
  pub fn new(
    model: SamType,
    b64img: String,
    prompts: &PromptSet,
    multimask_output: bool,
    checkpoint_url: Option<String>,
  ) -> Self {
    let (point_coords, point_labels) = if prompts.points.is_empty() {
      (None, None)
    } else {
      (Some(prompts.point_coords()), Some(prompts.point_labels()))
    };
    PromptRequest {
      model,
      bbox: prompts.bbox.map(|b| b.as_array()),
      b64img,
      b64mask: None,
      point_coords,
      point_labels,
      multimask_output,
      checkpoint_url,
    }
  }
}

/// 全图自动分割，`POST sam/automask/`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoMaskRequest {
  #[serde(rename = "type")]
  pub model: SamType,
  pub b64img: String,
  pub points_per_side: i32,
  pub points_per_batch: i32,
  pub pred_iou_thresh: f64,
  pub stability_score_thresh: f64,
  pub stability_score_offset: f64,
  pub box_nms_thresh: f64,
  pub crop_n_layers: i32,
  pub crop_nms_thresh: f64,
  pub crop_overlap_ratio: f64,
  pub crop_n_points_downscale_factor: i32,
  pub min_mask_region_area: i32,
  pub output_type: String,
  pub include_image_edge: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub checkpoint_url: Option<String>,
}

/// 文本与框提示，`POST sam3/`；框格式为 `[x, y, width, height]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPromptRequest {
  #[serde(rename = "type")]
  pub model: SamType,
  pub b64img: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub text_prompt: Option<String>,
  pub positive_bboxes: Vec<[i32; 4]>,
  pub negative_bboxes: Vec<[i32; 4]>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub checkpoint_url: Option<String>,
  pub reset_prompts: bool,
  pub confidence_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoObjectPrompt {
  pub obj_id: i32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub point_coords: Option<Vec<[i32; 2]>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub point_labels: Option<Vec<i32>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bbox: Option<[i32; 4]>,
}

impl VideoObjectPrompt {
  pub fn new(obj_id: i32, prompts: &PromptSet) -> Self {
    let (point_coords, point_labels) = if prompts.points.is_empty() {
      (None, None)
    } else {
      (Some(prompts.point_coords()), Some(prompts.point_labels()))
    };
    VideoObjectPrompt {
      obj_id,
      point_coords,
      point_labels,
      bbox: prompts.bbox.map(|b| b.as_array()),
    }
  }
}

/// 序列传播，`POST sam/video/`；帧已预先上传到 `dirname`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoPromptRequest {
  #[serde(rename = "type")]
  pub model: SamType,
  pub dirname: String,
  pub axes: PromptMode,
  pub plane_position: i32,
  pub start_frame_idx: i32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_frame_num_to_track: Option<i32>,
  /// 帧序号 -> 该帧上的对象提示
  pub objs: BTreeMap<i32, Vec<VideoObjectPrompt>>,
  #[serde(rename = "checkpointUrl", skip_serializing_if = "Option::is_none")]
  pub checkpoint_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionRequest {
  Prompt(PromptRequest),
  AutoMask(AutoMaskRequest),
  Text(TextPromptRequest),
  Video(VideoPromptRequest),
}

impl DetectionRequest {
  /// 相对服务基地址的端点路径
  pub fn endpoint(&self) -> &'static str {
    match self {
      DetectionRequest::Prompt(_) => "sam/",
      DetectionRequest::AutoMask(_) => "sam/automask/",
      DetectionRequest::Text(_) => "sam3/",
      DetectionRequest::Video(_) => "sam/video/",
    }
  }

  pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
    match self {
      DetectionRequest::Prompt(r) => serde_json::to_value(r),
      DetectionRequest::AutoMask(r) => serde_json::to_value(r),
      DetectionRequest::Text(r) => serde_json::to_value(r),
      DetectionRequest::Video(r) => serde_json::to_value(r),
    }
  }
}

/// 服务端登记的模型权重
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamWeights {
  #[serde(rename = "type")]
  pub model: String,
  pub name: String,
  pub url: String,
}

/// 权重下载进度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamProgress {
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub percent: f64,
}
