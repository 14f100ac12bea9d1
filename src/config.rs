// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 客户端配置
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

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::client::{ClientError, InferenceClient, InferenceClientBuilder};
use crate::model::{PromptMode, SamType};
use crate::output::{Decorations, OutputPolicy};
use crate::prompt::PromptSelector;
use crate::region::Padding;
use crate::response::ClassificationRule;
use crate::task::InferenceOptions;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置格式错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("服务地址无效: {0}")]
  Url(#[from] url::ParseError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub url: String,
  /// 为假时接受自签名证书
  pub verify_ssl: bool,
  pub timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    ServerConfig {
      url: "http://localhost:8000/".into(),
      verify_ssl: false,
      timeout_secs: None,
    }
  }
}

/// 自动分割参数，原样传给服务端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoMaskSettings {
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
  pub include_image_edge: bool,
}

impl Default for AutoMaskSettings {
  fn default() -> Self {
    AutoMaskSettings {
      points_per_side: 16,
      points_per_batch: 64,
      pred_iou_thresh: 0.88,
      stability_score_thresh: 0.95,
      stability_score_offset: 1.0,
      box_nms_thresh: 0.2,
      crop_n_layers: 0,
      crop_nms_thresh: 0.7,
      crop_overlap_ratio: 512.0 / 1500.0,
      crop_n_points_downscale_factor: 1,
      min_mask_region_area: 0,
      include_image_edge: false,
    }
  }
}

/// 序列传播的帧范围（闭区间）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceSettings {
  pub from_index: i32,
  pub to_index: i32,
  pub start_frame_idx: i32,
  pub max_frame_num_to_track: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextPromptSettings {
  pub confidence_threshold: f64,
  pub reset_prompts: bool,
}

impl Default for TextPromptSettings {
  fn default() -> Self {
    TextPromptSettings {
      confidence_threshold: 0.4,
      reset_prompts: false,
    }
  }
}

/// 每类任务结果的分类规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationRules {
  pub detection: ClassificationRule,
  /// 为 `Inherit` 时使用 `SamConfig::auto_class`
  pub auto_mask: ClassificationRule,
  pub text_prompt: ClassificationRule,
}

impl Default for ClassificationRules {
  fn default() -> Self {
    ClassificationRules {
      detection: ClassificationRule::Inherit,
      auto_mask: ClassificationRule::Inherit,
      text_prompt: ClassificationRule::Clear,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamConfig {
  pub server: ServerConfig,
  pub model: SamType,
  pub output: OutputPolicy,
  pub checkpoint_url: Option<String>,
  pub pad_scale: f64,
  pub min_padding: f64,
  pub set_names: bool,
  pub random_colors: bool,
  pub keep_prompts: bool,
  pub permit_lines: bool,
  pub force_background_points: bool,
  pub clear_on_auto_mask: bool,
  pub prompt_mode: PromptMode,
  pub sequence: SequenceSettings,
  pub auto_mask: AutoMaskSettings,
  pub text_prompt: TextPromptSettings,
  /// 自动分割结果的分类
  pub auto_class: Option<String>,
  pub classification: ClassificationRules,
  pub workers: usize,
  pub progress_interval_ms: u64,
}

impl Default for SamConfig {
  fn default() -> Self {
    let workers = std::thread::available_parallelism()
      .map(|n| n.get())
      .unwrap_or(4);
    SamConfig {
      server: ServerConfig::default(),
      model: SamType::default(),
      output: OutputPolicy::default(),
      checkpoint_url: None,
      pad_scale: 2.0,
      min_padding: 128.0,
      set_names: true,
      random_colors: true,
      keep_prompts: false,
      permit_lines: false,
      force_background_points: false,
      clear_on_auto_mask: true,
      prompt_mode: PromptMode::default(),
      sequence: SequenceSettings::default(),
      auto_mask: AutoMaskSettings::default(),
      text_prompt: TextPromptSettings::default(),
      auto_class: None,
      classification: ClassificationRules::default(),
      workers,
      progress_interval_ms: 100,
    }
  }
}

impl SamConfig {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let config = serde_json::from_slice(&std::fs::read(path)?)?;
    info!("读取配置 {}", path.display());
    Ok(config)
  }

  pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
    std::fs::write(path.as_ref(), serde_json::to_vec_pretty(self)?)?;
    Ok(())
  }

  /// 同时恢复输出策略、命名、着色与清空选项
  pub fn reset_auto_mask(&mut self) {
    let defaults = SamConfig::default();
    self.output = defaults.output;
    self.set_names = defaults.set_names;
    self.random_colors = defaults.random_colors;
    self.clear_on_auto_mask = defaults.clear_on_auto_mask;
    self.auto_mask = defaults.auto_mask;
  }

  pub fn padding(&self) -> Padding {
    Padding {
      pad_scale: self.pad_scale,
      min_padding: self.min_padding,
    }
  }

  pub fn decorations(&self) -> Decorations {
    Decorations {
      set_names: self.set_names,
      random_colors: self.random_colors,
    }
  }

  pub fn selector(&self) -> PromptSelector {
    PromptSelector::new(self.permit_lines)
  }

  pub fn inference(&self) -> InferenceOptions {
    InferenceOptions {
      model: self.model,
      checkpoint_url: self.checkpoint_url.clone(),
      output: self.output,
      decorations: self.decorations(),
    }
  }

  /// 自动分割的分类：显式规则优先，否则使用 `auto_class`
  pub fn auto_mask_classification(&self) -> ClassificationRule {
    match (&self.classification.auto_mask, &self.auto_class) {
      (ClassificationRule::Inherit, Some(name)) => ClassificationRule::Fixed(name.clone()),
      (ClassificationRule::Inherit, None) => ClassificationRule::Clear,
      (rule, _) => rule.clone(),
    }
  }

  pub fn server_url(&self) -> Result<Url, ConfigError> {
    Ok(Url::parse(&self.server.url)?)
  }

  pub fn progress_interval(&self) -> Duration {
    Duration::from_millis(self.progress_interval_ms)
  }

  /// 按服务配置构建 HTTP 客户端
  pub fn client(&self) -> Result<InferenceClient, ClientError> {
    let url = Url::parse(&self.server.url)?;
    InferenceClientBuilder::new(&url)
      .verify_ssl(self.server.verify_ssl)
      .timeout(self.server.timeout_secs.map(Duration::from_secs))
      .build()
  }
}
