// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型变体与推理服务接口
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

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::ClientError;

mod payload;
pub use self::payload::{
  AutoMaskRequest, DetectionRequest, PromptRequest, SamProgress, SamWeights, TextPromptRequest,
  VideoObjectPrompt, VideoPromptRequest,
};

#[derive(Error, Debug, PartialEq)]
#[error("未知的取值: {0}")]
pub struct UnknownVariant(pub String);

/// 服务端模型变体
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SamType {
  #[serde(rename = "vit_h")]
  VitH,
  #[default]
  #[serde(rename = "vit_l")]
  VitL,
  #[serde(rename = "vit_b")]
  VitB,
  #[serde(rename = "vit_t")]
  VitT,
  #[serde(rename = "sam2_l")]
  Sam2L,
  #[serde(rename = "sam2_bp")]
  Sam2Bp,
  #[serde(rename = "sam2_s")]
  Sam2S,
  #[serde(rename = "sam2_t")]
  Sam2T,
  #[serde(rename = "sam3")]
  Sam3,
}

impl SamType {
  pub const ALL: [SamType; 9] = [
    SamType::VitH,
    SamType::VitL,
    SamType::VitB,
    SamType::VitT,
    SamType::Sam2L,
    SamType::Sam2Bp,
    SamType::Sam2S,
    SamType::Sam2T,
    SamType::Sam3,
  ];

  pub fn model_name(&self) -> &'static str {
    match self {
      SamType::VitH => "vit_h",
      SamType::VitL => "vit_l",
      SamType::VitB => "vit_b",
      SamType::VitT => "vit_t",
      SamType::Sam2L => "sam2_l",
      SamType::Sam2Bp => "sam2_bp",
      SamType::Sam2S => "sam2_s",
      SamType::Sam2T => "sam2_t",
      SamType::Sam3 => "sam3",
    }
  }

  /// 只有 SAM2 系列支持跨帧传播
  pub fn is_video_compatible(&self) -> bool {
    matches!(
      self,
      SamType::Sam2L | SamType::Sam2Bp | SamType::Sam2S | SamType::Sam2T
    )
  }
}

impl fmt::Display for SamType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.model_name())
  }
}

impl FromStr for SamType {
  type Err = UnknownVariant;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    SamType::ALL
      .into_iter()
      .find(|t| t.model_name() == s)
      .ok_or_else(|| UnknownVariant(s.to_string()))
  }
}

/// 序列模式沿哪个轴传播
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromptMode {
  #[default]
  #[serde(rename = "XY")]
  Xy,
  #[serde(rename = "XYZ")]
  Xyz,
  #[serde(rename = "XYT")]
  Xyt,
}

impl PromptMode {
  pub fn is_sequence(&self) -> bool {
    !matches!(self, PromptMode::Xy)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      PromptMode::Xy => "XY",
      PromptMode::Xyz => "XYZ",
      PromptMode::Xyt => "XYT",
    }
  }
}

impl fmt::Display for PromptMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for PromptMode {
  type Err = UnknownVariant;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "XY" => Ok(PromptMode::Xy),
      "XYZ" => Ok(PromptMode::Xyz),
      "XYT" => Ok(PromptMode::Xyt),
      _ => Err(UnknownVariant(s.to_string())),
    }
  }
}

/// 远端推理服务。`detect` 返回原始响应体，由响应解析器处理。
pub trait SamService: Send + Sync {
  fn detect(&self, request: &DetectionRequest) -> Result<String, ClientError>;
  fn upload_frame(&self, dirname: &str, filename: &str, jpeg: Vec<u8>) -> Result<String, ClientError>;
  fn fetch_weights(&self, model: SamType) -> Result<Vec<SamWeights>, ClientError>;
  fn register_weights(&self, weights: &SamWeights) -> Result<String, ClientError>;
  fn progress(&self) -> Result<SamProgress, ClientError>;
  fn cancel_download(&self) -> Result<String, ClientError>;
}
