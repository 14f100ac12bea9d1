// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use url::Url;

use shanan_sam::config::SamConfig;
use shanan_sam::model::SamType;
use shanan_sam::output::OutputPolicy;

/// Segment Anything 标注客户端
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  /// 推理服务地址，覆盖配置文件
  #[arg(long, value_name = "SERVER")]
  pub server: Option<Url>,
  /// 模型变体，如 vit_l、sam2_s、sam3
  #[arg(long, value_name = "MODEL")]
  pub model: Option<SamType>,
  #[arg(long, value_name = "URL")]
  pub checkpoint_url: Option<String>,
  /// 结果输出策略
  #[arg(long, value_name = "POLICY")]
  pub output_policy: Option<OutputPolicy>,
  /// 保留作为提示的对象
  #[arg(long)]
  pub keep_prompts: bool,
  /// 未设置 `RUST_LOG` 时使用的日志级别
  #[arg(long, default_value = "info", value_name = "LEVEL")]
  pub log_level: String,

  #[command(subcommand)]
  pub command: Command,
}

impl Args {
  pub fn apply(&self, config: &mut SamConfig) {
    if let Some(server) = &self.server {
      config.server.url = server.to_string();
    }
    if let Some(model) = self.model {
      config.model = model;
    }
    if let Some(url) = &self.checkpoint_url {
      config.checkpoint_url = Some(url.clone());
    }
    if let Some(policy) = self.output_policy {
      config.output = policy;
    }
    config.keep_prompts |= self.keep_prompts;
  }
}

#[derive(clap::Args, Debug, Clone)]
pub struct ImageIo {
  /// 输入图像，如 image:///data/a.png
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 结果输出，如 geojson:///tmp/out.geojson 或 log:
  #[arg(long, value_name = "OUTPUT", default_value = "log:")]
  pub output: Url,
  #[arg(long, default_value = "0")]
  pub z: i32,
  #[arg(long, default_value = "0")]
  pub t: i32,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 以点或框为提示分割
  Detect {
    #[command(flatten)]
    io: ImageIo,
    /// 前景点 `x,y`，可重复
    #[arg(long = "point", value_name = "X,Y")]
    points: Vec<PointArg>,
    /// 背景点 `x,y`
    #[arg(long = "background", value_name = "X,Y")]
    background: Vec<PointArg>,
    /// 框 `x,y,w,h`
    #[arg(long = "box", value_name = "X,Y,W,H")]
    boxes: Vec<BoxArg>,
  },
  /// 对整个视口自动分割
  Automask {
    #[command(flatten)]
    io: ImageIo,
    #[arg(long)]
    points_per_side: Option<i32>,
    #[arg(long)]
    min_mask_region_area: Option<i32>,
    /// 结果分类
    #[arg(long, value_name = "CLASS")]
    auto_class: Option<String>,
  },
  /// 文本与框提示（sam3）
  Text {
    #[command(flatten)]
    io: ImageIo,
    #[arg(long)]
    text: Option<String>,
    /// 正框 `x,y,w,h`
    #[arg(long = "box", value_name = "X,Y,W,H")]
    boxes: Vec<BoxArg>,
    /// 负框 `x,y,w,h`
    #[arg(long = "negative-box", value_name = "X,Y,W,H")]
    negative: Vec<BoxArg>,
    #[arg(long)]
    confidence: Option<f64>,
    /// 清除服务端累积的提示
    #[arg(long)]
    reset: bool,
  },
  /// 模型权重管理
  Weights {
    #[command(subcommand)]
    action: WeightsAction,
  },
}

#[derive(Subcommand, Debug)]
pub enum WeightsAction {
  /// 列出可用权重
  List,
  /// 按 URL 下载并登记权重
  Register {
    #[arg(long)]
    name: String,
    #[arg(long)]
    url: Url,
  },
  /// 持续显示下载进度，Ctrl-C 退出
  Progress,
  /// 取消正在进行的下载
  Cancel,
}

fn parse_numbers<const N: usize>(s: &str) -> Result<[f64; N], String> {
  let values: Vec<f64> = s
    .split(',')
    .map(|v| v.trim().parse::<f64>())
    .collect::<Result<_, _>>()
    .map_err(|e| format!("无法解析 '{s}': {e}"))?;
  values
    .try_into()
    .map_err(|v: Vec<f64>| format!("需要 {N} 个数值，实际为 {}", v.len()))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointArg {
  pub x: f64,
  pub y: f64,
}

impl FromStr for PointArg {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let [x, y] = parse_numbers(s)?;
    Ok(PointArg { x, y })
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxArg {
  pub x: f64,
  pub y: f64,
  pub width: f64,
  pub height: f64,
}

impl FromStr for BoxArg {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let [x, y, width, height] = parse_numbers(s)?;
    if width <= 0.0 || height <= 0.0 {
      return Err(format!("框的宽高必须为正: '{s}'"));
    }
    Ok(BoxArg { x, y, width, height })
  }
}
