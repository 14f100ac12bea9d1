// 该文件是 Shanan （山南西风） 项目的一部分。
// src/region.rs - 源图像区域
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

//! 在全分辨率像素坐标中描述一次请求所读取的图像区域。
//!
//! 区域在构造时与图像边界求交，因此总满足 `0 <= x`、`x + width <= image_width`
//! （y 方向同理）；交集为空时宽或高为 0，由调用方拒绝。

use thiserror::Error;

use crate::geometry::{Affine, Plane, Point, Rect};
use crate::scene::Viewport;

#[derive(Error, Debug, PartialEq)]
pub enum RegionError {
  #[error("降采样倍率无效: {0}")]
  InvalidDownsample(f64),
  #[error("区域为空: {0:?}")]
  Empty(SourceRegion),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBounds {
  pub width: i32,
  pub height: i32,
}

impl ImageBounds {
  pub const fn new(width: i32, height: i32) -> Self {
    ImageBounds { width, height }
  }
}

/// 框提示的填充策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Padding {
  /// 以框尺寸为基准的填充比例，`<= 0` 表示不填充
  pub pad_scale: f64,
  /// 降采样为 1 时的最小填充像素数
  pub min_padding: f64,
}

impl Default for Padding {
  fn default() -> Self {
    Padding {
      pad_scale: 2.0,
      min_padding: 128.0,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceRegion {
  pub image_path: String,
  pub downsample: f64,
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
  pub plane: Plane,
}

impl SourceRegion {
  /// 构造并裁剪到图像范围内
  pub fn clamped(
    image_path: impl Into<String>,
    downsample: f64,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    plane: Plane,
    bounds: ImageBounds,
  ) -> Self {
    SourceRegion {
      image_path: image_path.into(),
      downsample,
      x,
      y,
      width,
      height,
      plane,
    }
    .intersect(bounds)
  }

  /// 由浮点矩形向外取整得到的区域（不裁剪）
  pub fn enclosing(image_path: impl Into<String>, downsample: f64, rect: &Rect, plane: Plane) -> Self {
    let x = rect.x.floor() as i32;
    let y = rect.y.floor() as i32;
    SourceRegion {
      image_path: image_path.into(),
      downsample,
      x,
      y,
      width: rect.max_x().ceil() as i32 - x,
      height: rect.max_y().ceil() as i32 - y,
      plane,
    }
  }

  /// 视口与图像范围的交集
  pub fn from_viewport(viewport: &Viewport, bounds: ImageBounds) -> Result<Self, RegionError> {
    check_downsample(viewport.downsample)?;
    Ok(
      Self::enclosing(
        viewport.image_path.clone(),
        viewport.downsample,
        &viewport.rect,
        viewport.plane,
      )
      .intersect(bounds),
    )
  }

  /// 框提示所用区域：在框四周填充后与图像范围求交。
  ///
  /// 返回 `(框本身的区域, 填充后的区域)`。
  pub fn for_box(
    image_path: &str,
    downsample: f64,
    rect: &Rect,
    plane: Plane,
    padding: Padding,
    bounds: ImageBounds,
  ) -> Result<(Self, Self), RegionError> {
    check_downsample(downsample)?;
    let roi = Self::enclosing(image_path, downsample, rect, plane);
    let padded = if padding.pad_scale > 0.0 {
      let min_padding = padding.min_padding / downsample;
      let pad_x = min_padding.max((roi.width as f64 * padding.pad_scale).round());
      let pad_y = min_padding.max((roi.height as f64 * padding.pad_scale).round());
      roi.pad(pad_x as i32, pad_y as i32)
    } else {
      roi.clone()
    };
    Ok((roi, padded.intersect(bounds)))
  }

  pub fn pad(&self, pad_x: i32, pad_y: i32) -> Self {
    SourceRegion {
      x: self.x - pad_x,
      y: self.y - pad_y,
      width: self.width + 2 * pad_x,
      height: self.height + 2 * pad_y,
      ..self.clone()
    }
  }

  pub fn intersect(mut self, bounds: ImageBounds) -> Self {
    let x0 = self.x.clamp(0, bounds.width.max(0));
    let y0 = self.y.clamp(0, bounds.height.max(0));
    let x1 = self.x.saturating_add(self.width).clamp(x0, bounds.width.max(x0));
    let y1 = self.y.saturating_add(self.height).clamp(y0, bounds.height.max(y0));
    self.x = x0;
    self.y = y0;
    self.width = x1 - x0;
    self.height = y1 - y0;
    self
  }

  pub fn with_plane(&self, plane: Plane) -> Self {
    SourceRegion {
      plane,
      ..self.clone()
    }
  }

  pub fn is_empty(&self) -> bool {
    self.width <= 0 || self.height <= 0
  }

  pub fn ensure_not_empty(&self) -> Result<(), RegionError> {
    if self.is_empty() {
      Err(RegionError::Empty(self.clone()))
    } else {
      Ok(())
    }
  }

  pub fn max_x(&self) -> i32 {
    self.x + self.width
  }

  pub fn max_y(&self) -> i32 {
    self.y + self.height
  }

  /// 读取后的像素宽度
  pub fn local_width(&self) -> i32 {
    (self.width as f64 / self.downsample).round() as i32
  }

  pub fn local_height(&self) -> i32 {
    (self.height as f64 / self.downsample).round() as i32
  }

  /// 全分辨率坐标到区域局部像素坐标（向下取整）
  pub fn to_local(&self, p: Point) -> (i32, i32) {
    (
      ((p.x - self.x as f64) / self.downsample).floor() as i32,
      ((p.y - self.y as f64) / self.downsample).floor() as i32,
    )
  }

  pub fn contains_local(&self, (x, y): (i32, i32)) -> bool {
    x >= 0 && y >= 0 && x < self.local_width() && y < self.local_height()
  }

  /// 局部坐标回到全分辨率坐标的变换
  pub fn to_scene(&self) -> Affine {
    Affine::new(self.x as f64, self.y as f64, self.downsample)
  }
}

fn check_downsample(downsample: f64) -> Result<(), RegionError> {
  if downsample.is_finite() && downsample > 0.0 {
    Ok(())
  } else {
    Err(RegionError::InvalidDownsample(downsample))
  }
}
