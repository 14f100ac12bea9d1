// 该文件是 Shanan （山南西风） 项目的一部分。
// src/raster.rs - 图像区域读取与编码
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

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};
use thiserror::Error;

use crate::geometry::Plane;
use crate::region::{ImageBounds, SourceRegion};

#[cfg(feature = "read_image_file")]
mod image_file;
#[cfg(feature = "read_image_file")]
pub use self::image_file::ImageFileSource;

#[derive(Error, Debug)]
pub enum RasterError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("平面 {0:?} 不存在")]
  PlaneNotFound(Plane),
  #[error("区域为空或越界: {0:?}")]
  InvalidRegion(SourceRegion),
}

/// 可按区域读取像素的图像数据源
pub trait RasterSource: Send + Sync {
  fn path(&self) -> &str;
  fn bounds(&self) -> ImageBounds;
  /// 读取区域并按其降采样倍率缩放
  fn read_region(&self, region: &SourceRegion) -> Result<RgbImage, RasterError>;
}

/// 从单个平面的整幅图像中裁剪区域
pub fn crop_region(image: &RgbImage, region: &SourceRegion) -> Result<RgbImage, RasterError> {
  let (w, h) = image.dimensions();
  if region.is_empty()
    || region.x < 0
    || region.y < 0
    || region.max_x() as u32 > w
    || region.max_y() as u32 > h
  {
    return Err(RasterError::InvalidRegion(region.clone()));
  }
  let cropped = imageops::crop_imm(
    image,
    region.x as u32,
    region.y as u32,
    region.width as u32,
    region.height as u32,
  )
  .to_image();
  if region.downsample == 1.0 {
    return Ok(cropped);
  }
  let out_w = region.local_width().max(1) as u32;
  let out_h = region.local_height().max(1) as u32;
  Ok(imageops::resize(&cropped, out_w, out_h, FilterType::Triangle))
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, RasterError> {
  let mut bytes = Cursor::new(Vec::new());
  image.write_to(&mut bytes, ImageFormat::Png)?;
  Ok(bytes.into_inner())
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, RasterError> {
  let mut bytes = Cursor::new(Vec::new());
  image.write_to(&mut bytes, ImageFormat::Jpeg)?;
  Ok(bytes.into_inner())
}

/// 请求体中的 `b64img`
pub fn png_base64(image: &RgbImage) -> Result<String, RasterError> {
  Ok(STANDARD.encode(encode_png(image)?))
}
