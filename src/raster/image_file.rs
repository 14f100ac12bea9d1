// 该文件是 Shanan （山南西风） 项目的一部分。
// src/raster/image_file.rs - 图像文件数据源
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

use std::collections::HashMap;
use std::path::Path;

use image::{ImageReader, RgbImage};
use tracing::{error, info};
use url::Url;

use super::{RasterError, RasterSource, crop_region};
use crate::geometry::Plane;
use crate::region::{ImageBounds, SourceRegion};
use crate::{FromUrl, FromUrlWithScheme};

/// 内存中的图像（或按平面排列的图像栈）。
///
/// `image:///path/a.png` 读取单幅图像；`image:///path/dir?axis=t` 把目录下按文件名排序的图像
/// 作为时间序列（默认 `axis=z` 为 z 栈）。
pub struct ImageFileSource {
  path: String,
  bounds: ImageBounds,
  planes: HashMap<Plane, RgbImage>,
}

impl FromUrlWithScheme for ImageFileSource {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileSource {
  type Error = RasterError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 需要 '{}', 实际为 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(RasterError::SchemeMismatch);
    }

    let path = urlencoding::decode(url.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| url.path().to_string());
    let along_t = url.query_pairs().any(|(k, v)| k == "axis" && v == "t");

    if Path::new(&path).is_dir() {
      let mut files: Vec<_> = std::fs::read_dir(&path)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
      files.sort();
      let mut planes = Vec::with_capacity(files.len());
      for (i, file) in files.iter().enumerate() {
        let image = ImageReader::open(file)?.decode()?.to_rgb8();
        let plane = if along_t {
          Plane::new(0, i as i32)
        } else {
          Plane::new(i as i32, 0)
        };
        planes.push((plane, image));
      }
      info!("读取图像栈 {}，共 {} 个平面", path, planes.len());
      Self::from_planes(path, planes)
    } else {
      let image = ImageReader::open(&path)?.decode()?.to_rgb8();
      info!("读取图像 {}: {}x{}", path, image.width(), image.height());
      Self::from_planes(path, vec![(Plane::default(), image)])
    }
  }
}

impl ImageFileSource {
  /// 所有平面须同尺寸；以第一个平面的尺寸为准
  pub fn from_planes(
    path: impl Into<String>,
    planes: Vec<(Plane, RgbImage)>,
  ) -> Result<Self, RasterError> {
    let (width, height) = planes
      .first()
      .map(|(_, image)| image.dimensions())
      .ok_or(RasterError::PlaneNotFound(Plane::default()))?;
    Ok(ImageFileSource {
      path: path.into(),
      bounds: ImageBounds::new(width as i32, height as i32),
      planes: planes.into_iter().collect(),
    })
  }

  pub fn plane_count(&self) -> usize {
    self.planes.len()
  }
}

impl RasterSource for ImageFileSource {
  fn path(&self) -> &str {
    &self.path
  }

  fn bounds(&self) -> ImageBounds {
    self.bounds
  }

  fn read_region(&self, region: &SourceRegion) -> Result<RgbImage, RasterError> {
    let image = self
      .planes
      .get(&region.plane)
      .ok_or(RasterError::PlaneNotFound(region.plane))?;
    crop_region(image, region)
  }
}
