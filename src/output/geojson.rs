// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/geojson.rs - GeoJSON 记录输出
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

use chrono::{Datelike, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::info;

use crate::geometry::{Point, Rect};
use crate::output::Render;
use crate::scene::{Annotation, ImageInfo, Roi};
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum GeoJsonRecordError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 把结果写成 GeoJSON `FeatureCollection`。
///
/// `geojson:///path/out.geojson` 写入单个文件；路径以 `/` 结尾时按日期分目录，
/// 每次写入一个新文件。
pub struct GeoJsonRecordOutput {
  path: PathBuf,
  dated: bool,
  counter: Mutex<u16>,
}

impl FromUrlWithScheme for GeoJsonRecordOutput {
  const SCHEME: &'static str = "geojson";
}

impl FromUrl for GeoJsonRecordOutput {
  type Error = GeoJsonRecordError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GeoJsonRecordError::SchemeMismatch);
    }
    let path = urlencoding::decode(url.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| url.path().to_string());
    Ok(GeoJsonRecordOutput {
      dated: path.ends_with('/'),
      path: PathBuf::from(path),
      counter: Mutex::new(0),
    })
  }
}

impl GeoJsonRecordOutput {
  fn next_id(&self) -> u16 {
    let mut counter = self.counter.lock();
    *counter = counter.wrapping_add(1);
    *counter
  }

  fn target_path(&self) -> Result<PathBuf, GeoJsonRecordError> {
    if !self.dated {
      if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
      }
      return Ok(self.path.clone());
    }
    let now = Utc::now();
    let directory = self
      .path
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;
    Ok(directory.join(format!(
      "{}-{:04X}.geojson",
      now.format("%H-%M-%S"),
      self.next_id()
    )))
  }
}

impl Render<ImageInfo, [Annotation]> for GeoJsonRecordOutput {
  type Error = GeoJsonRecordError;

  fn render_result(&self, image: &ImageInfo, result: &[Annotation]) -> Result<(), Self::Error> {
    let path = self.target_path()?;
    let collection = json!({
      "type": "FeatureCollection",
      "properties": {"image": image.path, "width": image.width, "height": image.height},
      "features": result.iter().map(annotation_to_feature).collect::<Vec<_>>(),
    });
    std::fs::write(&path, serde_json::to_vec_pretty(&collection)?)?;
    info!("写入 {} 个对象到 {}", result.len(), path.display());
    Ok(())
  }
}

fn coords(points: &[Point]) -> Value {
  Value::Array(points.iter().map(|p| json!([p.x, p.y])).collect())
}

fn rect_ring(rect: &Rect) -> Vec<Point> {
  vec![
    Point::new(rect.x, rect.y),
    Point::new(rect.max_x(), rect.y),
    Point::new(rect.max_x(), rect.max_y()),
    Point::new(rect.x, rect.max_y()),
    Point::new(rect.x, rect.y),
  ]
}

fn roi_geometry(roi: &Roi) -> Value {
  let mut geometry = match roi {
    Roi::Points { points, .. } => json!({"type": "MultiPoint", "coordinates": coords(points)}),
    Roi::Line { points, .. } => json!({"type": "LineString", "coordinates": coords(points)}),
    Roi::Rectangle { rect, .. } => {
      json!({"type": "Polygon", "coordinates": [coords(&rect_ring(rect))]})
    }
    Roi::Area { geometry, .. } => geometry.to_geojson(),
  };
  let plane = roi.plane();
  geometry["plane"] = json!({"z": plane.z, "t": plane.t});
  geometry
}

pub fn annotation_to_feature(annotation: &Annotation) -> Value {
  let mut properties = Map::new();
  properties.insert("objectType".into(), json!("annotation"));
  if let Some(name) = &annotation.name {
    properties.insert("name".into(), json!(name));
  }
  if let Some(class) = &annotation.classification {
    properties.insert("classification".into(), json!({"name": class.name()}));
  }
  if let Some(color) = annotation.color {
    properties.insert(
      "color".into(),
      json!([(color >> 16) & 0xFF, (color >> 8) & 0xFF, color & 0xFF]),
    );
  }
  if let Some(quality) = annotation.quality {
    properties.insert("measurements".into(), json!({"SAM Quality": quality}));
  }
  json!({
    "type": "Feature",
    "id": annotation.id,
    "geometry": roi_geometry(&annotation.roi),
    "properties": Value::Object(properties),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::Plane;
  use crate::scene::Classification;

  #[test]
  fn writes_feature_collection() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("out").join("result.geojson");
    let url = url::Url::parse(&format!("geojson://{}", file.display())).expect("url");
    let output = GeoJsonRecordOutput::from_url(&url).expect("output");

    let mut object = Annotation::new(Roi::Rectangle {
      rect: Rect::new(1.0, 2.0, 3.0, 4.0),
      plane: Plane::new(2, 0),
    })
    .with_classification(Some(Classification::new("Tumor")));
    object.quality = Some(0.5);
    let image = ImageInfo {
      path: "slide.tif".into(),
      width: 10,
      height: 10,
    };
    output.render_result(&image, &[object]).expect("render");

    let written: Value =
      serde_json::from_slice(&std::fs::read(&file).expect("read")).expect("json");
    let feature = &written["features"][0];
    assert_eq!(feature["geometry"]["type"], json!("Polygon"));
    assert_eq!(feature["geometry"]["plane"]["z"], json!(2));
    assert_eq!(feature["properties"]["classification"]["name"], json!("Tumor"));
    assert_eq!(feature["properties"]["measurements"]["SAM Quality"], json!(0.5));
  }

  #[test]
  fn dated_directory_gets_fresh_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = url::Url::parse(&format!("geojson://{}/", dir.path().display())).expect("url");
    let output = GeoJsonRecordOutput::from_url(&url).expect("output");
    let first = output.target_path().expect("path");
    let second = output.target_path().expect("path");
    assert_ne!(first, second);
    assert!(first.starts_with(dir.path()));
  }
}
