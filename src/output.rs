// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 输出选择与结果记录
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
use tracing::info;
use url::Url;

use crate::FromUrl;
#[cfg(feature = "geojson_record")]
use crate::FromUrlWithScheme;
use crate::model::UnknownVariant;
use crate::scene::{Annotation, ImageInfo};

mod naming;
pub use self::naming::{Decorations, hsb_to_rgb, random_color, result_name};

#[cfg(feature = "geojson_record")]
mod geojson;
#[cfg(feature = "geojson_record")]
pub use self::geojson::{GeoJsonRecordError, GeoJsonRecordOutput, annotation_to_feature};

pub trait Render<Frame, Output: ?Sized>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

/// 多掩码输出的取舍策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPolicy {
  Single,
  All,
  LargestArea,
  #[default]
  SmallestArea,
  BestQuality,
}

impl OutputPolicy {
  pub const ALL: [OutputPolicy; 5] = [
    OutputPolicy::Single,
    OutputPolicy::All,
    OutputPolicy::LargestArea,
    OutputPolicy::SmallestArea,
    OutputPolicy::BestQuality,
  ];

  /// 请求服务端返回多个候选掩码
  pub fn multimask(&self) -> bool {
    !matches!(self, OutputPolicy::Single)
  }

  pub fn name(&self) -> &'static str {
    match self {
      OutputPolicy::Single => "single",
      OutputPolicy::All => "all",
      OutputPolicy::LargestArea => "largest_area",
      OutputPolicy::SmallestArea => "smallest_area",
      OutputPolicy::BestQuality => "best_quality",
    }
  }

  /// 自动分割请求中的 `output_type`
  pub fn label(&self) -> &'static str {
    match self {
      OutputPolicy::Single => "Single mask",
      OutputPolicy::All => "Multi-mask (all)",
      OutputPolicy::LargestArea => "Multi-mask (largest)",
      OutputPolicy::SmallestArea => "Multi-mask (smallest)",
      OutputPolicy::BestQuality => "Multi-mask (best quality)",
    }
  }
}

impl fmt::Display for OutputPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

impl FromStr for OutputPolicy {
  type Err = UnknownVariant;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    OutputPolicy::ALL
      .into_iter()
      .find(|p| p.name() == s || p.label() == s)
      .ok_or_else(|| UnknownVariant(s.to_string()))
  }
}

/// 按策略筛选结果。`All` 或不多于一个结果时原样返回，其余策略只保留一个，
/// 并列时保留靠前的。缺失的质量分数视为最差。
pub fn select(mut objects: Vec<Annotation>, policy: OutputPolicy) -> Vec<Annotation> {
  if objects.len() <= 1 || policy == OutputPolicy::All {
    return objects;
  }
  let area = |a: &Annotation| a.roi.area();
  let quality = |a: &Annotation| a.quality.unwrap_or(f64::NEG_INFINITY);
  let keep = match policy {
    OutputPolicy::Single | OutputPolicy::All => 0,
    OutputPolicy::LargestArea => best_index(&objects, |a, b| area(a) > area(b)),
    OutputPolicy::SmallestArea => best_index(&objects, |a, b| area(a) < area(b)),
    OutputPolicy::BestQuality => best_index(&objects, |a, b| quality(a) > quality(b)),
  };
  vec![objects.swap_remove(keep)]
}

fn best_index(objects: &[Annotation], better: impl Fn(&Annotation, &Annotation) -> bool) -> usize {
  let mut best = 0;
  for i in 1..objects.len() {
    if better(&objects[i], &objects[best]) {
      best = i;
    }
  }
  best
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "geojson_record")]
  #[error("GeoJSON 记录输出错误: {0}")]
  GeoJsonRecordError(#[from] GeoJsonRecordError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 只在日志中汇总结果
pub struct LogOutput;

impl Render<ImageInfo, [Annotation]> for LogOutput {
  type Error = OutputError;

  fn render_result(&self, image: &ImageInfo, result: &[Annotation]) -> Result<(), Self::Error> {
    info!("{}: 共 {} 个对象", image.path, result.len());
    for object in result {
      info!(
        "  - {} 分类: {} 面积: {:.1}",
        object.name.as_deref().unwrap_or("-"),
        object
          .classification
          .as_ref()
          .map(|c| c.name())
          .unwrap_or("-"),
        object.roi.area()
      );
    }
    Ok(())
  }
}

pub enum OutputWrapper {
  #[cfg(feature = "geojson_record")]
  GeoJsonRecordOutput(GeoJsonRecordOutput),
  LogOutput(LogOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "geojson_record")]
      GeoJsonRecordOutput::SCHEME => {
        let output = GeoJsonRecordOutput::from_url(url)?;
        Ok(OutputWrapper::GeoJsonRecordOutput(output))
      }
      "log" => Ok(OutputWrapper::LogOutput(LogOutput)),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render<ImageInfo, [Annotation]> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, image: &ImageInfo, result: &[Annotation]) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "geojson_record")]
      OutputWrapper::GeoJsonRecordOutput(output) => Ok(output.render_result(image, result)?),
      OutputWrapper::LogOutput(output) => output.render_result(image, result),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::{Geometry, Plane, Point, Polygon};
  use crate::scene::Roi;

  fn square(size: f64, quality: Option<f64>) -> Annotation {
    let ring = vec![
      Point::new(0.0, 0.0),
      Point::new(size, 0.0),
      Point::new(size, size),
      Point::new(0.0, size),
    ];
    let mut a = Annotation::new(Roi::Area {
      geometry: Geometry::Polygon(Polygon::new(ring)),
      plane: Plane::default(),
    });
    a.quality = quality;
    a
  }

  #[test]
  fn all_and_short_lists_pass_through() {
    let objects = vec![square(1.0, None), square(2.0, None)];
    assert_eq!(select(objects.clone(), OutputPolicy::All), objects);
    let one = vec![square(3.0, None)];
    assert_eq!(select(one.clone(), OutputPolicy::LargestArea), one);
    assert!(select(vec![], OutputPolicy::Single).is_empty());
  }

  #[test]
  fn single_policies_keep_exactly_one() {
    let objects = vec![square(2.0, Some(0.5)), square(4.0, None), square(1.0, Some(0.9))];
    for policy in OutputPolicy::ALL.into_iter().filter(|p| *p != OutputPolicy::All) {
      assert_eq!(select(objects.clone(), policy).len(), 1, "{policy}");
    }
    assert_eq!(select(objects.clone(), OutputPolicy::Single)[0].id, objects[0].id);
    assert_eq!(select(objects.clone(), OutputPolicy::LargestArea)[0].id, objects[1].id);
    assert_eq!(select(objects.clone(), OutputPolicy::SmallestArea)[0].id, objects[2].id);
    assert_eq!(select(objects.clone(), OutputPolicy::BestQuality)[0].id, objects[2].id);
  }

  #[test]
  fn ties_keep_the_earliest() {
    let objects = vec![square(2.0, Some(0.7)), square(2.0, Some(0.7)), square(2.0, Some(0.7))];
    for policy in [
      OutputPolicy::LargestArea,
      OutputPolicy::SmallestArea,
      OutputPolicy::BestQuality,
    ] {
      assert_eq!(select(objects.clone(), policy)[0].id, objects[0].id);
    }
  }

  #[test]
  fn missing_quality_is_worst() {
    let objects = vec![square(1.0, None), square(1.0, Some(0.01))];
    assert_eq!(select(objects.clone(), OutputPolicy::BestQuality)[0].id, objects[1].id);
  }

  #[test]
  fn policy_names_parse() {
    assert_eq!("smallest_area".parse::<OutputPolicy>(), Ok(OutputPolicy::SmallestArea));
    assert_eq!("Multi-mask (best quality)".parse::<OutputPolicy>(), Ok(OutputPolicy::BestQuality));
    assert!(OutputPolicy::LargestArea.multimask());
    assert!(!OutputPolicy::Single.multimask());
  }
}
