// 该文件是 Shanan （山南西风） 项目的一部分。
// src/response.rs - 推理响应解析
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

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::geometry::{Geometry, Plane};
use crate::identity::IdentityMap;
use crate::model::PromptMode;
use crate::region::SourceRegion;
use crate::scene::{Annotation, Classification, Roi};

#[derive(Error, Debug)]
pub enum ResponseError {
  #[error("响应不是合法的 JSON: {0}")]
  Json(#[from] serde_json::Error),
  #[error("响应既不是要素集合也不是要素")]
  NotFeatures,
}

/// 区域局部坐标下的一个分割结果
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeature {
  pub geometry: Geometry,
  /// 服务端给出的平面；序列模式下是相对于起始帧的序号
  pub plane: Plane,
  pub quality: Option<f64>,
  pub object_index: Option<String>,
}

/// 接受 `FeatureCollection`、要素数组或单个要素；无法解析或非面状的要素被跳过
pub fn parse_features(body: &str) -> Result<Vec<ParsedFeature>, ResponseError> {
  let value: Value = serde_json::from_str(body)?;
  let features: Vec<&Value> = if let Some(features) = value.get("features") {
    features
      .as_array()
      .ok_or(ResponseError::NotFeatures)?
      .iter()
      .collect()
  } else if let Some(array) = value.as_array() {
    array.iter().collect()
  } else if value.is_object() {
    vec![&value]
  } else {
    return Err(ResponseError::NotFeatures);
  };

  let total = features.len();
  let parsed: Vec<ParsedFeature> = features.into_iter().filter_map(parse_feature).collect();
  if parsed.len() < total {
    warn!("跳过 {} 个无法解析的要素", total - parsed.len());
  }
  debug!("解析得到 {} 个要素", parsed.len());
  Ok(parsed)
}

fn parse_feature(value: &Value) -> Option<ParsedFeature> {
  let geometry_value = value.get("geometry")?;
  let geometry = Geometry::from_geojson(geometry_value)?;
  let plane = geometry_value
    .get("plane")
    .filter(|p| p.is_object())
    .map(|p| {
      Plane::new(
        p.get("z").and_then(Value::as_i64).unwrap_or(0) as i32,
        p.get("t").and_then(Value::as_i64).unwrap_or(0) as i32,
      )
    })
    .unwrap_or_default();
  let properties = value.get("properties");
  let quality = properties
    .and_then(|p| p.get("quality"))
    .and_then(Value::as_f64);
  let object_index = properties
    .and_then(|p| p.get("object_idx"))
    .and_then(|v| match v {
      Value::String(s) => Some(s.clone()),
      Value::Number(n) => Some(n.to_string()),
      _ => None,
    });
  Some(ParsedFeature {
    geometry,
    plane,
    quality,
    object_index,
  })
}

/// 分割结果的分类规则
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "name")]
pub enum ClassificationRule {
  /// 沿用触发提示的分类
  #[default]
  Inherit,
  /// 不分类
  Clear,
  /// 固定分类
  Fixed(String),
}

impl ClassificationRule {
  pub fn resolve(&self, prompt: Option<&Classification>) -> Option<Classification> {
    match self {
      ClassificationRule::Inherit => prompt.cloned(),
      ClassificationRule::Clear => None,
      ClassificationRule::Fixed(name) => Some(Classification::new(name.clone())),
    }
  }
}

/// 将局部结果映射回全分辨率场景坐标
pub struct Reprojection<'a> {
  pub region: &'a SourceRegion,
  pub classification: Option<Classification>,
  /// 序列模式：`(传播轴, 起始帧)`
  pub sequence: Option<(PromptMode, i32)>,
  pub identity: Option<&'a IdentityMap>,
}

impl<'a> Reprojection<'a> {
  pub fn new(region: &'a SourceRegion, classification: Option<Classification>) -> Self {
    Reprojection {
      region,
      classification,
      sequence: None,
      identity: None,
    }
  }

  pub fn with_sequence(mut self, mode: PromptMode, from_index: i32, identity: &'a IdentityMap) -> Self {
    self.sequence = Some((mode, from_index));
    self.identity = Some(identity);
    self
  }

  fn plane_for(&self, local: Plane) -> Plane {
    let base = self.region.plane;
    match self.sequence {
      Some((PromptMode::Xyz, from)) => Plane::new(from + local.z, base.t),
      Some((PromptMode::Xyt, from)) => Plane::new(base.z, from + local.t),
      _ => base,
    }
  }

  fn classification_for(&self, feature: &ParsedFeature) -> Option<Classification> {
    if let Some(identity) = self.identity {
      return feature
        .object_index
        .as_deref()
        .and_then(|idx| identity.resolve(idx));
    }
    self.classification.clone()
  }

  pub fn apply(&self, features: Vec<ParsedFeature>) -> Vec<Annotation> {
    let affine = self.region.to_scene();
    features
      .into_iter()
      .map(|feature| {
        let roi = Roi::Area {
          geometry: feature.geometry.transform(&affine),
          plane: self.plane_for(feature.plane),
        };
        let classification = self.classification_for(&feature);
        let mut annotation = Annotation::new(roi).with_classification(classification);
        annotation.quality = feature.quality;
        annotation
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::region::ImageBounds;

  const PIXEL: &str = r#"{
    "type": "FeatureCollection",
    "features": [
      {
        "type": "Feature",
        "geometry": {"type": "Polygon", "coordinates": [[[10, 10], [11, 10], [11, 11], [10, 11], [10, 10]]]},
        "properties": {"quality": 0.93}
      },
      {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1, 1]}},
      {"type": "Feature"}
    ]
  }"#;

  #[test]
  fn collection_skips_bad_features() {
    let features = parse_features(PIXEL).expect("parse");
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].quality, Some(0.93));
  }

  #[test]
  fn single_feature_and_array_are_accepted() {
    let single = r#"{"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}, "properties": {"object_idx": 3}}"#;
    let features = parse_features(single).expect("parse");
    assert_eq!(features[0].object_index.as_deref(), Some("3"));

    let array = format!("[{single}, {single}]");
    assert_eq!(parse_features(&array).expect("parse").len(), 2);
  }

  #[test]
  fn malformed_body_is_an_error() {
    assert!(matches!(parse_features("not json"), Err(ResponseError::Json(_))));
    assert!(matches!(parse_features("42"), Err(ResponseError::NotFeatures)));
  }

  #[test]
  fn reprojects_into_scene_coordinates() {
    let region = SourceRegion::clamped(
      "img",
      2.0,
      100,
      200,
      400,
      400,
      Plane::new(3, 0),
      ImageBounds::new(1000, 1000),
    );
    let features = parse_features(PIXEL).expect("parse");
    let class = Some(Classification::new("Tumor"));
    let out = Reprojection::new(&region, class.clone()).apply(features);
    assert_eq!(out.len(), 1);
    let bounds = out[0].roi.bounds().expect("bounds");
    assert_eq!((bounds.x, bounds.y), (120.0, 220.0));
    assert_eq!((bounds.width, bounds.height), (2.0, 2.0));
    assert_eq!(out[0].roi.plane(), Plane::new(3, 0));
    assert_eq!(out[0].classification, class);
    assert_eq!(out[0].quality, Some(0.93));
  }

  #[test]
  fn sequence_plane_is_offset_by_start() {
    let body = r#"[{"type": "Feature", "geometry": {"type": "Polygon", "plane": {"z": 2, "t": 0}, "coordinates": [[[0,0],[4,0],[4,4],[0,0]]]}}]"#;
    let region = SourceRegion::clamped(
      "img",
      1.0,
      0,
      0,
      10,
      10,
      Plane::new(0, 7),
      ImageBounds::new(10, 10),
    );
    let identity = IdentityMap::default();
    let out = Reprojection::new(&region, None)
      .with_sequence(PromptMode::Xyz, 5, &identity)
      .apply(parse_features(body).expect("parse"));
    assert_eq!(out[0].roi.plane(), Plane::new(7, 7));
    assert!(matches!(&out[0].roi, Roi::Area { geometry, .. } if geometry.bounds().map(|b| b.width) == Some(4.0)));
  }

  #[test]
  fn classification_rules() {
    let tumor = Classification::new("Tumor");
    assert_eq!(ClassificationRule::Inherit.resolve(Some(&tumor)), Some(tumor.clone()));
    assert_eq!(ClassificationRule::Clear.resolve(Some(&tumor)), None);
    assert_eq!(
      ClassificationRule::Fixed("Auto".into()).resolve(None),
      Some(Classification::new("Auto"))
    );
  }
}
