// 该文件是 Shanan （山南西风） 项目的一部分。
// src/geometry.rs - 几何图形与坐标变换
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
use serde_json::{Value, json};

/// 图像平面（z 切片与 t 时间点）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Plane {
  pub z: i32,
  pub t: i32,
}

impl Plane {
  pub const fn new(z: i32, t: i32) -> Self {
    Plane { z, t }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
  pub x: f64,
  pub y: f64,
}

impl Point {
  pub const fn new(x: f64, y: f64) -> Self {
    Point { x, y }
  }
}

/// 轴对齐矩形，坐标为全分辨率像素
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
  pub x: f64,
  pub y: f64,
  pub width: f64,
  pub height: f64,
}

impl Rect {
  pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
    Rect {
      x,
      y,
      width,
      height,
    }
  }

  pub fn max_x(&self) -> f64 {
    self.x + self.width
  }

  pub fn max_y(&self) -> f64 {
    self.y + self.height
  }

  pub fn from_points(points: &[Point]) -> Option<Self> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points.iter().skip(1) {
      min_x = min_x.min(p.x);
      min_y = min_y.min(p.y);
      max_x = max_x.max(p.x);
      max_y = max_y.max(p.y);
    }
    Some(Rect::new(min_x, min_y, max_x - min_x, max_y - min_y))
  }
}

/// 平移 + 等比缩放：`p' = offset + p * scale`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
  pub translate_x: f64,
  pub translate_y: f64,
  pub scale: f64,
}

impl Affine {
  pub fn new(translate_x: f64, translate_y: f64, scale: f64) -> Self {
    Affine {
      translate_x,
      translate_y,
      scale,
    }
  }

  pub fn apply(&self, p: Point) -> Point {
    Point::new(
      self.translate_x + p.x * self.scale,
      self.translate_y + p.y * self.scale,
    )
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
  pub exterior: Vec<Point>,
  pub holes: Vec<Vec<Point>>,
}

impl Polygon {
  pub fn new(exterior: Vec<Point>) -> Self {
    Polygon {
      exterior,
      holes: Vec::new(),
    }
  }

  pub fn area(&self) -> f64 {
    let holes: f64 = self.holes.iter().map(|h| ring_area(h)).sum();
    (ring_area(&self.exterior) - holes).max(0.0)
  }

  fn map(&self, f: &impl Fn(Point) -> Point) -> Polygon {
    Polygon {
      exterior: self.exterior.iter().copied().map(f).collect(),
      holes: self
        .holes
        .iter()
        .map(|h| h.iter().copied().map(f).collect())
        .collect(),
    }
  }

  fn to_coordinates(&self) -> Value {
    let ring = |r: &Vec<Point>| -> Value {
      Value::Array(r.iter().map(|p| json!([p.x, p.y])).collect())
    };
    let mut rings = vec![ring(&self.exterior)];
    rings.extend(self.holes.iter().map(ring));
    Value::Array(rings)
  }

  fn from_coordinates(value: &Value) -> Option<Polygon> {
    let mut rings = value
      .as_array()?
      .iter()
      .map(parse_ring)
      .collect::<Option<Vec<_>>>()?
      .into_iter();
    let exterior = rings.next()?;
    if exterior.len() < 3 {
      return None;
    }
    Some(Polygon {
      exterior,
      holes: rings.collect(),
    })
  }
}

/// 分割结果的几何形状，只保留面状几何
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
  Polygon(Polygon),
  MultiPolygon(Vec<Polygon>),
}

impl Geometry {
  /// 平面面积（鞋带公式，洞减去）
  pub fn area(&self) -> f64 {
    match self {
      Geometry::Polygon(p) => p.area(),
      Geometry::MultiPolygon(ps) => ps.iter().map(Polygon::area).sum(),
    }
  }

  pub fn transform(&self, affine: &Affine) -> Geometry {
    let f = |p: Point| affine.apply(p);
    match self {
      Geometry::Polygon(p) => Geometry::Polygon(p.map(&f)),
      Geometry::MultiPolygon(ps) => Geometry::MultiPolygon(ps.iter().map(|p| p.map(&f)).collect()),
    }
  }

  pub fn bounds(&self) -> Option<Rect> {
    let points: Vec<Point> = match self {
      Geometry::Polygon(p) => p.exterior.clone(),
      Geometry::MultiPolygon(ps) => ps.iter().flat_map(|p| p.exterior.iter().copied()).collect(),
    };
    Rect::from_points(&points)
  }

  /// 解析 GeoJSON 几何；非面状或格式错误返回 `None`
  pub fn from_geojson(value: &Value) -> Option<Geometry> {
    let coordinates = value.get("coordinates")?;
    match value.get("type")?.as_str()? {
      "Polygon" => Polygon::from_coordinates(coordinates).map(Geometry::Polygon),
      "MultiPolygon" => {
        let polygons = coordinates
          .as_array()?
          .iter()
          .map(Polygon::from_coordinates)
          .collect::<Option<Vec<_>>>()?;
        if polygons.is_empty() {
          None
        } else {
          Some(Geometry::MultiPolygon(polygons))
        }
      }
      _ => None,
    }
  }

  pub fn to_geojson(&self) -> Value {
    match self {
      Geometry::Polygon(p) => json!({
        "type": "Polygon",
        "coordinates": p.to_coordinates(),
      }),
      Geometry::MultiPolygon(ps) => json!({
        "type": "MultiPolygon",
        "coordinates": Value::Array(ps.iter().map(Polygon::to_coordinates).collect()),
      }),
    }
  }
}

fn parse_ring(value: &Value) -> Option<Vec<Point>> {
  value
    .as_array()?
    .iter()
    .map(|c| {
      let c = c.as_array()?;
      let x = c.first()?.as_f64()?;
      let y = c.get(1)?.as_f64()?;
      (x.is_finite() && y.is_finite()).then_some(Point::new(x, y))
    })
    .collect()
}

fn ring_area(ring: &[Point]) -> f64 {
  if ring.len() < 3 {
    return 0.0;
  }
  let mut sum = 0.0;
  for (i, a) in ring.iter().enumerate() {
    let b = ring[(i + 1) % ring.len()];
    sum += a.x * b.y - b.x * a.y;
  }
  (sum / 2.0).abs()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn square(x: f64, y: f64, size: f64) -> Polygon {
    Polygon::new(vec![
      Point::new(x, y),
      Point::new(x + size, y),
      Point::new(x + size, y + size),
      Point::new(x, y + size),
      Point::new(x, y),
    ])
  }

  #[test]
  fn polygon_area_subtracts_holes() {
    let mut poly = square(0.0, 0.0, 10.0);
    poly.holes.push(square(2.0, 2.0, 2.0).exterior);
    assert_eq!(Geometry::Polygon(poly).area(), 96.0);
  }

  #[test]
  fn affine_translates_after_scaling() {
    let affine = Affine::new(100.0, 200.0, 2.0);
    assert_eq!(affine.apply(Point::new(10.0, 10.0)), Point::new(120.0, 220.0));
  }

  #[test]
  fn geojson_rejects_non_polygonal() {
    let point = json!({"type": "Point", "coordinates": [1.0, 2.0]});
    assert!(Geometry::from_geojson(&point).is_none());
    let broken = json!({"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0]]]});
    assert!(Geometry::from_geojson(&broken).is_none());
  }

  #[test]
  fn geojson_multipolygon_area() {
    let value = json!({
      "type": "MultiPolygon",
      "coordinates": [
        [[[0, 0], [2, 0], [2, 2], [0, 2], [0, 0]]],
        [[[5, 5], [6, 5], [6, 6], [5, 6], [5, 5]]]
      ]
    });
    let geometry = Geometry::from_geojson(&value).expect("multipolygon");
    assert_eq!(geometry.area(), 5.0);
    assert_eq!(Geometry::from_geojson(&geometry.to_geojson()), Some(geometry));
  }
}
