// 该文件是 Shanan （山南西风） 项目的一部分。
// src/prompt.rs - 提示构建
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

use thiserror::Error;
use tracing::{debug, warn};

use crate::geometry::{Point, Rect};
use crate::region::{ImageBounds, Padding, RegionError, SourceRegion};
use crate::scene::{Annotation, ObjectId, Roi};

#[derive(Error, Debug, PartialEq)]
pub enum PromptError {
  #[error("区域错误: {0}")]
  Region(#[from] RegionError),
  #[error("对象 {0} 的提示全部落在区域之外")]
  OutsideRegion(ObjectId),
  #[error("对象 {0} 的形状不能作为提示")]
  UnsupportedShape(ObjectId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointLabel {
  Background = 0,
  Foreground = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptPoint {
  pub x: i32,
  pub y: i32,
  pub label: PointLabel,
}

/// 区域局部坐标下的框 `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptBox {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
}

impl PromptBox {
  /// 未填充的框区域在（可能已填充的）请求区域中的偏移
  pub fn within(roi: &SourceRegion, region: &SourceRegion) -> Self {
    let ds = region.downsample;
    PromptBox {
      x1: ((roi.x - region.x) as f64 / ds) as i32,
      y1: ((roi.y - region.y) as f64 / ds) as i32,
      x2: ((roi.max_x() - region.x) as f64 / ds).round() as i32,
      y2: ((roi.max_y() - region.y) as f64 / ds).round() as i32,
    }
  }

  pub fn as_array(&self) -> [i32; 4] {
    [self.x1, self.y1, self.x2, self.y2]
  }
}

/// 文本提示使用的框格式 `[x, y, width, height]`
pub fn xywh_box(rect: &Rect, region: &SourceRegion) -> [i32; 4] {
  let ds = region.downsample;
  [
    ((rect.x - region.x as f64) / ds) as i32,
    ((rect.y - region.y as f64) / ds) as i32,
    (rect.width / ds).round() as i32,
    (rect.height / ds).round() as i32,
  ]
}

/// 一次请求的提示集合：背景点在前，前景点在后
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptSet {
  pub points: Vec<PromptPoint>,
  pub bbox: Option<PromptBox>,
}

impl PromptSet {
  pub fn is_empty(&self) -> bool {
    self.points.is_empty() && self.bbox.is_none()
  }

  pub fn push_points(&mut self, points: &[Point], label: PointLabel, region: &SourceRegion) {
    self.points.extend(
      local_points(points, region)
        .into_iter()
        .map(|(x, y)| PromptPoint { x, y, label }),
    );
  }

  pub fn point_coords(&self) -> Vec<[i32; 2]> {
    self.points.iter().map(|p| [p.x, p.y]).collect()
  }

  pub fn point_labels(&self) -> Vec<i32> {
    self.points.iter().map(|p| p.label as i32).collect()
  }
}

/// 转换到局部像素坐标，丢弃区域之外的点
pub fn local_points(points: &[Point], region: &SourceRegion) -> Vec<(i32, i32)> {
  points
    .iter()
    .map(|p| region.to_local(*p))
    .filter(|local| region.contains_local(*local))
    .collect()
}

/// 前景/背景提示的判定规则
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromptSelector {
  pub permit_lines: bool,
}

impl PromptSelector {
  pub fn new(permit_lines: bool) -> Self {
    PromptSelector { permit_lines }
  }

  fn is_potential(&self, object: &Annotation) -> bool {
    !object.roi.is_empty()
  }

  fn is_point_like(&self, roi: &Roi) -> bool {
    roi.is_points() || (self.permit_lines && roi.is_line())
  }

  pub fn is_background(&self, object: &Annotation) -> bool {
    self.is_potential(object) && self.is_point_like(&object.roi) && object.is_ignored()
  }

  pub fn is_foreground(&self, object: &Annotation) -> bool {
    self.is_potential(object)
      && !self.is_background(object)
      && (object.roi.is_rectangle() || self.is_point_like(&object.roi))
  }

  pub fn foreground(&self, objects: &[Annotation]) -> Vec<Annotation> {
    objects
      .iter()
      .filter(|o| self.is_foreground(o))
      .cloned()
      .collect()
  }

  pub fn background(&self, objects: &[Annotation]) -> Vec<Annotation> {
    objects
      .iter()
      .filter(|o| self.is_background(o))
      .cloned()
      .collect()
  }
}

/// 单个前景对象的检测请求区域与提示
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionPrompt {
  pub region: SourceRegion,
  pub prompts: PromptSet,
}

/// 为一个前景对象构建检测提示。
///
/// 框提示在 `pad_scale > 0` 时读取框四周填充后的区域，否则使用视口区域；
/// 点与线提示总是使用视口区域。背景点加入每一次请求。
pub fn detection_prompt(
  foreground: &Annotation,
  background: &[Annotation],
  viewer: &SourceRegion,
  padding: Padding,
  bounds: ImageBounds,
) -> Result<DetectionPrompt, PromptError> {
  let (region, bbox) = match &foreground.roi {
    Roi::Rectangle { rect, plane } => {
      let (roi, padded) = if padding.pad_scale > 0.0 {
        SourceRegion::for_box(&viewer.image_path, viewer.downsample, rect, *plane, padding, bounds)?
      } else {
        let roi = SourceRegion::enclosing(viewer.image_path.clone(), viewer.downsample, rect, *plane);
        (roi, viewer.clone())
      };
      let bbox = PromptBox::within(&roi, &padded);
      (padded, Some(bbox))
    }
    Roi::Points { .. } | Roi::Line { .. } => (viewer.clone(), None),
    Roi::Area { .. } => return Err(PromptError::UnsupportedShape(foreground.id)),
  };
  region.ensure_not_empty()?;

  let mut prompts = PromptSet {
    points: Vec::new(),
    bbox,
  };
  for object in background {
    prompts.push_points(object.roi.vertices(), PointLabel::Background, &region);
  }
  let before = prompts.points.len();
  prompts.push_points(foreground.roi.vertices(), PointLabel::Foreground, &region);

  if prompts.bbox.is_none() && prompts.points.len() == before {
    warn!("对象 {} 的提示点全部在视口之外", foreground.id);
    return Err(PromptError::OutsideRegion(foreground.id));
  }
  debug!(
    "对象 {} 的提示: {} 个点, 框 {:?}",
    foreground.id,
    prompts.points.len(),
    prompts.bbox
  );
  Ok(DetectionPrompt { region, prompts })
}

/// 序列模式中单个顶层对象的提示。
///
/// 点对象按前景规则标注，其余视为背景；矩形对象给出框，并把子对象中的点作为附加提示。
/// 其它形状返回 `None`。
pub fn sequence_prompt(
  object: &Annotation,
  region: &SourceRegion,
  selector: &PromptSelector,
) -> Option<PromptSet> {
  let mut prompts = PromptSet::default();
  match &object.roi {
    Roi::Points { points, .. } => {
      push_labeled(&mut prompts, object, points, region, selector);
    }
    Roi::Rectangle { rect, plane } => {
      let roi = SourceRegion::enclosing(region.image_path.clone(), region.downsample, rect, *plane);
      prompts.bbox = Some(PromptBox::within(&roi, region));
      for child in object.children.iter().filter(|c| c.roi.is_points()) {
        push_labeled(&mut prompts, child, child.roi.vertices(), region, selector);
      }
    }
    _ => return None,
  }
  Some(prompts)
}

fn push_labeled(
  prompts: &mut PromptSet,
  object: &Annotation,
  points: &[Point],
  region: &SourceRegion,
  selector: &PromptSelector,
) {
  let label = if selector.is_foreground(object) {
    PointLabel::Foreground
  } else {
    PointLabel::Background
  };
  prompts.push_points(points, label, region);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::Plane;
  use crate::scene::Classification;

  const BOUNDS: ImageBounds = ImageBounds::new(2000, 2000);

  fn viewer() -> SourceRegion {
    SourceRegion::clamped("img", 2.0, 100, 200, 800, 600, Plane::default(), BOUNDS)
  }

  fn points(pts: &[(f64, f64)]) -> Annotation {
    Annotation::new(Roi::Points {
      points: pts.iter().map(|&(x, y)| Point::new(x, y)).collect(),
      plane: Plane::default(),
    })
  }

  fn line() -> Annotation {
    Annotation::new(Roi::Line {
      points: vec![Point::new(150.0, 250.0), Point::new(170.0, 270.0)],
      plane: Plane::default(),
    })
  }

  #[test]
  fn background_points_come_first() {
    let fg = points(&[(120.0, 220.0)]);
    let bg = points(&[(300.0, 400.0), (5000.0, 5000.0)])
      .with_classification(Some(Classification::ignore()));
    let prompt =
      detection_prompt(&fg, &[bg], &viewer(), Padding::default(), BOUNDS).expect("prompt");
    assert_eq!(prompt.prompts.point_coords(), vec![[100, 100], [10, 10]]);
    assert_eq!(prompt.prompts.point_labels(), vec![0, 1]);
    assert!(prompt.prompts.bbox.is_none());
  }

  #[test]
  fn points_outside_viewport_are_rejected() {
    let fg = points(&[(10.0, 10.0)]);
    let err = detection_prompt(&fg, &[], &viewer(), Padding::default(), BOUNDS);
    assert_eq!(err, Err(PromptError::OutsideRegion(fg.id)));
  }

  #[test]
  fn box_offset_into_padded_region() {
    let fg = Annotation::new(Roi::Rectangle {
      rect: Rect::new(1000.0, 1000.0, 100.0, 60.0),
      plane: Plane::default(),
    });
    let prompt =
      detection_prompt(&fg, &[], &viewer(), Padding::default(), BOUNDS).expect("prompt");
    // 填充: x 方向 200, y 方向 max(64, 120) = 120
    assert_eq!(prompt.region.x, 800);
    assert_eq!(prompt.region.y, 880);
    assert_eq!(prompt.prompts.bbox.map(|b| b.as_array()), Some([100, 60, 150, 90]));
  }

  #[test]
  fn box_without_padding_uses_viewer() {
    let fg = Annotation::new(Roi::Rectangle {
      rect: Rect::new(300.0, 400.0, 50.0, 50.0),
      plane: Plane::default(),
    });
    let padding = Padding {
      pad_scale: 0.0,
      min_padding: 128.0,
    };
    let prompt = detection_prompt(&fg, &[], &viewer(), padding, BOUNDS).expect("prompt");
    assert_eq!(prompt.region, viewer());
    assert_eq!(prompt.prompts.bbox.map(|b| b.as_array()), Some([100, 100, 125, 125]));
  }

  #[test]
  fn lines_need_permission() {
    let strict = PromptSelector::new(false);
    let relaxed = PromptSelector::new(true);
    assert!(!strict.is_foreground(&line()));
    assert!(relaxed.is_foreground(&line()));

    let ignored_line = line().with_classification(Some(Classification::ignore()));
    assert!(!strict.is_background(&ignored_line));
    assert!(relaxed.is_background(&ignored_line));
  }

  #[test]
  fn ignored_rectangle_is_still_foreground() {
    let rect = Annotation::new(Roi::Rectangle {
      rect: Rect::new(0.0, 0.0, 5.0, 5.0),
      plane: Plane::default(),
    })
    .with_classification(Some(Classification::ignore()));
    let selector = PromptSelector::default();
    assert!(selector.is_foreground(&rect));
    assert!(!selector.is_background(&rect));
  }

  #[test]
  fn sequence_rectangle_collects_child_points() {
    let child_fg = points(&[(140.0, 240.0)]);
    let child_bg = points(&[(160.0, 260.0)]).with_classification(Some(Classification::ignore()));
    let rect = Annotation::new(Roi::Rectangle {
      rect: Rect::new(120.0, 220.0, 80.0, 80.0),
      plane: Plane::default(),
    })
    .with_children(vec![child_fg, child_bg]);
    let prompts = sequence_prompt(&rect, &viewer(), &PromptSelector::default()).expect("prompt");
    assert_eq!(prompts.bbox.map(|b| b.as_array()), Some([10, 10, 50, 50]));
    assert_eq!(prompts.point_coords(), vec![[20, 20], [30, 30]]);
    assert_eq!(prompts.point_labels(), vec![1, 0]);
  }

  #[test]
  fn text_box_is_xywh() {
    let rect = Rect::new(110.0, 220.0, 41.0, 20.0);
    assert_eq!(xywh_box(&rect, &viewer()), [5, 10, 21, 10]);
  }
}
