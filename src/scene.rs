// 该文件是 Shanan （山南西风） 项目的一部分。
// src/scene.rs - 宿主场景接口
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

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::Receiver;

use crate::geometry::{Geometry, Plane, Point, Rect};

mod memory;
pub use self::memory::MemoryScene;

pub type ObjectId = u64;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// 分配一个进程内唯一的对象编号
pub fn next_object_id() -> ObjectId {
  NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// 分类标签。名称以 `*` 结尾的分类视为“忽略”类，用作背景提示。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Classification(String);

impl Classification {
  pub const IGNORE: &'static str = "Ignore*";

  pub fn new(name: impl Into<String>) -> Self {
    Classification(name.into())
  }

  pub fn ignore() -> Self {
    Classification(Self::IGNORE.to_string())
  }

  pub fn name(&self) -> &str {
    &self.0
  }

  pub fn is_ignored(&self) -> bool {
    self.0.ends_with('*')
  }
}

impl std::fmt::Display for Classification {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// 标注的感兴趣区域
#[derive(Debug, Clone, PartialEq)]
pub enum Roi {
  Points { points: Vec<Point>, plane: Plane },
  Line { points: Vec<Point>, plane: Plane },
  Rectangle { rect: Rect, plane: Plane },
  Area { geometry: Geometry, plane: Plane },
}

impl Roi {
  pub fn plane(&self) -> Plane {
    match self {
      Roi::Points { plane, .. }
      | Roi::Line { plane, .. }
      | Roi::Rectangle { plane, .. }
      | Roi::Area { plane, .. } => *plane,
    }
  }

  pub fn is_empty(&self) -> bool {
    match self {
      Roi::Points { points, .. } | Roi::Line { points, .. } => points.is_empty(),
      Roi::Rectangle { rect, .. } => rect.width <= 0.0 || rect.height <= 0.0,
      Roi::Area { geometry, .. } => geometry.area() <= 0.0,
    }
  }

  pub fn is_points(&self) -> bool {
    matches!(self, Roi::Points { .. })
  }

  pub fn is_line(&self) -> bool {
    matches!(self, Roi::Line { .. })
  }

  pub fn is_rectangle(&self) -> bool {
    matches!(self, Roi::Rectangle { .. })
  }

  /// 点与线的顶点；矩形与面状区域返回空
  pub fn vertices(&self) -> &[Point] {
    match self {
      Roi::Points { points, .. } | Roi::Line { points, .. } => points,
      _ => &[],
    }
  }

  pub fn bounds(&self) -> Option<Rect> {
    match self {
      Roi::Points { points, .. } | Roi::Line { points, .. } => Rect::from_points(points),
      Roi::Rectangle { rect, .. } => Some(*rect),
      Roi::Area { geometry, .. } => geometry.bounds(),
    }
  }

  pub fn area(&self) -> f64 {
    match self {
      Roi::Area { geometry, .. } => geometry.area(),
      Roi::Rectangle { rect, .. } => rect.width * rect.height,
      _ => 0.0,
    }
  }
}

/// 场景中的标注对象
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
  pub id: ObjectId,
  pub roi: Roi,
  pub classification: Option<Classification>,
  pub name: Option<String>,
  /// 0xRRGGBB
  pub color: Option<u32>,
  /// SAM 质量分数
  pub quality: Option<f64>,
  pub children: Vec<Annotation>,
  /// 层级，1 表示顶层对象
  pub level: u32,
}

impl Annotation {
  pub fn new(roi: Roi) -> Self {
    Annotation {
      id: next_object_id(),
      roi,
      classification: None,
      name: None,
      color: None,
      quality: None,
      children: Vec::new(),
      level: 1,
    }
  }

  pub fn with_classification(mut self, classification: Option<Classification>) -> Self {
    self.classification = classification;
    self
  }

  pub fn with_children(mut self, children: Vec<Annotation>) -> Self {
    self.children = children
      .into_iter()
      .map(|mut c| {
        c.level = self.level + 1;
        c
      })
      .collect();
    self
  }

  pub fn is_ignored(&self) -> bool {
    self.classification.as_ref().is_some_and(Classification::is_ignored)
  }
}

/// 当前视口：全分辨率坐标下的可见矩形、降采样倍率与平面
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
  pub image_path: String,
  pub rect: Rect,
  pub downsample: f64,
  pub plane: Plane,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
  pub path: String,
  pub width: i32,
  pub height: i32,
}

/// 场景结构变化通知
#[derive(Debug, Clone)]
pub enum SceneEvent {
  ObjectsAdded(Vec<Annotation>),
  ObjectsRemoved(Vec<ObjectId>),
  /// 宿主正在批量修改，监听者应忽略
  Changing,
}

/// 宿主应用（查看器与对象层级）的抽象
pub trait SceneHost: Send + Sync {
  fn image(&self) -> Option<ImageInfo>;
  fn viewport(&self) -> Option<Viewport>;
  fn annotations(&self) -> Vec<Annotation>;
  fn selected(&self) -> Vec<Annotation>;
  fn add_objects(&self, objects: Vec<Annotation>);
  fn remove_objects(&self, ids: &[ObjectId]);
  fn set_selected(&self, ids: &[ObjectId]);
  fn clear_objects(&self);
  fn reclassify(&self, id: ObjectId, classification: Option<Classification>);
  fn register_classifications(&self, classifications: &[Classification]);
  fn subscribe(&self) -> Receiver<SceneEvent>;
}
