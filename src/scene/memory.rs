// 该文件是 Shanan （山南西风） 项目的一部分。
// src/scene/memory.rs - 内存场景
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

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{Annotation, Classification, ImageInfo, ObjectId, SceneEvent, SceneHost, Viewport};
use crate::geometry::{Plane, Rect};

#[derive(Default)]
struct SceneState {
  objects: Vec<Annotation>,
  selected: Vec<ObjectId>,
  classifications: Vec<Classification>,
}

/// 不依赖图形界面的场景实现，供命令行与测试使用
pub struct MemoryScene {
  image: ImageInfo,
  viewport: RwLock<Viewport>,
  state: Mutex<SceneState>,
  subscribers: Mutex<Vec<Sender<SceneEvent>>>,
}

impl MemoryScene {
  /// 视口默认覆盖整幅图像，降采样为 1
  pub fn new(image: ImageInfo) -> Self {
    let viewport = Viewport {
      image_path: image.path.clone(),
      rect: Rect::new(0.0, 0.0, image.width as f64, image.height as f64),
      downsample: 1.0,
      plane: Plane::default(),
    };
    MemoryScene {
      image,
      viewport: RwLock::new(viewport),
      state: Mutex::new(SceneState::default()),
      subscribers: Mutex::new(Vec::new()),
    }
  }

  pub fn set_viewport(&self, viewport: Viewport) {
    *self.viewport.write() = viewport;
  }

  pub fn classifications(&self) -> Vec<Classification> {
    self.state.lock().classifications.clone()
  }

  /// 不触发事件地放入对象
  pub fn insert_quietly(&self, objects: Vec<Annotation>) {
    self.state.lock().objects.extend(objects);
  }

  pub fn notify_changing(&self) {
    self.notify(SceneEvent::Changing);
  }

  fn notify(&self, event: SceneEvent) {
    let mut subscribers = self.subscribers.lock();
    subscribers.retain(|tx| tx.send(event.clone()).is_ok());
  }
}

fn flatten(objects: &[Annotation], out: &mut Vec<Annotation>) {
  for object in objects {
    out.push(object.clone());
    flatten(&object.children, out);
  }
}

fn remove_recursive(objects: &mut Vec<Annotation>, ids: &[ObjectId]) {
  objects.retain(|o| !ids.contains(&o.id));
  for object in objects.iter_mut() {
    remove_recursive(&mut object.children, ids);
  }
}

fn find_mut(objects: &mut [Annotation], id: ObjectId) -> Option<&mut Annotation> {
  for object in objects.iter_mut() {
    if object.id == id {
      return Some(object);
    }
    if let Some(found) = find_mut(&mut object.children, id) {
      return Some(found);
    }
  }
  None
}

impl SceneHost for MemoryScene {
  fn image(&self) -> Option<ImageInfo> {
    Some(self.image.clone())
  }

  fn viewport(&self) -> Option<Viewport> {
    Some(self.viewport.read().clone())
  }

  fn annotations(&self) -> Vec<Annotation> {
    let state = self.state.lock();
    let mut out = Vec::with_capacity(state.objects.len());
    flatten(&state.objects, &mut out);
    out
  }

  fn selected(&self) -> Vec<Annotation> {
    let state = self.state.lock();
    let mut all = Vec::new();
    flatten(&state.objects, &mut all);
    all
      .into_iter()
      .filter(|o| state.selected.contains(&o.id))
      .collect()
  }

  fn add_objects(&self, objects: Vec<Annotation>) {
    if objects.is_empty() {
      return;
    }
    debug!("场景新增 {} 个对象", objects.len());
    self.state.lock().objects.extend(objects.iter().cloned());
    self.notify(SceneEvent::ObjectsAdded(objects));
  }

  fn remove_objects(&self, ids: &[ObjectId]) {
    if ids.is_empty() {
      return;
    }
    {
      let mut state = self.state.lock();
      remove_recursive(&mut state.objects, ids);
      state.selected.retain(|id| !ids.contains(id));
    }
    self.notify(SceneEvent::ObjectsRemoved(ids.to_vec()));
  }

  fn set_selected(&self, ids: &[ObjectId]) {
    self.state.lock().selected = ids.to_vec();
  }

  fn clear_objects(&self) {
    let ids: Vec<ObjectId> = {
      let mut state = self.state.lock();
      state.selected.clear();
      state.objects.drain(..).map(|o| o.id).collect()
    };
    if !ids.is_empty() {
      self.notify(SceneEvent::ObjectsRemoved(ids));
    }
  }

  fn reclassify(&self, id: ObjectId, classification: Option<Classification>) {
    let mut state = self.state.lock();
    if let Some(object) = find_mut(&mut state.objects, id) {
      object.classification = classification;
    }
  }

  fn register_classifications(&self, classifications: &[Classification]) {
    let mut state = self.state.lock();
    for c in classifications {
      if !state.classifications.contains(c) {
        state.classifications.push(c.clone());
      }
    }
  }

  fn subscribe(&self) -> Receiver<SceneEvent> {
    let (tx, rx) = unbounded();
    self.subscribers.lock().push(tx);
    rx
  }
}
