// 该文件是 Shanan （山南西风） 项目的一部分。
// src/session.rs - 标注会话：提交任务并把结果写回场景
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

//! 会话持有配置、调度器与当前绑定的场景。输入错误在提交前同步返回，
//! 任务结果在工作线程上写回场景。
//!
//! 实时模式下，场景中每新增一批对象都会触发一次检测；重叠的触发不会合并。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded, select};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SamConfig;
use crate::model::{SamService, SamType, SamWeights};
use crate::raster::RasterSource;
use crate::region::{RegionError, SourceRegion};
use crate::scene::{Annotation, Classification, ObjectId, SceneEvent, SceneHost};
use crate::scheduler::{Scheduler, SchedulerError, SchedulerEvent};
use crate::task::{
  AutoMaskTask, CancelDownloadTask, DetectionTask, DownloadProgressTask, FetchWeightsTask,
  RegisterWeightsTask, SequenceInput, SequenceOutput, SequenceTask, TaskError, TaskHandle,
  TextPromptTask,
};

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("会话未绑定场景")]
  Detached,
  #[error("没有可用的图像")]
  NoImage,
  #[error("视图图像 {viewer} 与数据源 {raster} 不一致")]
  ImageMismatch { viewer: String, raster: String },
  #[error("没有前景对象")]
  NoPrompts,
  #[error("{0} 不支持序列预测")]
  NotVideoModel(SamType),
  #[error("{0} 不支持文本提示")]
  NotTextModel(SamType),
  #[error("区域错误: {0}")]
  Region(#[from] RegionError),
  #[error("任务错误: {0}")]
  Task(#[from] TaskError),
  #[error("调度错误: {0}")]
  Scheduler(#[from] SchedulerError),
  #[error("无法启动监听线程: {0}")]
  Spawn(#[from] std::io::Error),
}

#[derive(Clone)]
struct Binding {
  host: Arc<dyn SceneHost>,
  raster: Arc<dyn RasterSource>,
}

struct Listener {
  stop: Sender<()>,
  handle: JoinHandle<()>,
}

struct SessionInner {
  config: RwLock<SamConfig>,
  service: Arc<dyn SamService>,
  scheduler: Scheduler,
  binding: RwLock<Option<Binding>>,
  live: AtomicBool,
  listener: Mutex<Option<Listener>>,
  weights: RwLock<Vec<SamWeights>>,
}

#[derive(Clone)]
pub struct SamSession {
  inner: Arc<SessionInner>,
}

/// 检测类结果：移除提示对象（除非保留）后加入并选中结果
fn apply_detection(host: &dyn SceneHost, objects: &[Annotation], prompts: &[ObjectId], keep_prompts: bool) {
  if objects.is_empty() {
    warn!("没有检测到对象");
    return;
  }
  if !keep_prompts {
    host.set_selected(&[]);
    host.remove_objects(prompts);
  }
  let ids: Vec<ObjectId> = objects.iter().map(|o| o.id).collect();
  host.add_objects(objects.to_vec());
  host.set_selected(&ids);
}

fn apply_sequence(host: &dyn SceneHost, output: &SequenceOutput, prompts: &[ObjectId], keep_prompts: bool) {
  if !keep_prompts {
    host.remove_objects(prompts);
  }
  host.register_classifications(&output.classifications);
  let ids: Vec<ObjectId> = output.objects.iter().map(|o| o.id).collect();
  host.add_objects(output.objects.clone());
  host.set_selected(&ids);
}

fn viewer_region(binding: &Binding) -> Result<SourceRegion, SessionError> {
  let image = binding.host.image().ok_or(SessionError::NoImage)?;
  let viewport = binding.host.viewport().ok_or(SessionError::NoImage)?;
  let raster = binding.raster.path();
  if image.path != raster || viewport.image_path != raster {
    return Err(SessionError::ImageMismatch {
      viewer: viewport.image_path,
      raster: raster.to_string(),
    });
  }
  let region = SourceRegion::from_viewport(&viewport, binding.raster.bounds())?;
  region.ensure_not_empty()?;
  Ok(region)
}

impl SessionInner {
  fn binding(&self) -> Result<Binding, SessionError> {
    self.binding.read().clone().ok_or(SessionError::Detached)
  }

  fn run_prompt(&self) -> Result<TaskHandle, SessionError> {
    let binding = self.binding()?;
    let config = self.config.read().clone();
    if config.prompt_mode.is_sequence() {
      return self.submit_sequence(&binding, &config);
    }
    let selected = binding.host.selected();
    let selector = config.selector();
    let foreground = selector.foreground(&selected);
    let background = selector.background(&selected);
    self.submit_detection(&binding, &config, foreground, background)
  }

  fn submit_detection(
    &self,
    binding: &Binding,
    config: &SamConfig,
    foreground: Vec<Annotation>,
    background: Vec<Annotation>,
  ) -> Result<TaskHandle, SessionError> {
    if foreground.is_empty() {
      info!("没有前景对象");
      return Err(SessionError::NoPrompts);
    }
    let viewer = viewer_region(binding)?;
    let prompts: Vec<ObjectId> = foreground.iter().map(|o| o.id).collect();
    debug!("{} 个前景, {} 个背景提示", foreground.len(), background.len());
    let task = DetectionTask {
      service: self.service.clone(),
      raster: binding.raster.clone(),
      viewer,
      foreground,
      background,
      options: config.inference(),
      padding: config.padding(),
      classification: config.classification.detection.clone(),
    };
    let host = binding.host.clone();
    let keep_prompts = config.keep_prompts;
    let handle = self.scheduler.submit_with(task, move |objects: &Vec<Annotation>| {
      apply_detection(host.as_ref(), objects, &prompts, keep_prompts)
    })?;
    Ok(handle)
  }

  fn submit_sequence(&self, binding: &Binding, config: &SamConfig) -> Result<TaskHandle, SessionError> {
    if !config.model.is_video_compatible() {
      return Err(SessionError::NotVideoModel(config.model));
    }
    let viewer = viewer_region(binding)?;
    let selected = binding.host.selected();
    let existing = binding.host.annotations();
    let task = SequenceTask::prepare(
      self.service.clone(),
      binding.raster.clone(),
      SequenceInput {
        viewer: &viewer,
        selected: &selected,
        existing: &existing,
        mode: config.prompt_mode,
        settings: &config.sequence,
        selector: config.selector(),
      },
      config.inference(),
    )?;
    info!("序列任务: {} 帧, {} 个提示对象", task.frame_count(), task.prompt_ids().len());
    let prompts = task.prompt_ids().to_vec();
    let host = binding.host.clone();
    let keep_prompts = config.keep_prompts;
    let handle = self.scheduler.submit_with(task, move |output: &SequenceOutput| {
      apply_sequence(host.as_ref(), output, &prompts, keep_prompts)
    })?;
    Ok(handle)
  }

  fn fetch_weights(self: &Arc<Self>, model: SamType) -> Result<TaskHandle, SessionError> {
    let weak = Arc::downgrade(self);
    let task = FetchWeightsTask {
      service: self.service.clone(),
      model,
    };
    let handle = self.scheduler.submit_with(task, move |weights: &Vec<SamWeights>| {
      if let Some(inner) = weak.upgrade() {
        *inner.weights.write() = weights.clone();
      }
    })?;
    Ok(handle)
  }

  /// 只处理新增事件；批量修改过程中的通知被忽略
  fn handle_scene_event(&self, event: SceneEvent) -> Option<TaskHandle> {
    let SceneEvent::ObjectsAdded(mut added) = event else {
      return None;
    };
    let binding = self.binding.read().clone()?;
    let config = self.config.read().clone();
    if config.force_background_points {
      for object in added.iter_mut().filter(|o| o.roi.is_points() && !o.is_ignored()) {
        debug!("对象 {} 改为背景点", object.id);
        binding.host.reclassify(object.id, Some(Classification::ignore()));
        object.classification = Some(Classification::ignore());
      }
    }
    if !self.live.load(Ordering::SeqCst) {
      return None;
    }

    let selector = config.selector();
    let foreground = selector.foreground(&added);
    if foreground.is_empty() {
      return None;
    }
    let background = selector.background(&binding.host.annotations());
    match self.submit_detection(&binding, &config, foreground, background) {
      Ok(handle) => Some(handle),
      Err(e) => {
        warn!("实时模式提交失败: {}", e);
        None
      }
    }
  }

  fn stop_listener(&self) {
    let Some(listener) = self.listener.lock().take() else {
      return;
    };
    let _ = listener.stop.send(());
    if listener.handle.thread().id() == std::thread::current().id() {
      return;
    }
    if listener.handle.join().is_err() {
      warn!("场景监听线程异常退出");
    }
  }
}

impl Drop for SessionInner {
  fn drop(&mut self) {
    self.stop_listener();
  }
}

fn listen(events: Receiver<SceneEvent>, stop: Receiver<()>, session: Weak<SessionInner>) {
  loop {
    select! {
      recv(events) -> event => {
        let Ok(event) = event else { break };
        let Some(inner) = session.upgrade() else { break };
        inner.handle_scene_event(event);
      }
      recv(stop) -> _ => break,
    }
  }
  debug!("场景监听线程退出");
}

impl SamSession {
  /// 进度查询会一直占用一个工作线程，因此至少启动两个
  pub fn new(config: SamConfig, service: Arc<dyn SamService>) -> Result<Self, SessionError> {
    let scheduler = Scheduler::new(config.workers.max(2))?;
    Ok(SamSession {
      inner: Arc::new(SessionInner {
        config: RwLock::new(config),
        service,
        scheduler,
        binding: RwLock::new(None),
        live: AtomicBool::new(false),
        listener: Mutex::new(None),
        weights: RwLock::new(Vec::new()),
      }),
    })
  }

  pub fn config(&self) -> SamConfig {
    self.inner.config.read().clone()
  }

  /// 修改只影响之后提交的任务
  pub fn update_config(&self, f: impl FnOnce(&mut SamConfig)) {
    f(&mut self.inner.config.write());
  }

  pub fn scheduler(&self) -> &Scheduler {
    &self.inner.scheduler
  }

  pub fn subscribe(&self) -> Receiver<SchedulerEvent> {
    self.inner.scheduler.subscribe()
  }

  /// 绑定场景与其图像数据，并开始监听场景变化。已有绑定先解除。
  pub fn attach(&self, host: Arc<dyn SceneHost>, raster: Arc<dyn RasterSource>) -> Result<(), SessionError> {
    self.detach();
    let events = host.subscribe();
    let (stop_tx, stop_rx) = bounded(1);
    let weak = Arc::downgrade(&self.inner);
    let handle = std::thread::Builder::new()
      .name("sam-scene-listener".into())
      .spawn(move || listen(events, stop_rx, weak))?;
    info!("会话绑定图像 {}", raster.path());
    *self.inner.binding.write() = Some(Binding { host, raster });
    *self.inner.listener.lock() = Some(Listener {
      stop: stop_tx,
      handle,
    });
    Ok(())
  }

  pub fn detach(&self) {
    self.inner.stop_listener();
    if self.inner.binding.write().take().is_some() {
      info!("会话解除绑定");
    }
  }

  pub fn is_live(&self) -> bool {
    self.inner.live.load(Ordering::SeqCst)
  }

  /// 开启时立即按当前选择运行一次；没有可用提示时不提交任务
  pub fn set_live_mode(&self, enabled: bool) -> Result<Option<TaskHandle>, SessionError> {
    let was = self.inner.live.swap(enabled, Ordering::SeqCst);
    if !enabled || was {
      return Ok(None);
    }
    info!("开启实时模式");
    match self.inner.run_prompt() {
      Ok(handle) => Ok(Some(handle)),
      Err(SessionError::NoPrompts) => Ok(None),
      Err(e) => Err(e),
    }
  }

  /// 按提示模式对当前选择运行检测或序列传播
  pub fn run_prompt(&self) -> Result<TaskHandle, SessionError> {
    self.inner.run_prompt()
  }

  /// 使用给定对象作为提示运行单帧检测
  pub fn run_prompt_for(
    &self,
    foreground: Vec<Annotation>,
    background: Vec<Annotation>,
  ) -> Result<TaskHandle, SessionError> {
    let binding = self.inner.binding()?;
    let config = self.config();
    self.inner.submit_detection(&binding, &config, foreground, background)
  }

  pub fn run_sequence(&self) -> Result<TaskHandle, SessionError> {
    let binding = self.inner.binding()?;
    let config = self.config();
    self.inner.submit_sequence(&binding, &config)
  }

  /// 对当前视口做自动分割；按配置先清空场景，结果不选中
  pub fn run_auto_mask(&self) -> Result<TaskHandle, SessionError> {
    let binding = self.inner.binding()?;
    let config = self.config();
    let task = AutoMaskTask {
      service: self.inner.service.clone(),
      raster: binding.raster.clone(),
      region: viewer_region(&binding)?,
      settings: config.auto_mask.clone(),
      options: config.inference(),
      classification: config.auto_mask_classification(),
    };
    let host = binding.host.clone();
    let clear = config.clear_on_auto_mask;
    let handle = self.inner.scheduler.submit_with(task, move |objects: &Vec<Annotation>| {
      if clear {
        host.clear_objects();
      }
      host.add_objects(objects.clone());
      host.set_selected(&[]);
    })?;
    Ok(handle)
  }

  /// 选中的非忽略类对象作为正框，忽略类作为负框；点与线不参与
  pub fn run_text_prompt(&self, text: Option<String>) -> Result<TaskHandle, SessionError> {
    let binding = self.inner.binding()?;
    let config = self.config();
    if config.model != SamType::Sam3 {
      return Err(SessionError::NotTextModel(config.model));
    }
    let region = viewer_region(&binding)?;
    let (negative, positive): (Vec<Annotation>, Vec<Annotation>) = binding
      .host
      .selected()
      .into_iter()
      .filter(|o| !o.roi.is_points() && !o.roi.is_line())
      .partition(Annotation::is_ignored);
    let prompts: Vec<ObjectId> = positive.iter().chain(&negative).map(|o| o.id).collect();
    let task = TextPromptTask {
      service: self.inner.service.clone(),
      raster: binding.raster.clone(),
      region,
      text,
      positive,
      negative,
      reset_prompts: config.text_prompt.reset_prompts,
      confidence_threshold: config.text_prompt.confidence_threshold,
      options: config.inference(),
      classification: config.classification.text_prompt.clone(),
    };
    let host = binding.host.clone();
    let keep_prompts = config.keep_prompts;
    let handle = self.inner.scheduler.submit_with(task, move |objects: &Vec<Annotation>| {
      apply_detection(host.as_ref(), objects, &prompts, keep_prompts)
    })?;
    Ok(handle)
  }

  /// 最近一次成功获取的权重列表
  pub fn available_weights(&self) -> Vec<SamWeights> {
    self.inner.weights.read().clone()
  }

  pub fn fetch_weights(&self, model: SamType) -> Result<TaskHandle, SessionError> {
    self.inner.fetch_weights(model)
  }

  /// 登记权重并同时轮询下载进度；登记结束后停止轮询，成功时刷新权重列表
  pub fn register_weights(&self, weights: SamWeights) -> Result<TaskHandle, SessionError> {
    let progress = self.watch_download()?;

    let weak = Arc::downgrade(&self.inner);
    let task = RegisterWeightsTask {
      service: self.inner.service.clone(),
      weights,
    };
    let register = match self.inner.scheduler.submit_with(task, move |reply: &String| {
      info!("{}", reply);
      let Some(inner) = weak.upgrade() else {
        return;
      };
      let model = inner.config.read().model;
      if let Err(e) = inner.fetch_weights(model) {
        warn!("刷新权重列表失败: {}", e);
      }
    }) {
      Ok(handle) => handle,
      Err(e) => {
        progress.cancel();
        return Err(e.into());
      }
    };

    let watched = register.clone();
    let spawned = std::thread::Builder::new()
      .name("sam-weights-watch".into())
      .spawn(move || {
        watched.wait();
        progress.cancel();
      });
    if let Err(e) = spawned {
      register.cancel();
      return Err(e.into());
    }
    Ok(register)
  }

  /// 轮询服务端的下载进度，直到任务被取消
  pub fn watch_download(&self) -> Result<TaskHandle, SessionError> {
    let task = DownloadProgressTask {
      service: self.inner.service.clone(),
      interval: self.config().progress_interval(),
    };
    Ok(self.inner.scheduler.submit(task)?)
  }

  pub fn cancel_download(&self) -> Result<TaskHandle, SessionError> {
    let task = CancelDownloadTask {
      service: self.inner.service.clone(),
    };
    Ok(self.inner.scheduler.submit(task)?)
  }

  pub fn cancel_all(&self) {
    self.inner.scheduler.cancel_all();
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::geometry::{Plane, Point, Rect};
  use crate::model::PromptMode;
  use crate::scene::{ImageInfo, MemoryScene, Roi};
  use crate::task::TaskState;
  use crate::task::testing::{MockService, PIXEL_AT_10, TWO_OVERLAPPING, raster};

  fn scene() -> Arc<MemoryScene> {
    Arc::new(MemoryScene::new(ImageInfo {
      path: "memory.png".into(),
      width: 64,
      height: 64,
    }))
  }

  fn point(x: f64, y: f64) -> Annotation {
    Annotation::new(Roi::Points {
      points: vec![Point::new(x, y)],
      plane: Plane::default(),
    })
  }

  fn session(service: Arc<MockService>, scene: &Arc<MemoryScene>) -> SamSession {
    let config = SamConfig {
      workers: 2,
      set_names: false,
      random_colors: false,
      ..Default::default()
    };
    let session = SamSession::new(config, service).expect("session");
    session.attach(scene.clone(), raster(64, 64, 1)).expect("attach");
    session
  }

  fn wait(handle: &TaskHandle) -> TaskState {
    handle.wait_timeout(Duration::from_secs(5)).expect("task did not finish")
  }

  #[test]
  fn detection_replaces_prompts_with_results() {
    let service = Arc::new(MockService::with_responses(vec![Ok(PIXEL_AT_10.into())]));
    let scene = scene();
    let session = session(service, &scene);
    let prompt = point(10.0, 10.0);
    let prompt_id = prompt.id;
    scene.insert_quietly(vec![prompt]);
    scene.set_selected(&[prompt_id]);

    let handle = session.run_prompt().expect("submit");
    assert_eq!(wait(&handle), TaskState::Succeeded);

    let objects = scene.annotations();
    assert_eq!(objects.len(), 1);
    assert_ne!(objects[0].id, prompt_id);
    assert_eq!(scene.selected()[0].id, objects[0].id);
  }

  #[test]
  fn keep_prompts_leaves_prompt_objects() {
    let service = Arc::new(MockService::with_responses(vec![Ok(PIXEL_AT_10.into())]));
    let scene = scene();
    let session = session(service, &scene);
    session.update_config(|c| c.keep_prompts = true);
    let prompt = point(10.0, 10.0);
    let prompt_id = prompt.id;
    scene.insert_quietly(vec![prompt]);
    scene.set_selected(&[prompt_id]);

    let handle = session.run_prompt().expect("submit");
    assert_eq!(wait(&handle), TaskState::Succeeded);
    assert_eq!(scene.annotations().len(), 2);
  }

  #[test]
  fn empty_selection_is_rejected_before_submission() {
    let service = Arc::new(MockService::default());
    let scene = scene();
    let session = session(service.clone(), &scene);
    assert!(matches!(session.run_prompt(), Err(SessionError::NoPrompts)));
    assert!(service.requests.lock().is_empty());
    assert!(session.scheduler().in_flight().is_empty());
  }

  #[test]
  fn mismatched_raster_is_an_input_error() {
    let scene = Arc::new(MemoryScene::new(ImageInfo {
      path: "other.png".into(),
      width: 64,
      height: 64,
    }));
    let session = session(Arc::new(MockService::default()), &scene);
    let prompt = point(10.0, 10.0);
    let id = prompt.id;
    scene.insert_quietly(vec![prompt]);
    scene.set_selected(&[id]);
    assert!(matches!(session.run_prompt(), Err(SessionError::ImageMismatch { .. })));
  }

  #[test]
  fn detached_session_refuses_work() {
    let session = SamSession::new(SamConfig::default(), Arc::new(MockService::default())).expect("session");
    assert!(matches!(session.run_auto_mask(), Err(SessionError::Detached)));
  }

  #[test]
  fn sequence_needs_a_video_model() {
    let scene = scene();
    let session = session(Arc::new(MockService::default()), &scene);
    session.update_config(|c| {
      c.prompt_mode = PromptMode::Xyz;
      c.model = SamType::VitL;
    });
    assert!(matches!(session.run_prompt(), Err(SessionError::NotVideoModel(SamType::VitL))));
  }

  #[test]
  fn text_prompt_needs_sam3() {
    let scene = scene();
    let session = session(Arc::new(MockService::default()), &scene);
    assert!(matches!(
      session.run_text_prompt(Some("cell".into())),
      Err(SessionError::NotTextModel(_))
    ));
  }

  #[test]
  fn auto_mask_clears_scene_and_leaves_nothing_selected() {
    let service = Arc::new(MockService::with_responses(vec![Ok(TWO_OVERLAPPING.into())]));
    let scene = scene();
    let session = session(service, &scene);
    let old = point(1.0, 1.0);
    let old_id = old.id;
    scene.insert_quietly(vec![old]);
    scene.set_selected(&[old_id]);

    let handle = session.run_auto_mask().expect("submit");
    assert_eq!(wait(&handle), TaskState::Succeeded);
    let objects = scene.annotations();
    assert_eq!(objects.len(), 1);
    assert!((objects[0].roi.area() - 25.0).abs() < 1e-9);
    assert!(scene.selected().is_empty());
  }

  #[test]
  fn live_mode_detects_added_points() {
    let service = Arc::new(MockService::with_responses(vec![Ok(PIXEL_AT_10.into())]));
    let scene = scene();
    let session = session(service, &scene);
    assert!(session.set_live_mode(true).expect("live").is_none());

    let background = point(30.0, 30.0).with_classification(Some(Classification::ignore()));
    scene.insert_quietly(vec![background]);
    let added = point(10.0, 10.0);
    let handle = session
      .inner
      .handle_scene_event(SceneEvent::ObjectsAdded(vec![added]))
      .expect("submitted");
    assert_eq!(wait(&handle), TaskState::Succeeded);
  }

  #[test]
  fn changing_and_removal_events_are_ignored() {
    let scene = scene();
    let session = session(Arc::new(MockService::default()), &scene);
    session.set_live_mode(true).expect("live");
    assert!(session.inner.handle_scene_event(SceneEvent::Changing).is_none());
    assert!(session.inner.handle_scene_event(SceneEvent::ObjectsRemoved(vec![1])).is_none());
  }

  #[test]
  fn forced_background_points_do_not_trigger_detection() {
    let service = Arc::new(MockService::default());
    let scene = scene();
    let session = session(service.clone(), &scene);
    session.update_config(|c| c.force_background_points = true);
    session.set_live_mode(true).expect("live");

    let added = point(10.0, 10.0);
    let id = added.id;
    scene.insert_quietly(vec![added.clone()]);
    assert!(session.inner.handle_scene_event(SceneEvent::ObjectsAdded(vec![added])).is_none());
    let stored = scene.annotations();
    assert_eq!(stored[0].id, id);
    assert!(stored[0].is_ignored());
    assert!(service.requests.lock().is_empty());
  }

  #[test]
  fn attached_listener_reacts_to_scene_events() {
    let service = Arc::new(MockService::with_responses(vec![Ok(PIXEL_AT_10.into())]));
    let scene = scene();
    let session = session(service.clone(), &scene);
    session.set_live_mode(true).expect("live");

    let rect = Annotation::new(Roi::Rectangle {
      rect: Rect::new(5.0, 5.0, 10.0, 10.0),
      plane: Plane::default(),
    });
    scene.add_objects(vec![rect]);
    for _ in 0..100 {
      if !service.requests.lock().is_empty() {
        break;
      }
      std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(service.requests.lock().len(), 1);
    session.detach();
  }

  #[test]
  fn register_weights_refreshes_list_and_stops_polling() {
    let scene = scene();
    let session = session(Arc::new(MockService::default()), &scene);
    let handle = session
      .register_weights(SamWeights {
        model: "vit_l".into(),
        name: "custom".into(),
        url: "https://example.org/custom.pt".into(),
      })
      .expect("submit");
    assert_eq!(wait(&handle), TaskState::Succeeded);
    assert!(session.scheduler().wait_idle_timeout(Duration::from_secs(5)));
    let weights = session.available_weights();
    assert_eq!(weights.len(), 1);
    assert_eq!(weights[0].model, "vit_l");
  }
}
