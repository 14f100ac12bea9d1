// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/pipeline.rs - 经由 HTTP 的端到端分割流程
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

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};
use mockito::{Matcher, Server};
use serde_json::json;
use tempfile::TempDir;
use url::Url;

use shanan_sam::{
  FromUrl,
  config::SamConfig,
  geometry::{Plane, Point, Rect},
  model::{PromptMode, SamService, SamType},
  raster::{ImageFileSource, RasterSource},
  scene::{Annotation, Classification, ImageInfo, MemoryScene, Roi, SceneHost, Viewport},
  scheduler::SchedulerEvent,
  session::SamSession,
  task::{TaskHandle, TaskState},
};

const PIXEL_AT_10: &str = r#"{"type": "FeatureCollection", "features": [
  {"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[10, 10], [11, 10], [11, 11], [10, 11], [10, 10]]]}, "properties": {"quality": 0.9}}
]}"#;

const TWO_OVERLAPPING: &str = r#"{"type": "FeatureCollection", "features": [
  {"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [20, 0], [20, 20], [0, 20], [0, 0]]]}, "properties": {"quality": 0.8}},
  {"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[5, 5], [10, 5], [10, 10], [5, 10], [5, 5]]]}, "properties": {"quality": 0.7}}
]}"#;

const PROPAGATED: &str = r#"{"type": "FeatureCollection", "features": [
  {"type": "Feature", "geometry": {"type": "Polygon", "plane": {"z": 2, "t": 0}, "coordinates": [[[2, 2], [6, 2], [6, 6], [2, 2]]]}, "properties": {"object_idx": "0"}}
]}"#;

fn image_url(path: &Path) -> Url {
  Url::parse(&format!("image://{}", path.display())).expect("image url")
}

fn write_image(path: &Path, width: u32, height: u32) {
  RgbImage::from_pixel(width, height, Rgb([40, 80, 120]))
    .save(path)
    .expect("save image");
}

struct Fixture {
  _dir: TempDir,
  scene: Arc<MemoryScene>,
  session: SamSession,
}

fn fixture(server: &Server, url: impl FnOnce(&Path) -> Url, configure: impl FnOnce(&mut SamConfig)) -> Fixture {
  let dir = tempfile::tempdir().expect("tempdir");
  let raster = Arc::new(ImageFileSource::from_url(&url(dir.path())).expect("raster"));
  let bounds = raster.bounds();
  let scene = Arc::new(MemoryScene::new(ImageInfo {
    path: raster.path().to_string(),
    width: bounds.width,
    height: bounds.height,
  }));

  let mut config = SamConfig {
    workers: 2,
    set_names: false,
    random_colors: false,
    ..Default::default()
  };
  config.server.url = server.url();
  configure(&mut config);
  let service: Arc<dyn SamService> = Arc::new(config.client().expect("client"));
  let session = SamSession::new(config, service).expect("session");
  session.attach(scene.clone(), raster).expect("attach");
  Fixture {
    _dir: dir,
    scene,
    session,
  }
}

fn single_image(server: &Server, configure: impl FnOnce(&mut SamConfig)) -> Fixture {
  fixture(
    server,
    |dir| {
      let path = dir.join("slide.png");
      write_image(&path, 400, 400);
      image_url(&path)
    },
    configure,
  )
}

fn select(scene: &MemoryScene, objects: Vec<Annotation>) {
  let ids: Vec<_> = objects.iter().map(|o| o.id).collect();
  scene.insert_quietly(objects);
  scene.set_selected(&ids);
}

fn wait(handle: &TaskHandle) -> TaskState {
  handle
    .wait_timeout(Duration::from_secs(10))
    .expect("task did not finish")
}

#[test]
fn point_prompt_round_trips_through_downsampled_viewport() {
  let mut server = Server::new();
  let mock = server
    .mock("POST", "/sam/")
    .match_body(Matcher::PartialJson(json!({
      "type": "vit_l",
      "point_coords": [[10, 10]],
      "point_labels": [1]
    })))
    .with_status(200)
    .with_header("content-type", "application/json")
    .with_body(PIXEL_AT_10)
    .create();

  let f = single_image(&server, |_| {});
  let path = f.scene.image().expect("image").path;
  f.scene.set_viewport(Viewport {
    image_path: path,
    rect: Rect::new(100.0, 200.0, 128.0, 128.0),
    downsample: 2.0,
    plane: Plane::default(),
  });
  let prompt = Annotation::new(Roi::Points {
    points: vec![Point::new(120.0, 220.0)],
    plane: Plane::default(),
  });
  let prompt_id = prompt.id;
  select(&f.scene, vec![prompt]);

  let handle = f.session.run_prompt().expect("submit");
  assert_eq!(wait(&handle), TaskState::Succeeded);
  mock.assert();

  let objects = f.scene.annotations();
  assert_eq!(objects.len(), 1);
  assert_ne!(objects[0].id, prompt_id);
  let bounds = objects[0].roi.bounds().expect("bounds");
  assert!((bounds.x - 120.0).abs() < 1e-9);
  assert!((bounds.y - 220.0).abs() < 1e-9);
}

#[test]
fn automask_keeps_smallest_feature() {
  let mut server = Server::new();
  let mock = server
    .mock("POST", "/sam/automask/")
    .match_body(Matcher::PartialJson(json!({
      "min_mask_region_area": 0,
      "output_type": "Multi-mask (smallest)"
    })))
    .with_status(200)
    .with_body(TWO_OVERLAPPING)
    .create();

  let f = single_image(&server, |_| {});
  let handle = f.session.run_auto_mask().expect("submit");
  assert_eq!(wait(&handle), TaskState::Succeeded);
  mock.assert();

  let objects = f.scene.annotations();
  assert_eq!(objects.len(), 1);
  assert!((objects[0].roi.area() - 25.0).abs() < 1e-9);
  assert!(f.scene.selected().is_empty());
}

#[test]
fn server_error_fails_task_and_keeps_prompts() {
  let mut server = Server::new();
  let _mock = server
    .mock("POST", "/sam/")
    .with_status(500)
    .with_body("model not loaded")
    .create();

  let f = single_image(&server, |_| {});
  let events = f.session.subscribe();
  let prompt = Annotation::new(Roi::Points {
    points: vec![Point::new(50.0, 50.0)],
    plane: Plane::default(),
  });
  select(&f.scene, vec![prompt]);

  let handle = f.session.run_prompt().expect("submit");
  assert_eq!(wait(&handle), TaskState::Failed);
  assert!(f.session.scheduler().wait_idle_timeout(Duration::from_secs(10)));
  assert!(handle.error().expect("error").contains("500"));
  assert!(events.try_iter().any(|e| matches!(
    e,
    SchedulerEvent::TaskFailed {
      connection_failed: true,
      ..
    }
  )));
  assert_eq!(f.scene.annotations().len(), 1);
}

#[test]
fn sequence_uploads_frames_and_registers_new_classes() {
  let mut server = Server::new();
  let uploads = server
    .mock("POST", "/sam/upload/")
    .with_status(200)
    .with_body("ok")
    .expect(3)
    .create();
  let video = server
    .mock("POST", "/sam/video/")
    .match_body(Matcher::PartialJson(json!({
      "type": "sam2_s",
      "axes": "XYZ",
      "plane_position": 0
    })))
    .with_status(200)
    .with_body(PROPAGATED)
    .create();

  let f = fixture(
    &server,
    |dir| {
      let stack = dir.join("stack");
      std::fs::create_dir(&stack).expect("mkdir");
      for name in ["00.png", "01.png", "02.png"] {
        write_image(&stack.join(name), 32, 32);
      }
      let url = Url::from_directory_path(&stack).expect("dir url");
      Url::parse(&format!("image://{}", url.path())).expect("image url")
    },
    |config| {
      config.model = SamType::Sam2S;
      config.prompt_mode = PromptMode::Xyz;
      config.sequence.from_index = 0;
      config.sequence.to_index = 2;
    },
  );
  let prompt = Annotation::new(Roi::Points {
    points: vec![Point::new(5.0, 5.0)],
    plane: Plane::new(1, 0),
  });
  select(&f.scene, vec![prompt]);

  let handle = f.session.run_prompt().expect("submit");
  assert_eq!(wait(&handle), TaskState::Succeeded);
  uploads.assert();
  video.assert();

  let objects = f.scene.annotations();
  assert_eq!(objects.len(), 1);
  assert_eq!(objects[0].roi.plane(), Plane::new(2, 0));
  assert_eq!(objects[0].classification, Some(Classification::new("SAM0")));
  assert_eq!(f.scene.classifications(), vec![Classification::new("SAM0")]);
}
