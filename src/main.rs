// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 命令行标注客户端
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

mod args;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::Parser;
use crossbeam_channel::Receiver;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shanan_sam::{
  FromUrl,
  config::SamConfig,
  geometry::{Plane, Point, Rect},
  model::{PromptMode, SamService, SamType, SamWeights},
  output::{OutputWrapper, Render},
  raster::{ImageFileSource, RasterSource},
  scene::{Annotation, Classification, ImageInfo, MemoryScene, Roi, SceneHost},
  scheduler::SchedulerEvent,
  session::SamSession,
  task::{TaskHandle, TaskOutput, TaskState},
};

use args::{Args, BoxArg, Command, ImageIo, PointArg, WeightsAction};

fn init_tracing(level: &str) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// 中断时取消全部任务；30 秒内未退出则强制结束
fn install_interrupt(session: &SamSession) -> Result<()> {
  let session = session.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，取消进行中的任务...");
    session.cancel_all();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;
  Ok(())
}

fn log_events(events: Receiver<SchedulerEvent>) {
  for event in events {
    match event {
      SchedulerEvent::TaskMessage { id, message } => info!("任务 {}: {}", id, message),
      SchedulerEvent::TaskSucceeded {
        output: TaskOutput::Message(message),
        ..
      } => info!("{}", message),
      SchedulerEvent::TaskFailed {
        id,
        error,
        connection_failed: true,
        ..
      } => error!("任务 {} 连接失败: {}", id, error),
      SchedulerEvent::TaskCancelled {
        id,
        cause: Some(cause),
        ..
      } => warn!("任务 {} 已取消: {}", id, cause),
      _ => {}
    }
  }
}

struct Workspace {
  scene: Arc<MemoryScene>,
  output: OutputWrapper,
}

fn open_workspace(session: &SamSession, io: &ImageIo) -> Result<Workspace> {
  let raster = Arc::new(ImageFileSource::from_url(&io.input)?);
  let bounds = raster.bounds();
  let scene = Arc::new(MemoryScene::new(ImageInfo {
    path: raster.path().to_string(),
    width: bounds.width,
    height: bounds.height,
  }));
  if let Some(mut viewport) = scene.viewport() {
    viewport.plane = Plane::new(io.z, io.t);
    scene.set_viewport(viewport);
  }
  let output = OutputWrapper::from_url(&io.output)?;
  session.attach(scene.clone(), raster)?;
  Ok(Workspace { scene, output })
}

fn plane_of(io: &ImageIo) -> Plane {
  Plane::new(io.z, io.t)
}

fn point_object(p: &PointArg, plane: Plane) -> Annotation {
  Annotation::new(Roi::Points {
    points: vec![Point::new(p.x, p.y)],
    plane,
  })
}

fn box_object(b: &BoxArg, plane: Plane) -> Annotation {
  Annotation::new(Roi::Rectangle {
    rect: Rect::new(b.x, b.y, b.width, b.height),
    plane,
  })
}

/// 放入提示对象并全部选中
fn select_prompts(scene: &MemoryScene, prompts: Vec<Annotation>) {
  let ids: Vec<_> = prompts.iter().map(|o| o.id).collect();
  scene.insert_quietly(prompts);
  scene.set_selected(&ids);
}

fn finish(session: &SamSession, handle: &TaskHandle, workspace: Option<&Workspace>) -> Result<()> {
  let state = handle.wait();
  session.scheduler().wait_idle();
  match state {
    TaskState::Succeeded => {
      if let Some(Workspace { scene, output }) = workspace {
        let image = scene.image().ok_or_else(|| anyhow!("没有可用的图像"))?;
        output.render_result(&image, &scene.annotations())?;
      }
      Ok(())
    }
    TaskState::Cancelled => {
      warn!("任务已取消");
      Ok(())
    }
    _ => Err(anyhow!(
      "任务失败: {}",
      handle.error().unwrap_or_else(|| "未知错误".into())
    )),
  }
}

fn run_weights(session: &SamSession, action: WeightsAction) -> Result<()> {
  let model = session.config().model;
  match action {
    WeightsAction::List => {
      let handle = session.fetch_weights(model)?;
      finish(session, &handle, None)?;
      for weights in session.available_weights() {
        info!("  - {} ({}): {}", weights.name, weights.model, weights.url);
      }
      Ok(())
    }
    WeightsAction::Register { name, url } => {
      let handle = session.register_weights(SamWeights {
        model: model.model_name().to_string(),
        name,
        url: url.to_string(),
      })?;
      finish(session, &handle, None)
    }
    WeightsAction::Progress => {
      let handle = session.watch_download()?;
      finish(session, &handle, None)
    }
    WeightsAction::Cancel => {
      let handle = session.cancel_download()?;
      finish(session, &handle, None)
    }
  }
}

fn main() -> Result<()> {
  let args = Args::parse();
  init_tracing(&args.log_level);

  let mut config = match &args.config {
    Some(path) => SamConfig::load(path)?,
    None => SamConfig::default(),
  };
  args.apply(&mut config);
  info!("推理服务: {}", config.server.url);
  info!("模型: {}", config.model);

  let service: Arc<dyn SamService> = Arc::new(config.client()?);
  let session = SamSession::new(config, service)?;
  let events = session.subscribe();
  thread::spawn(move || log_events(events));
  install_interrupt(&session)?;

  match args.command {
    Command::Detect {
      io,
      points,
      background,
      boxes,
    } => {
      session.update_config(|c| c.prompt_mode = PromptMode::Xy);
      let workspace = open_workspace(&session, &io)?;
      let plane = plane_of(&io);
      let prompts = points
        .iter()
        .map(|p| point_object(p, plane))
        .chain(boxes.iter().map(|b| box_object(b, plane)))
        .chain(
          background
            .iter()
            .map(|p| point_object(p, plane).with_classification(Some(Classification::ignore()))),
        )
        .collect();
      select_prompts(&workspace.scene, prompts);
      let handle = session.run_prompt()?;
      finish(&session, &handle, Some(&workspace))
    }
    Command::Automask {
      io,
      points_per_side,
      min_mask_region_area,
      auto_class,
    } => {
      session.update_config(|c| {
        if let Some(n) = points_per_side {
          c.auto_mask.points_per_side = n;
        }
        if let Some(area) = min_mask_region_area {
          c.auto_mask.min_mask_region_area = area;
        }
        if auto_class.is_some() {
          c.auto_class = auto_class;
        }
      });
      let workspace = open_workspace(&session, &io)?;
      let handle = session.run_auto_mask()?;
      finish(&session, &handle, Some(&workspace))
    }
    Command::Text {
      io,
      text,
      boxes,
      negative,
      confidence,
      reset,
    } => {
      session.update_config(|c| {
        if c.model != SamType::Sam3 {
          info!("文本提示改用 sam3 模型");
          c.model = SamType::Sam3;
        }
        if let Some(threshold) = confidence {
          c.text_prompt.confidence_threshold = threshold;
        }
        c.text_prompt.reset_prompts |= reset;
      });
      let workspace = open_workspace(&session, &io)?;
      let plane = plane_of(&io);
      let prompts = boxes
        .iter()
        .map(|b| box_object(b, plane))
        .chain(
          negative
            .iter()
            .map(|b| box_object(b, plane).with_classification(Some(Classification::ignore()))),
        )
        .collect();
      select_prompts(&workspace.scene, prompts);
      let handle = session.run_text_prompt(text)?;
      finish(&session, &handle, Some(&workspace))
    }
    Command::Weights { action } => run_weights(&session, action),
  }
}
