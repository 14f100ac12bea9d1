// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/weights.rs - 权重管理端点
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

use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Server};
use serde_json::json;

use shanan_sam::{
  config::SamConfig,
  model::{SamService, SamType, SamWeights},
  scheduler::SchedulerEvent,
  session::SamSession,
  task::{TaskOutput, TaskState},
};

const WEIGHTS: &str = r#"[{"type": "sam2_l", "name": "default", "url": "https://example.org/sam2_l.pt"}]"#;

fn session(server: &Server) -> SamSession {
  let mut config = SamConfig {
    workers: 2,
    model: SamType::Sam2L,
    progress_interval_ms: 10,
    ..Default::default()
  };
  config.server.url = format!("{}/", server.url());
  let service: Arc<dyn SamService> = Arc::new(config.client().expect("client"));
  SamSession::new(config, service).expect("session")
}

#[test]
fn list_weights_for_configured_model() {
  let mut server = Server::new();
  let mock = server
    .mock("GET", "/sam/weights/")
    .match_query(Matcher::UrlEncoded("type".into(), "sam2_l".into()))
    .with_status(200)
    .with_body(WEIGHTS)
    .create();

  let session = session(&server);
  let handle = session.fetch_weights(SamType::Sam2L).expect("submit");
  assert_eq!(handle.wait_timeout(Duration::from_secs(10)), Some(TaskState::Succeeded));
  mock.assert();
  let weights = session.available_weights();
  assert_eq!(weights.len(), 1);
  assert_eq!(weights[0].name, "default");
}

#[test]
fn register_polls_progress_then_refreshes() {
  let mut server = Server::new();
  let register = server
    .mock("POST", "/sam/weights/")
    .match_body(Matcher::PartialJson(json!({
      "type": "sam2_l",
      "name": "custom",
      "url": "https://example.org/custom.pt"
    })))
    .with_status(200)
    .with_body("registered")
    .create();
  let _progress = server
    .mock("GET", "/sam/progress/")
    .with_status(200)
    .with_body(r#"{"message": "downloading", "percent": 50.0}"#)
    .create();
  let list = server
    .mock("GET", "/sam/weights/")
    .match_query(Matcher::UrlEncoded("type".into(), "sam2_l".into()))
    .with_status(200)
    .with_body(WEIGHTS)
    .create();

  let session = session(&server);
  let handle = session
    .register_weights(SamWeights {
      model: "sam2_l".into(),
      name: "custom".into(),
      url: "https://example.org/custom.pt".into(),
    })
    .expect("submit");
  assert_eq!(handle.wait_timeout(Duration::from_secs(10)), Some(TaskState::Succeeded));
  assert!(session.scheduler().wait_idle_timeout(Duration::from_secs(10)));
  register.assert();
  list.assert();
  assert_eq!(session.available_weights().len(), 1);
}

#[test]
fn cancel_download_reports_server_reply() {
  let mut server = Server::new();
  let mock = server
    .mock("GET", "/sam/weights/cancel/")
    .with_status(200)
    .with_body("download cancelled")
    .create();

  let session = session(&server);
  let events = session.subscribe();
  let handle = session.cancel_download().expect("submit");
  assert_eq!(handle.wait_timeout(Duration::from_secs(10)), Some(TaskState::Succeeded));
  assert!(session.scheduler().wait_idle_timeout(Duration::from_secs(10)));
  mock.assert();
  assert!(events.try_iter().any(|e| matches!(
    e,
    SchedulerEvent::TaskSucceeded {
      output: TaskOutput::Message(ref m),
      ..
    } if m == "download cancelled"
  )));
}
