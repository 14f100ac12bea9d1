// 该文件是 Shanan （山南西风） 项目的一部分。
// src/client.rs - 推理服务 HTTP 客户端
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

use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response, multipart};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::FromUrl;
use crate::model::{DetectionRequest, SamProgress, SamService, SamType, SamWeights};

#[derive(Error, Debug)]
pub enum ClientError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("URL 解析错误: {0}")]
  Url(#[from] url::ParseError),
  #[error("HTTP 请求错误: {0}")]
  Http(#[from] reqwest::Error),
  #[error("服务返回状态 {status}: {body}")]
  Status { status: u16, body: String },
  #[error("JSON 错误: {0}")]
  Json(#[from] serde_json::Error),
}

/// 保证路径以 `/` 结尾，避免 `join` 丢掉最后一段
pub fn ensure_trailing_slash(url: &Url) -> Url {
  let mut url = url.clone();
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  url
}

pub struct InferenceClientBuilder {
  base: Url,
  verify_ssl: bool,
  timeout: Option<Duration>,
}

impl FromUrl for InferenceClientBuilder {
  type Error = ClientError;

  /// `http(s)://host:port/prefix/?verify_ssl=true&timeout=60`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != "http" && url.scheme() != "https" {
      error!("URI 方案不匹配: 需要 http/https, 实际为 '{}'", url.scheme());
      return Err(ClientError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut builder = InferenceClientBuilder::new(url);
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "verify_ssl" => builder.verify_ssl = v == "true" || v == "1",
        "timeout" => builder.timeout = v.parse().ok().map(Duration::from_secs),
        _ => debug!("忽略未知的查询参数: {}={}", k, v),
      }
    }
    Ok(builder)
  }
}

impl InferenceClientBuilder {
  pub fn new(base: &Url) -> Self {
    let mut base = ensure_trailing_slash(base);
    base.set_query(None);
    InferenceClientBuilder {
      base,
      verify_ssl: false,
      timeout: None,
    }
  }

  pub fn verify_ssl(mut self, verify_ssl: bool) -> Self {
    self.verify_ssl = verify_ssl;
    self
  }

  pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn build(self) -> Result<InferenceClient, ClientError> {
    if !self.verify_ssl {
      debug!("已关闭 TLS 证书校验");
    }
    let http = Client::builder()
      .danger_accept_invalid_certs(!self.verify_ssl)
      .timeout(self.timeout)
      .build()?;
    info!("推理服务地址: {}", self.base);
    Ok(InferenceClient {
      base: self.base,
      http,
    })
  }
}

/// 阻塞式推理客户端，所有端点都位于同一个基地址之下
pub struct InferenceClient {
  base: Url,
  http: Client,
}

impl InferenceClient {
  pub fn base(&self) -> &Url {
    &self.base
  }

  pub fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
    Ok(self.base.join(path)?)
  }

  fn finish(&self, url: &Url, started: Instant, response: Response) -> Result<String, ClientError> {
    let status = response.status();
    let body = response.text()?;
    info!("{} -> {}，耗时: {:.2?}", url, status, started.elapsed());
    if status.is_success() {
      Ok(body)
    } else {
      error!("服务返回错误状态 {}: {}", status, body);
      Err(ClientError::Status {
        status: status.as_u16(),
        body,
      })
    }
  }

  pub fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<String, ClientError> {
    let url = self.endpoint(path)?;
    let started = Instant::now();
    let response = self.http.post(url.clone()).json(body).send()?;
    self.finish(&url, started, response)
  }

  pub fn get(&self, path: &str) -> Result<String, ClientError> {
    let url = self.endpoint(path)?;
    let started = Instant::now();
    let response = self.http.get(url.clone()).send()?;
    self.finish(&url, started, response)
  }
}

impl SamService for InferenceClient {
  fn detect(&self, request: &DetectionRequest) -> Result<String, ClientError> {
    let body = request.to_json()?;
    self.post_json(request.endpoint(), &body)
  }

  fn upload_frame(&self, dirname: &str, filename: &str, jpeg: Vec<u8>) -> Result<String, ClientError> {
    let url = self.endpoint("sam/upload/")?;
    let part = multipart::Part::bytes(jpeg)
      .file_name(filename.to_string())
      .mime_str("image/jpeg")?;
    let form = multipart::Form::new()
      .text("dirname", dirname.to_string())
      .part("file", part);
    let started = Instant::now();
    let response = self.http.post(url.clone()).multipart(form).send()?;
    self.finish(&url, started, response)
  }

  fn fetch_weights(&self, model: SamType) -> Result<Vec<SamWeights>, ClientError> {
    let path = format!("sam/weights/?type={}", urlencoding::encode(model.model_name()));
    let body = self.get(&path)?;
    Ok(serde_json::from_str(&body)?)
  }

  fn register_weights(&self, weights: &SamWeights) -> Result<String, ClientError> {
    self.post_json("sam/weights/", &serde_json::to_value(weights)?)
  }

  fn progress(&self) -> Result<SamProgress, ClientError> {
    let body = self.get("sam/progress/")?;
    Ok(serde_json::from_str(&body)?)
  }

  fn cancel_download(&self) -> Result<String, ClientError> {
    self.get("sam/weights/cancel/")
  }
}
