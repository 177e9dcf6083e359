// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// src/web.rs - HTTP 服务
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

use axum::{
  Json, Router,
  extract::{DefaultBodyLimit, multipart::MultipartError},
  http::StatusCode,
  response::{Html, IntoResponse, Response},
  routing::{get, post},
};
use thiserror::Error;
use tracing::warn;

use crate::{
  frame::RgbNhwcFrame,
  model::{DetectResult, Model, WithLabel},
  output::Draw,
  task::TaskError,
};

pub mod api;
pub use self::api::{BatchReport, FileView};

const INDEX_PAGE: &str = include_str!("../assets/index.html");

/// 默认上传大小上限（MiB）
pub const DEFAULT_UPLOAD_LIMIT_MB: usize = 64;

/// 把 MiB 换算为字节，溢出或为 0 时返回 `None`
pub fn upload_limit_bytes(mb: usize) -> Option<usize> {
  mb.checked_mul(1024 * 1024).filter(|bytes| *bytes > 0)
}

#[derive(Error, Debug)]
pub enum WebError {
  #[error("无法解析上传内容: {0}")]
  Multipart(#[from] MultipartError),
  #[error("没有上传任何文件")]
  NoFiles,
  #[error("后台任务失败: {0}")]
  Join(#[from] tokio::task::JoinError),
  #[error(transparent)]
  Task(#[from] TaskError),
}

impl WebError {
  pub fn status(&self) -> StatusCode {
    match self {
      WebError::Multipart(err) => {
        if err.status().is_client_error() {
          err.status()
        } else {
          StatusCode::BAD_REQUEST
        }
      }
      WebError::NoFiles => StatusCode::BAD_REQUEST,
      WebError::Task(_) => StatusCode::UNPROCESSABLE_ENTITY,
      WebError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for WebError {
  fn into_response(self) -> Response {
    let status = self.status();
    warn!("请求失败 ({}): {}", status, self);
    let body = Json(serde_json::json!({ "error": self.to_string() }));
    (status, body).into_response()
  }
}

/// 各个请求共享的状态
pub struct AppState<M> {
  pub model: Arc<M>,
  pub draw: Arc<Draw>,
}

impl<M> AppState<M> {
  pub fn new(model: Arc<M>, draw: Arc<Draw>) -> Self {
    Self { model, draw }
  }
}

impl<M> Clone for AppState<M> {
  fn clone(&self) -> Self {
    Self {
      model: Arc::clone(&self.model),
      draw: Arc::clone(&self.draw),
    }
  }
}

pub fn router<M>(state: AppState<M>, upload_limit: usize) -> Router
where
  M: Model<Input = RgbNhwcFrame, Output = DetectResult> + WithLabel + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  Router::new()
    .route("/", get(index))
    .route("/healthz", get(api::healthz::<M>))
    .route("/api/detect", post(api::detect::<M>))
    .route("/api/annotate", post(api::annotate::<M>))
    .layer(DefaultBodyLimit::max(upload_limit))
    .with_state(state)
}

async fn index() -> Html<&'static str> {
  Html(INDEX_PAGE)
}
