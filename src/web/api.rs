// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// src/web/api.rs - 检测接口
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

use std::time::Instant;

use axum::{
  Json,
  extract::{Multipart, State},
  http::header,
  response::IntoResponse,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Serialize;
use tracing::{info, warn};

use super::{AppState, WebError};
use crate::{
  frame::RgbNhwcFrame,
  input::UploadedImage,
  model::{DetectResult, Model, WithLabel},
  output::{DetectionRow, encode::PNG_MIME},
  task::{Detected, TaskError, process_upload},
};

/// 单个文件的展示内容
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileView {
  Ok {
    filename: String,
    original_caption: String,
    annotated_caption: String,
    /// 原图，data URL
    original: String,
    /// 标注后的 PNG，data URL
    annotated: String,
    download_name: String,
    rows: Vec<DetectionRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notice: Option<&'static str>,
    elapsed_ms: u128,
  },
  Error {
    filename: String,
    error: String,
  },
}

impl FileView {
  pub fn new(upload: &UploadedImage, outcome: Result<Detected, TaskError>) -> Self {
    match outcome {
      Ok(detected) => FileView::Ok {
        original_caption: format!("Uploaded: {}", detected.filename),
        annotated_caption: format!("Detection Result: {}", detected.filename),
        original: data_url(upload.mime(), &upload.bytes),
        annotated: data_url(PNG_MIME, &detected.annotated_png),
        notice: detected.notice(),
        elapsed_ms: detected.elapsed.as_millis(),
        filename: detected.filename,
        download_name: detected.download_name,
        rows: detected.rows,
      },
      Err(error) => FileView::Error {
        filename: upload.filename.clone(),
        error: error.to_string(),
      },
    }
  }

  pub fn filename(&self) -> &str {
    match self {
      FileView::Ok { filename, .. } | FileView::Error { filename, .. } => filename,
    }
  }
}

/// 一次上传请求的全部结果，顺序与上传顺序一致
#[derive(Debug, Serialize)]
pub struct BatchReport {
  pub files: Vec<FileView>,
}

fn data_url(mime: &str, bytes: &[u8]) -> String {
  format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// 读取所有文件字段；没有文件名的字段视为普通表单字段并忽略
async fn read_uploads(mut multipart: Multipart) -> Result<Vec<UploadedImage>, WebError> {
  let mut uploads = Vec::new();
  while let Some(field) = multipart.next_field().await? {
    let filename = match field.file_name() {
      Some(name) if !name.is_empty() => name.to_string(),
      _ => continue,
    };
    let bytes = field.bytes().await?;
    uploads.push(UploadedImage::new(filename, bytes.to_vec()));
  }

  if uploads.is_empty() {
    return Err(WebError::NoFiles);
  }
  Ok(uploads)
}

pub async fn detect<M>(
  State(state): State<AppState<M>>,
  multipart: Multipart,
) -> Result<Json<BatchReport>, WebError>
where
  M: Model<Input = RgbNhwcFrame, Output = DetectResult> + WithLabel + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  let uploads = read_uploads(multipart).await?;
  info!("收到 {} 个上传文件", uploads.len());

  let now = Instant::now();
  let files = tokio::task::spawn_blocking(move || {
    uploads
      .iter()
      .map(|upload| {
        let outcome = process_upload(state.model.as_ref(), &state.draw, upload);
        if let Err(error) = &outcome {
          warn!("{} 处理失败: {}", upload.filename, error);
        }
        FileView::new(upload, outcome)
      })
      .collect::<Vec<_>>()
  })
  .await?;

  info!("批处理完成: {} 个文件，耗时: {:.2?}", files.len(), now.elapsed());
  Ok(Json(BatchReport { files }))
}

/// 只处理第一个文件，直接返回标注后的 PNG 供下载
pub async fn annotate<M>(
  State(state): State<AppState<M>>,
  multipart: Multipart,
) -> Result<impl IntoResponse, WebError>
where
  M: Model<Input = RgbNhwcFrame, Output = DetectResult> + WithLabel + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  let upload = read_uploads(multipart)
    .await?
    .into_iter()
    .next()
    .ok_or(WebError::NoFiles)?;

  let detected = tokio::task::spawn_blocking(move || {
    process_upload(state.model.as_ref(), &state.draw, &upload)
  })
  .await??;

  let disposition = format!(
    "attachment; filename*=UTF-8''{}",
    urlencoding::encode(&detected.download_name)
  );
  Ok((
    [
      (header::CONTENT_TYPE, PNG_MIME.to_string()),
      (header::CONTENT_DISPOSITION, disposition),
    ],
    detected.annotated_png,
  ))
}

#[derive(Debug, Serialize)]
pub struct Health {
  pub status: &'static str,
  pub classes: Vec<String>,
}

pub async fn healthz<M>(State(state): State<AppState<M>>) -> Json<Health>
where
  M: WithLabel + Send + Sync + 'static,
{
  let classes = state
    .model
    .class_names()
    .iter()
    .map(|name| name.to_string())
    .collect();
  Json(Health {
    status: "ok",
    classes,
  })
}
