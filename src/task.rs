// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// src/task.rs - 上传文件处理任务
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

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::RgbNhwcFrame,
  input::{UploadError, UploadedImage},
  model::{DetectResult, Model, WithLabel},
  output::{
    DetectionRow, Draw, EncodeError, Render, build_table, download_name, encode_png,
  },
};

/// 检测结果为空时展示的提示
pub const NO_DETECTION_NOTICE: &str = "No tumors detected in this image.";

#[derive(Error, Debug)]
pub enum TaskError {
  #[error(transparent)]
  Upload(#[from] UploadError),
  #[error("推理失败: {0}")]
  Inference(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error(transparent)]
  Encode(#[from] EncodeError),
  #[error("结果输出失败: {0}")]
  Output(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 单个文件的检测结果
#[derive(Debug, Clone)]
pub struct Detected {
  pub filename: String,
  pub download_name: String,
  pub width: u32,
  pub height: u32,
  pub annotated_png: Vec<u8>,
  pub rows: Vec<DetectionRow>,
  pub elapsed: Duration,
}

impl Detected {
  /// 没有检测到目标时返回提示文本
  pub fn notice(&self) -> Option<&'static str> {
    self.rows.is_empty().then_some(NO_DETECTION_NOTICE)
  }
}

#[derive(Debug)]
pub enum FileOutcome {
  Detected(Detected),
  Failed { filename: String, error: TaskError },
}

impl FileOutcome {
  pub fn filename(&self) -> &str {
    match self {
      FileOutcome::Detected(detected) => &detected.filename,
      FileOutcome::Failed { filename, .. } => filename,
    }
  }

  pub fn is_detected(&self) -> bool {
    matches!(self, FileOutcome::Detected(_))
  }
}

/// 单个文件的完整流程：解码、归一化、推理、绘制、编码、制表
pub fn process_upload<M>(model: &M, draw: &Draw, upload: &UploadedImage) -> Result<Detected, TaskError>
where
  M: Model<Input = RgbNhwcFrame, Output = DetectResult> + WithLabel,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  let now = Instant::now();
  let frame = upload.to_frame()?;
  let (width, height) = frame.dimensions();

  let result = model
    .infer(&frame)
    .map_err(|e| TaskError::Inference(Box::new(e)))?;
  debug!("{}: 推理得到 {} 个目标", upload.filename, result.len());

  let names = model.class_names();
  let annotated = draw.draw_detection(&frame, &result, names);
  let annotated_png = encode_png(&annotated)?;
  let rows = build_table(&result, names);

  Ok(Detected {
    filename: upload.filename.clone(),
    download_name: download_name(&upload.filename),
    width,
    height,
    annotated_png,
    rows,
    elapsed: now.elapsed(),
  })
}

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: &M, output: &O) -> Result<Self::Output, Self::Error>;
}

/// 按上传顺序逐个处理文件，单个文件的读取、处理或输出失败都只记录在该文件的结果中
pub struct BatchTask<'a> {
  draw: &'a Draw,
}

impl<'a> BatchTask<'a> {
  pub fn new(draw: &'a Draw) -> Self {
    Self { draw }
  }

  fn process<M>(&self, model: &M, upload: Result<UploadedImage, UploadError>) -> FileOutcome
  where
    M: Model<Input = RgbNhwcFrame, Output = DetectResult> + WithLabel,
    M::Error: std::error::Error + Send + Sync + 'static,
  {
    let upload = match upload {
      Ok(upload) => upload,
      Err(error) => {
        let filename = error.filename().unwrap_or_default().to_string();
        warn!("{} 读取失败: {}", filename, error);
        return FileOutcome::Failed {
          filename,
          error: error.into(),
        };
      }
    };

    match process_upload(model, self.draw, &upload) {
      Ok(detected) => {
        info!(
          "{} 处理完成: {} 个目标，耗时: {:.2?}",
          detected.filename,
          detected.rows.len(),
          detected.elapsed
        );
        FileOutcome::Detected(detected)
      }
      Err(error) => {
        warn!("{} 处理失败: {}", upload.filename, error);
        FileOutcome::Failed {
          filename: upload.filename,
          error,
        }
      }
    }
  }
}

impl<I, M, O> Task<I, M, O> for BatchTask<'_>
where
  I: Iterator<Item = Result<UploadedImage, UploadError>>,
  M: Model<Input = RgbNhwcFrame, Output = DetectResult> + WithLabel,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render<FileOutcome>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Output = Vec<FileOutcome>;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: &M, output: &O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let mut outcomes = Vec::new();

    for (index, upload) in input.enumerate() {
      info!("处理第 {} 个文件", index + 1);
      let mut outcome = self.process(model, upload);

      if let Err(error) = output.render_result(&outcome) {
        warn!("{} 输出失败: {}", outcome.filename(), error);
        outcome = FileOutcome::Failed {
          filename: outcome.filename().to_string(),
          error: TaskError::Output(Box::new(error)),
        };
      }
      outcomes.push(outcome);
    }

    info!(
      "任务完成: {} 个文件，{} 个失败",
      outcomes.len(),
      outcomes.iter().filter(|o| !o.is_detected()).count()
    );
    Ok(outcomes)
  }
}
