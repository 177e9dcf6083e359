// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// src/bin/detect.rs - 命令行批量识别
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

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use url::Url;

use tumorlens::{
  FromUrl,
  input::ImageFileInput,
  model::{ClassNames, YoloBuilder},
  output::{DirectoryRecordOutput, Draw},
  task::{BatchTask, FileOutcome, Task},
};

/// TumorLens 命令行参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 yolo:best.onnx
  #[arg(long, default_value = "yolo:best.onnx", value_name = "MODEL")]
  pub model: Url,
  /// 输出目录，例如 folder:./detected
  #[arg(long, default_value = "folder:./detected", value_name = "OUTPUT")]
  pub output: Url,
  /// 覆盖类别名，逗号分隔
  #[arg(long, value_name = "NAMES")]
  pub labels: Option<String>,
  /// 待识别的 JPEG/PNG 文件
  #[arg(required = true, value_name = "IMAGE")]
  pub inputs: Vec<PathBuf>,
}

fn run(args: Args) -> Result<Vec<FileOutcome>> {
  info!("模型地址: {}", args.model);
  info!("输出路径: {}", args.output);

  let mut builder = YoloBuilder::from_url(&args.model)?;
  if let Some(labels) = &args.labels {
    builder = builder.labels(ClassNames::from_csv(labels));
  }
  let model = builder.build()?;
  let output = DirectoryRecordOutput::from_url(&args.output)?;
  let input = ImageFileInput::from_paths(&args.inputs);
  let draw = Draw::new()?;

  BatchTask::new(&draw).run_task(input, &model, &output)
}

fn main() -> ExitCode {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  match run(args) {
    Ok(outcomes) => {
      let failed = outcomes.iter().filter(|o| !o.is_detected()).count();
      if failed > 0 {
        error!("{} 个文件处理失败", failed);
        ExitCode::FAILURE
      } else {
        ExitCode::SUCCESS
      }
    }
    Err(err) => {
      error!("运行失败: {:#}", err);
      ExitCode::FAILURE
    }
  }
}
