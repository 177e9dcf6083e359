// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// src/bin/serve.rs - 脑瘤识别 Web 服务
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

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use tumorlens::{
  FromUrl,
  model::{ClassNames, ModelCell, WithLabel, Yolo, YoloBuilder},
  output::Draw,
  web::{self, AppState, DEFAULT_UPLOAD_LIMIT_MB},
};

/// 进程内唯一的模型实例
static MODEL: ModelCell<Yolo> = ModelCell::new();

/// TumorLens Web 服务参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 yolo:best.onnx 或 yolo:///models/best.onnx?conf=0.3
  #[arg(long, default_value = "yolo:best.onnx", value_name = "MODEL")]
  pub model: Url,
  /// 监听地址
  #[arg(long, default_value = "0.0.0.0:8501", value_name = "ADDR")]
  pub bind: SocketAddr,
  /// 覆盖类别名，逗号分隔
  #[arg(long, value_name = "NAMES")]
  pub labels: Option<String>,
  /// 单次上传大小上限（MiB）
  #[arg(long, default_value_t = DEFAULT_UPLOAD_LIMIT_MB, value_name = "MB")]
  pub max_upload_mb: usize,
}

fn load_model(args: &Args) -> Result<Arc<Yolo>> {
  let model = MODEL.get_or_load(|| {
    let mut builder = YoloBuilder::from_url(&args.model)?;
    if let Some(labels) = &args.labels {
      builder = builder.labels(ClassNames::from_csv(labels));
    }
    builder.build()
  })?;
  Ok(model)
}

async fn shutdown_signal() {
  if let Err(err) = tokio::signal::ctrl_c().await {
    warn!("无法监听退出信号: {}", err);
    std::future::pending::<()>().await;
  }
  info!("收到退出信号，正在停止服务...");
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let upload_limit = web::upload_limit_bytes(args.max_upload_mb)
    .with_context(|| format!("上传大小上限无效: {} MiB", args.max_upload_mb))?;
  info!("模型地址: {}", args.model);
  info!("监听地址: {}", args.bind);

  let now = std::time::Instant::now();
  let model = load_model(&args).context("模型加载失败，无法提供服务")?;
  info!(
    "模型加载完成，耗时: {:.2?}，输入尺寸: {:?}，类别: {}",
    now.elapsed(),
    model.input_size(),
    model.class_names().iter().collect::<Vec<_>>().join(", ")
  );

  let draw = Arc::new(Draw::new()?);
  let state = AppState::new(model, draw);
  let app = web::router(state, upload_limit);

  let listener = tokio::net::TcpListener::bind(args.bind)
    .await
    .with_context(|| format!("无法绑定地址 {}", args.bind))?;
  info!("服务已启动: http://{}", args.bind);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  Ok(())
}
