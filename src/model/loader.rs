// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// src/model/loader.rs - 模型单例加载
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

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{debug, info};

/// 进程内只初始化一次的模型句柄。
///
/// 首次调用 [`ModelCell::get_or_load`] 时执行加载，之后返回同一个 `Arc`。
/// 加载失败不会被缓存，下一次调用会重新尝试。
pub struct ModelCell<M> {
  cell: OnceLock<Arc<M>>,
  init: Mutex<()>,
}

impl<M> Default for ModelCell<M> {
  fn default() -> Self {
    Self::new()
  }
}

impl<M> ModelCell<M> {
  pub const fn new() -> Self {
    Self {
      cell: OnceLock::new(),
      init: Mutex::new(()),
    }
  }

  pub fn get(&self) -> Option<Arc<M>> {
    self.cell.get().cloned()
  }

  pub fn is_loaded(&self) -> bool {
    self.cell.get().is_some()
  }

  pub fn get_or_load<E>(&self, load: impl FnOnce() -> Result<M, E>) -> Result<Arc<M>, E> {
    if let Some(model) = self.cell.get() {
      debug!("复用已加载的模型");
      return Ok(model.clone());
    }

    // 串行化加载过程，避免并发时重复读取模型文件
    let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(model) = self.cell.get() {
      return Ok(model.clone());
    }

    let model = Arc::new(load()?);
    info!("模型已载入进程缓存");
    Ok(self.cell.get_or_init(|| model).clone())
  }
}
