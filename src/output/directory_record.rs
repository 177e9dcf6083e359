// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
  FromUrl, FromUrlWithScheme,
  output::Render,
  task::{Detected, FileOutcome},
  url_to_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("输出路径不是合法的 UTF-8: {0}")]
  InvalidPath(#[from] std::string::FromUtf8Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化失败: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 把标注图像和检测表写入目录：
/// `detected_<name>` 为 PNG 图像，`detected_<name>.json` 为检测表。
/// 同一批次中重名的文件依次加上 `_1`、`_2` 后缀。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  used_names: Mutex<HashSet<String>>,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    Ok(Self::new(url_to_path(uri)?))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      used_names: Mutex::new(HashSet::new()),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 为本批次分配一个未使用过的文件名
  fn reserve_name(&self, name: &str) -> String {
    let mut used = self.used_names.lock().unwrap_or_else(PoisonError::into_inner);
    if used.insert(name.to_string()) {
      return name.to_string();
    }

    let (stem, ext) = match name.rsplit_once('.') {
      Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{}", ext)),
      _ => (name, String::new()),
    };
    let mut index = 1;
    loop {
      let candidate = format!("{}_{}{}", stem, index, ext);
      if used.insert(candidate.clone()) {
        warn!("文件名 {} 重复，改为 {}", name, candidate);
        return candidate;
      }
      index += 1;
    }
  }

  fn save(&self, detected: &Detected) -> Result<(), DirectoryRecordOutputError> {
    if !self.directory.exists() {
      std::fs::create_dir_all(&self.directory)?;
    }

    let name = self.reserve_name(&detected.download_name);
    let image_path = self.directory.join(&name);
    std::fs::write(&image_path, &detected.annotated_png)?;

    let table_path = self.directory.join(format!("{}.json", name));
    let mut writer = BufWriter::new(File::create(&table_path)?);
    serde_json::to_writer_pretty(&mut writer, &detected.rows)?;
    writer.flush()?;

    info!("保存结果到: {}", image_path.display());
    Ok(())
  }
}

impl Render<FileOutcome> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, report: &FileOutcome) -> Result<(), Self::Error> {
    match report {
      FileOutcome::Detected(detected) => self.save(detected),
      FileOutcome::Failed { filename, error } => {
        warn!("跳过 {}: {}", filename, error);
        Ok(())
      }
    }
  }
}
