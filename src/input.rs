// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// src/input.rs - 上传图像输入
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

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, ImageReader};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbNhwcFrame, url_to_path};

/// 允许上传的文件扩展名
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum UploadError {
  #[error("不支持的文件类型: {0}（仅支持 JPEG/PNG）")]
  UnsupportedExtension(String),
  #[error("文件内容为空: {0}")]
  Empty(String),
  #[error("无法识别图像格式: {0}")]
  UnknownFormat(String),
  #[error("图像解码失败: {0}")]
  Decode(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("无法读取文件 {filename}: {source}")]
  Read {
    filename: String,
    #[source]
    source: std::io::Error,
  },
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
  #[error("路径不是合法的 UTF-8: {0}")]
  InvalidPath(#[from] std::string::FromUtf8Error),
}

impl UploadError {
  /// 出错的文件名（如果错误与具体文件相关）
  pub fn filename(&self) -> Option<&str> {
    match self {
      UploadError::UnsupportedExtension(name)
      | UploadError::Empty(name)
      | UploadError::UnknownFormat(name)
      | UploadError::Read { filename: name, .. } => Some(name),
      _ => None,
    }
  }
}

fn display_name(path: &Path) -> String {
  path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// 一次上传的原始文件，处理完即丢弃
#[derive(Debug, Clone)]
pub struct UploadedImage {
  pub filename: String,
  pub bytes: Vec<u8>,
}

impl UploadedImage {
  pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
    Self {
      filename: filename.into(),
      bytes,
    }
  }

  pub fn open(path: impl AsRef<Path>) -> Result<Self, UploadError> {
    let path = path.as_ref();
    let filename = display_name(path);
    match std::fs::read(path) {
      Ok(bytes) => Ok(Self { filename, bytes }),
      Err(source) => Err(UploadError::Read { filename, source }),
    }
  }

  /// 小写扩展名
  pub fn extension(&self) -> Option<String> {
    Path::new(&self.filename)
      .extension()
      .map(|ext| ext.to_string_lossy().to_lowercase())
  }

  fn check_extension(&self) -> Result<(), UploadError> {
    match self.extension() {
      Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
      _ => Err(UploadError::UnsupportedExtension(self.filename.clone())),
    }
  }

  /// 浏览器展示原图时使用的 MIME 类型
  pub fn mime(&self) -> &'static str {
    match image::guess_format(&self.bytes) {
      Ok(ImageFormat::Png) => "image/png",
      _ => "image/jpeg",
    }
  }

  /// 校验扩展名并解码图像
  pub fn decode(&self) -> Result<DynamicImage, UploadError> {
    self.check_extension()?;
    if self.bytes.is_empty() {
      return Err(UploadError::Empty(self.filename.clone()));
    }

    let reader = ImageReader::new(Cursor::new(&self.bytes)).with_guessed_format()?;
    match reader.format() {
      Some(ImageFormat::Jpeg | ImageFormat::Png) => {}
      _ => return Err(UploadError::UnknownFormat(self.filename.clone())),
    }

    let image = reader.decode()?;
    debug!(
      "解码上传文件 {}: {}x{} {:?}",
      self.filename,
      image.width(),
      image.height(),
      image.color()
    );
    Ok(image)
  }

  /// 解码并归一化为三通道帧
  pub fn to_frame(&self) -> Result<RgbNhwcFrame, UploadError> {
    self.decode().map(RgbNhwcFrame::from)
  }
}

/// 从本地文件读取的一组上传，每次迭代时才读取对应文件，
/// 读取失败只影响该文件
pub struct ImageFileInput {
  paths: std::vec::IntoIter<PathBuf>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = UploadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(UploadError::SchemeMismatch(url.scheme().to_string()));
    }

    Ok(Self::from_paths([url_to_path(url)?]))
  }
}

impl ImageFileInput {
  pub fn from_paths<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Self {
    let paths: Vec<PathBuf> = paths
      .into_iter()
      .map(|path| path.as_ref().to_path_buf())
      .collect();
    Self {
      paths: paths.into_iter(),
    }
  }
}

impl Iterator for ImageFileInput {
  type Item = Result<UploadedImage, UploadError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.paths.next().map(|path| {
      let upload = UploadedImage::open(&path);
      if let Err(err) = &upload {
        error!("{}", err);
      }
      upload
    })
  }
}
