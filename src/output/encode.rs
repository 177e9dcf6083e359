// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// src/output/encode.rs - 结果图像编码
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

use image::{ImageFormat, RgbImage};
use sanitize_filename::sanitize;
use thiserror::Error;

pub const DOWNLOAD_PREFIX: &str = "detected_";
pub const PNG_MIME: &str = "image/png";

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("PNG 编码失败: {0}")]
  Png(#[from] image::ImageError),
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, EncodeError> {
  let mut bytes = Vec::new();
  image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
  Ok(bytes)
}

/// 下载文件名：`detected_<原文件名>`，去掉路径分隔符等非法字符
pub fn download_name(filename: &str) -> String {
  let name = sanitize(filename);
  let name = if name.is_empty() { "image.png".to_string() } else { name };
  format!("{}{}", DOWNLOAD_PREFIX, name)
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn png_round_trip_keeps_dimensions() {
    let image = RgbImage::from_fn(31, 17, |x, y| Rgb([x as u8, y as u8, 9]));
    let bytes = encode_png(&image).unwrap();

    assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
    let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
    assert_eq!(decoded.dimensions(), (31, 17));
    assert_eq!(decoded, image);
  }

  #[test]
  fn download_name_keeps_original_name() {
    assert_eq!(download_name("scan_01.jpg"), "detected_scan_01.jpg");
    assert_eq!(download_name("brain.PNG"), "detected_brain.PNG");
  }

  #[test]
  fn download_name_strips_paths() {
    let name = download_name("../../etc/passwd");
    assert!(name.starts_with(DOWNLOAD_PREFIX));
    assert!(!name.contains('/'));
    assert_eq!(download_name(""), "detected_image.png");
  }
}
