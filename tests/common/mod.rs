// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// tests/common/mod.rs - 测试公共设施
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

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Mutex;

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgba, RgbaImage};
use thiserror::Error;

pub use tumorlens::{
  frame::RgbNhwcFrame,
  model::{ClassNames, DetectItem, DetectResult, Model, WithLabel},
};

#[derive(Error, Debug)]
#[error("scripted model failure")]
pub struct ScriptedError;

/// 按顺序返回预设结果的假模型，队列为空时返回空结果
pub struct ScriptedModel {
  results: Mutex<VecDeque<Result<DetectResult, ScriptedError>>>,
  names: ClassNames,
  seen: Mutex<Vec<(u32, u32)>>,
}

impl ScriptedModel {
  pub fn new(results: impl IntoIterator<Item = DetectResult>) -> Self {
    Self {
      results: Mutex::new(results.into_iter().map(Ok).collect()),
      names: ClassNames::default(),
      seen: Mutex::new(Vec::new()),
    }
  }

  pub fn failing() -> Self {
    Self {
      results: Mutex::new(VecDeque::from([Err(ScriptedError)])),
      names: ClassNames::default(),
      seen: Mutex::new(Vec::new()),
    }
  }

  /// 每次推理收到的帧尺寸
  pub fn seen(&self) -> Vec<(u32, u32)> {
    self.seen.lock().unwrap().clone()
  }
}

impl WithLabel for ScriptedModel {
  fn class_names(&self) -> &ClassNames {
    &self.names
  }
}

impl Model for ScriptedModel {
  type Input = RgbNhwcFrame;
  type Output = DetectResult;
  type Error = ScriptedError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    assert_eq!(input.channels(), 3);
    self.seen.lock().unwrap().push(input.dimensions());
    self
      .results
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or_else(|| Ok(DetectResult::default()))
  }
}

/// 两个检测：Glioma 0.91 与 Meningioma 0.43
pub fn two_detections() -> DetectResult {
  DetectResult::from(vec![
    DetectItem::new(3, 0.91, [100.4, 120.6, 300.2, 260.9]),
    DetectItem::new(2, 0.43, [20.0, 10.0, 60.5, 50.5]),
  ])
}

pub fn gray_jpeg(size: u32) -> Vec<u8> {
  let image = GrayImage::from_fn(size, size, |x, y| Luma([((x + y) % 256) as u8]));
  encode(DynamicImage::ImageLuma8(image), ImageFormat::Jpeg)
}

pub fn rgba_png(size: u32) -> Vec<u8> {
  let image = RgbaImage::from_fn(size, size, |x, y| {
    Rgba([(x % 256) as u8, (y % 256) as u8, 64, 128])
  });
  encode(DynamicImage::ImageRgba8(image), ImageFormat::Png)
}

fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
  let mut bytes = Vec::new();
  image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
  bytes
}
