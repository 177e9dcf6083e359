// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// src/frame.rs - NHWC 帧定义与通道归一化
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

use image::{DynamicImage, GrayAlphaImage, GrayImage, ImageBuffer, Rgb, RgbImage, RgbaImage};
use tracing::debug;

const RGB_CHANNELS: usize = 3;

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

/// 三通道 RGB 帧，像素按 NHWC（交错）排列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbNhwcFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl RgbNhwcFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    let data = vec![0u8; RGB_CHANNELS * width * height].into_boxed_slice();
    Self {
      width: width as u32,
      height: height as u32,
      data,
    }
  }

  pub fn height(&self) -> usize {
    self.height as usize
  }

  pub fn width(&self) -> usize {
    self.width as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  /// 复制出一份 `RgbImage`，帧本身保持不变
  pub fn to_rgb_image(&self) -> RgbImage {
    ImageBuffer::from_fn(self.width, self.height, |x, y| {
      let idx = (y as usize * self.width() + x as usize) * RGB_CHANNELS;
      Rgb([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    })
  }
}

impl AsMut<[u8]> for RgbNhwcFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl AsNhwcFrame for RgbNhwcFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

impl From<RgbImage> for RgbNhwcFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

impl From<&GrayImage> for RgbNhwcFrame {
  fn from(image: &GrayImage) -> Self {
    let (width, height) = image.dimensions();
    let mut frame = RgbNhwcFrame::with_shape(height as usize, width as usize);
    let slice = frame.as_mut();
    for (idx, luma) in image.as_raw().iter().enumerate() {
      let base = idx * RGB_CHANNELS;
      slice[base..base + RGB_CHANNELS].fill(*luma);
    }
    frame
  }
}

impl From<&GrayAlphaImage> for RgbNhwcFrame {
  fn from(image: &GrayAlphaImage) -> Self {
    let (width, height) = image.dimensions();
    let mut frame = RgbNhwcFrame::with_shape(height as usize, width as usize);
    let slice = frame.as_mut();
    for (idx, pixel) in image.as_raw().chunks_exact(2).enumerate() {
      let base = idx * RGB_CHANNELS;
      slice[base..base + RGB_CHANNELS].fill(pixel[0]);
    }
    frame
  }
}

impl From<&RgbaImage> for RgbNhwcFrame {
  fn from(image: &RgbaImage) -> Self {
    let (width, height) = image.dimensions();
    let mut frame = RgbNhwcFrame::with_shape(height as usize, width as usize);
    let slice = frame.as_mut();
    for (idx, pixel) in image.as_raw().chunks_exact(4).enumerate() {
      let base = idx * RGB_CHANNELS;
      slice[base..base + RGB_CHANNELS].copy_from_slice(&pixel[..RGB_CHANNELS]);
    }
    frame
  }
}

/// 将任意解码后的图像归一化为三通道 RGB 帧。
///
/// 灰度图复制到三个通道，带透明通道的图像直接丢弃 alpha，
/// RGB 图像原样通过。高位深图像先降为 8 位再按同样规则处理。
impl From<DynamicImage> for RgbNhwcFrame {
  fn from(image: DynamicImage) -> Self {
    debug!(
      "归一化图像: {}x{} {:?}",
      image.width(),
      image.height(),
      image.color()
    );
    match image {
      DynamicImage::ImageRgb8(rgb) => RgbNhwcFrame::from(rgb),
      DynamicImage::ImageLuma8(gray) => RgbNhwcFrame::from(&gray),
      DynamicImage::ImageLumaA8(gray_alpha) => RgbNhwcFrame::from(&gray_alpha),
      DynamicImage::ImageRgba8(rgba) => RgbNhwcFrame::from(&rgba),
      DynamicImage::ImageLuma16(_) => RgbNhwcFrame::from(&image.to_luma8()),
      DynamicImage::ImageLumaA16(_) => RgbNhwcFrame::from(&image.to_luma_alpha8()),
      DynamicImage::ImageRgba16(_) | DynamicImage::ImageRgba32F(_) => {
        RgbNhwcFrame::from(&image.to_rgba8())
      }
      other => RgbNhwcFrame::from(other.to_rgb8()),
    }
  }
}
