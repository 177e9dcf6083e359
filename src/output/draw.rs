// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;

use crate::{
  frame::RgbNhwcFrame,
  model::{ClassNames, DetectItem, DetectResult},
};

const FONT_DATA: &[u8] = include_bytes!("../../assets/font.ttf");

// 文本渲染常量
const LABEL_MIN_FONT_SIZE: f32 = 12.0;
const LABEL_FONT_RATIO: f32 = 0.035;
const LINE_WIDTH_RATIO: f32 = 0.003;
const LINE_MIN_WIDTH: i32 = 2;
const LABEL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const PALETTE_SIZE: usize = 20;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法加载嵌入的字体文件: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 在图像副本上绘制检测框与标签
pub struct Draw {
  font: FontArc,
  palette: Vec<Rgb<u8>>,
}

impl Draw {
  pub fn new() -> Result<Self, DrawError> {
    let font = FontArc::try_from_slice(FONT_DATA)?;
    Ok(Self::with_font(font))
  }

  pub fn with_font(font: FontArc) -> Self {
    let palette = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb(i as f32 * 360.0 / PALETTE_SIZE as f32, 0.8, 0.9))
      .collect();
    Self { font, palette }
  }

  pub fn color(&self, class_id: u32) -> Rgb<u8> {
    self.palette[class_id as usize % self.palette.len()]
  }

  /// 返回绘制了检测结果的新图像，输入帧不会被修改
  pub fn draw_detection(
    &self,
    frame: &RgbNhwcFrame,
    result: &DetectResult,
    names: &ClassNames,
  ) -> RgbImage {
    let mut image = frame.to_rgb_image();
    self.draw_detections_on_image(&mut image, result, names);
    image
  }

  pub fn draw_detections_on_image(
    &self,
    image: &mut RgbImage,
    result: &DetectResult,
    names: &ClassNames,
  ) {
    let (w, h) = image.dimensions();
    let line_width = (((w + h) as f32 / 2.0 * LINE_WIDTH_RATIO).round() as i32).max(LINE_MIN_WIDTH);
    let font_size = ((w + h) as f32 / 2.0 * LABEL_FONT_RATIO).round().max(LABEL_MIN_FONT_SIZE);

    for item in result.iter() {
      let label = format!("{} {:.2}", names.label(item.class_id), item.score);
      self.draw_bbox_with_label(image, item, &label, line_width, PxScale::from(font_size));
    }
  }

  fn draw_bbox_with_label(
    &self,
    image: &mut RgbImage,
    item: &DetectItem,
    label: &str,
    line_width: i32,
    scale: PxScale,
  ) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let color = self.color(item.class_id);

    let x_min = (item.bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (item.bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (item.bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (item.bbox[3].ceil() as i32).clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 由外向内逐层绘制边框
    for t in 0..line_width {
      let box_w = x_max - x_min + 1 - 2 * t;
      let box_h = y_max - y_min + 1 - 2 * t;
      if box_w <= 0 || box_h <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(box_w as u32, box_h as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let (text_w, text_h) = text_size(scale, &self.font, label);
    let label_w = text_w as i32 + 2 * LABEL_PADDING;
    let label_h = text_h as i32 + 2 * LABEL_PADDING;

    // 标签优先放在边框上方，放不下时放在框内顶部
    let label_y = if y_min - label_h >= 0 { y_min - label_h } else { y_min };
    let label_x = x_min.min((w - label_w).max(0));

    let rect = Rect::at(label_x, label_y).of_size(label_w as u32, label_h as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      LABEL_TEXT_COLOR,
      label_x + LABEL_PADDING,
      label_y + LABEL_PADDING,
      scale,
      &self.font,
      label,
    );
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}
