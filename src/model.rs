// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// src/model.rs - 模型
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

use std::borrow::Cow;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 模型自带的类别名表
pub trait WithLabel {
  fn class_names(&self) -> &ClassNames;
}

/// 默认的脑瘤类别
pub const BRAIN_TUMOR_LABELS: [&str; 4] = ["Pituitary", "No Tumor", "Meningioma", "Glioma"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
}

impl DetectItem {
  /// 构造检测项，保证 `x_min <= x_max`、`y_min <= y_max` 且置信度位于 [0, 1]
  pub fn new(class_id: u32, score: f32, bbox: [f32; 4]) -> Self {
    let [x0, y0, x1, y1] = bbox;
    let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
    Self {
      class_id,
      score,
      bbox: [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)],
    }
  }

  pub fn width(&self) -> f32 {
    self.bbox[2] - self.bbox[0]
  }

  pub fn height(&self) -> f32 {
    self.bbox[3] - self.bbox[1]
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  pub fn iou(&self, other: &DetectItem) -> f32 {
    let inter_w = (self.bbox[2].min(other.bbox[2]) - self.bbox[0].max(other.bbox[0])).max(0.0);
    let inter_h = (self.bbox[3].min(other.bbox[3]) - self.bbox[1].max(other.bbox[1])).max(0.0);
    let inter = inter_w * inter_h;
    let union = self.area() + other.area() - inter;
    if union <= f32::EPSILON { 0.0 } else { inter / union }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem> {
    self.items.iter()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 类别 id 到可读名称的映射
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNames {
  names: Box<[String]>,
}

impl Default for ClassNames {
  fn default() -> Self {
    Self::new(BRAIN_TUMOR_LABELS)
  }
}

impl ClassNames {
  pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  /// 逗号分隔的类别列表，例如 `Glioma,Meningioma,No Tumor,Pituitary`
  pub fn from_csv(list: &str) -> Self {
    Self::new(
      list
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty()),
    )
  }

  /// 解析 Ultralytics 导出时写入 ONNX 元数据的 `names` 字段，
  /// 形如 `{0: 'Glioma', 1: 'Meningioma'}`。
  pub fn parse_metadata(text: &str) -> Option<Self> {
    let body = text.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut entries: Vec<(usize, String)> = Vec::new();
    let mut rest = body.trim();

    while !rest.is_empty() {
      let (key, tail) = rest.split_once(':')?;
      let id = key.trim().parse::<usize>().ok()?;
      let tail = tail.trim_start();
      let quote = tail.chars().next().filter(|c| *c == '\'' || *c == '"')?;
      let tail = &tail[1..];
      let end = tail.find(quote)?;
      entries.push((id, tail[..end].to_string()));
      rest = tail[end + 1..].trim_start();
      rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
    }

    if entries.is_empty() {
      return None;
    }
    entries.sort_by_key(|(id, _)| *id);
    if entries.iter().enumerate().any(|(idx, (id, _))| idx != *id) {
      return None;
    }
    Some(Self::new(entries.into_iter().map(|(_, name)| name)))
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, class_id: u32) -> Option<&str> {
    self.names.get(class_id as usize).map(String::as_str)
  }

  /// 找不到名称时退化为 `class <id>`
  pub fn label(&self, class_id: u32) -> Cow<'_, str> {
    match self.get(class_id) {
      Some(name) => Cow::Borrowed(name),
      None => Cow::Owned(format!("class {}", class_id)),
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}

mod loader;
mod yolo;
pub use self::loader::ModelCell;
pub use self::yolo::{Yolo, YoloBuilder, YoloError, YoloParams};
