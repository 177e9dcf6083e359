// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// src/model/yolo.rs - YOLO (ONNX) 检测模型
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

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::TensorRef;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  url_to_path,
  model::{ClassNames, DetectItem, DetectResult, Model, WithLabel},
};

const YOLO_DEFAULT_INPUT: u32 = 640;
const YOLO_PAD_VALUE: f32 = 114.0 / 255.0;
const YOLO_BOX_FEATURES: usize = 4;
const YOLO_MAX_NMS_INPUTS: usize = 30_000;

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("模型参数错误: {0}")]
  InvalidParam(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("输出张量形状不符: {0:?}")]
  OutputShape(Vec<usize>),
  #[error("推理会话锁已损坏")]
  SessionPoisoned,
}

/// 检测阈值与推理参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YoloParams {
  /// 置信度阈值
  pub confidence: f32,
  /// NMS IOU 阈值
  pub iou: f32,
  /// 单张图像最多保留的检测数
  pub max_det: usize,
  /// 模型输入边长；为 `None` 时从模型元数据读取
  pub input_size: Option<u32>,
  /// ONNX Runtime 算子内线程数，0 表示使用默认值
  pub threads: usize,
}

impl Default for YoloParams {
  fn default() -> Self {
    Self {
      confidence: 0.25,
      iou: 0.7,
      max_det: 300,
      input_size: None,
      threads: 0,
    }
  }
}

pub struct YoloBuilder {
  model_path: PathBuf,
  params: YoloParams,
  labels: Option<ClassNames>,
}

impl FromUrlWithScheme for YoloBuilder {
  const SCHEME: &'static str = "yolo";
}

impl FromUrl for YoloBuilder {
  type Error = YoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }
    let model_path = url_to_path(url)
      .map_err(|e| YoloError::ModelPathError(format!("模型路径不是合法的 UTF-8: {}", e)))?;
    if model_path.as_os_str().is_empty() {
      return Err(YoloError::ModelPathError("模型路径为空".to_string()));
    }

    let mut params = YoloParams::default();
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "conf" => params.confidence = parse_param(&key, &value)?,
        "iou" => params.iou = parse_param(&key, &value)?,
        "max_det" => params.max_det = parse_param(&key, &value)?,
        "imgsz" => params.input_size = Some(parse_param(&key, &value)?),
        "threads" => params.threads = parse_param(&key, &value)?,
        other => warn!("忽略未知的模型参数: {}", other),
      }
    }

    if !(0.0..=1.0).contains(&params.confidence) || !(0.0..=1.0).contains(&params.iou) {
      return Err(YoloError::InvalidParam(format!(
        "阈值必须位于 [0, 1]: conf={}, iou={}",
        params.confidence, params.iou
      )));
    }
    if params.input_size == Some(0) || params.max_det == 0 {
      return Err(YoloError::InvalidParam("imgsz 与 max_det 必须大于 0".to_string()));
    }

    Ok(YoloBuilder {
      model_path,
      params,
      labels: None,
    })
  }
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, YoloError> {
  value
    .parse()
    .map_err(|_| YoloError::InvalidParam(format!("{}={}", key, value)))
}

impl YoloBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      params: YoloParams::default(),
      labels: None,
    }
  }

  pub fn params(mut self, params: YoloParams) -> Self {
    self.params = params;
    self
  }

  /// 覆盖模型元数据中的类别名
  pub fn labels(mut self, labels: ClassNames) -> Self {
    self.labels = Some(labels);
    self
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn build(self) -> Result<Yolo, YoloError> {
    if !self.model_path.is_file() {
      error!("模型文件不存在: {}", self.model_path.display());
      return Err(YoloError::ModelNotFound(self.model_path));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    if self.params.threads > 0 {
      builder = builder.with_intra_threads(self.params.threads)?;
    }
    let session = builder.commit_from_file(&self.model_path)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .ok_or_else(|| YoloError::ModelInvalid("模型没有输入".to_string()))?;
    let output_name = session
      .outputs
      .first()
      .map(|output| output.name.clone())
      .ok_or_else(|| YoloError::ModelInvalid("模型没有输出".to_string()))?;
    debug!("模型输入: {}, 模型输出: {}", input_name, output_name);

    let (names_meta, imgsz_meta) = match session.metadata() {
      Ok(meta) => (
        meta.custom("names").ok().flatten(),
        meta.custom("imgsz").ok().flatten(),
      ),
      Err(e) => {
        warn!("读取模型元数据失败: {}", e);
        (None, None)
      }
    };

    let class_names = match (self.labels, names_meta.as_deref().and_then(ClassNames::parse_metadata)) {
      (Some(labels), _) => labels,
      (None, Some(names)) => names,
      (None, None) => {
        warn!("模型未携带类别名，使用默认脑瘤类别");
        ClassNames::default()
      }
    };

    let input_hw = match (self.params.input_size, imgsz_meta.as_deref().and_then(parse_imgsz)) {
      (Some(size), _) => (size, size),
      (None, Some(hw)) => hw,
      (None, None) => (YOLO_DEFAULT_INPUT, YOLO_DEFAULT_INPUT),
    };

    info!(
      "模型加载完成: 输入 {}x{}, 类别 {:?}",
      input_hw.1,
      input_hw.0,
      class_names.iter().collect::<Vec<_>>()
    );

    Ok(Yolo {
      session: Mutex::new(session),
      input_name,
      output_name,
      input_hw,
      params: self.params,
      class_names,
    })
  }
}

/// 解析 `imgsz` 元数据，例如 `[640, 640]`，返回 (高, 宽)
fn parse_imgsz(text: &str) -> Option<(u32, u32)> {
  let dims: Vec<u32> = text
    .split(|c: char| !c.is_ascii_digit())
    .filter(|s| !s.is_empty())
    .filter_map(|s| s.parse().ok())
    .collect();
  match dims.as_slice() {
    [size] if *size > 0 => Some((*size, *size)),
    [h, w] if *h > 0 && *w > 0 => Some((*h, *w)),
    _ => None,
  }
}

pub struct Yolo {
  session: Mutex<Session>,
  input_name: String,
  output_name: String,
  input_hw: (u32, u32),
  params: YoloParams,
  class_names: ClassNames,
}

impl Yolo {
  pub fn params(&self) -> &YoloParams {
    &self.params
  }

  /// 模型输入尺寸 (高, 宽)
  pub fn input_size(&self) -> (u32, u32) {
    self.input_hw
  }

  fn run(&self, tensor: &Array4<f32>) -> Result<(Vec<usize>, Vec<f32>), YoloError> {
    let input = tensor.as_standard_layout();
    let input = TensorRef::from_array_view(&input)?;

    let mut session = self.session.lock().map_err(|_| YoloError::SessionPoisoned)?;
    let outputs = session.run(ort::inputs![self.input_name.as_str() => input])?;
    let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
      YoloError::ModelInvalid(format!("模型缺少输出 {}", self.output_name))
    })?;

    let (shape, data) = output.try_extract_tensor::<f32>()?;
    let shape = shape.iter().map(|&d| d.max(0) as usize).collect();
    Ok((shape, data.to_vec()))
  }
}

impl WithLabel for Yolo {
  fn class_names(&self) -> &ClassNames {
    &self.class_names
  }
}

impl Model for Yolo {
  type Input = RgbNhwcFrame;
  type Output = DetectResult;
  type Error = YoloError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let now = Instant::now();
    let (tensor, letterbox) = Letterbox::apply(input, self.input_hw);
    debug!("预处理完成，耗时: {:.2?}", now.elapsed());

    let now = Instant::now();
    let (shape, data) = self.run(&tensor)?;
    debug!("推理完成，输出形状 {:?}，耗时: {:.2?}", shape, now.elapsed());

    let now = Instant::now();
    let result = decode_output(&data, &shape, &letterbox, &self.params)?;
    debug!(
      "后处理完成，检测到 {} 个目标，耗时: {:.2?}",
      result.len(),
      now.elapsed()
    );
    Ok(result)
  }
}

/// 等比缩放并居中填充到模型输入尺寸
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
  scale: f32,
  left: f32,
  top: f32,
  width: u32,
  height: u32,
}

impl Letterbox {
  fn apply(frame: &RgbNhwcFrame, (in_h, in_w): (u32, u32)) -> (Array4<f32>, Letterbox) {
    let (width, height) = frame.dimensions();
    let scale = (in_w as f32 / width.max(1) as f32).min(in_h as f32 / height.max(1) as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, in_w);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, in_h);

    let left = ((in_w - new_w) as f32 / 2.0 - 0.1).round().max(0.0);
    let top = ((in_h - new_h) as f32 / 2.0 - 0.1).round().max(0.0);

    let resized = imageops::resize(&frame.to_rgb_image(), new_w, new_h, FilterType::Triangle);
    let mut tensor = Array4::<f32>::from_elem((1, 3, in_h as usize, in_w as usize), YOLO_PAD_VALUE);
    let (left_px, top_px) = (left as usize, top as usize);
    for (x, y, pixel) in resized.enumerate_pixels() {
      let (x, y) = (left_px + x as usize, top_px + y as usize);
      for c in 0..3 {
        tensor[[0, c, y, x]] = pixel[c] as f32 / 255.0;
      }
    }

    let letterbox = Letterbox {
      scale,
      left,
      top,
      width,
      height,
    };
    (tensor, letterbox)
  }

  /// 输入坐标系下的框映射回原图，并裁剪到图像范围内
  fn restore(&self, cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
    let (max_x, max_y) = (self.width as f32, self.height as f32);
    [
      ((cx - w / 2.0 - self.left) / self.scale).clamp(0.0, max_x),
      ((cy - h / 2.0 - self.top) / self.scale).clamp(0.0, max_y),
      ((cx + w / 2.0 - self.left) / self.scale).clamp(0.0, max_x),
      ((cy + h / 2.0 - self.top) / self.scale).clamp(0.0, max_y),
    ]
  }
}

/// 解析 `[1, 4 + nc, anchors]` 或 `[1, anchors, 4 + nc]` 形式的输出
fn decode_output(
  data: &[f32],
  shape: &[usize],
  letterbox: &Letterbox,
  params: &YoloParams,
) -> Result<DetectResult, YoloError> {
  let (features, anchors, channels_first) = match *shape {
    [1, a, b] if a < b => (a, b, true),
    [1, a, b] => (b, a, false),
    _ => return Err(YoloError::OutputShape(shape.to_vec())),
  };
  if features <= YOLO_BOX_FEATURES || data.len() != features * anchors {
    return Err(YoloError::OutputShape(shape.to_vec()));
  }

  let at = |anchor: usize, feature: usize| -> f32 {
    if channels_first {
      data[feature * anchors + anchor]
    } else {
      data[anchor * features + feature]
    }
  };

  let mut candidates = Vec::new();
  for anchor in 0..anchors {
    let (class_id, score) = (YOLO_BOX_FEATURES..features)
      .map(|f| (f - YOLO_BOX_FEATURES, at(anchor, f)))
      .fold((0usize, f32::NEG_INFINITY), |best, cur| {
        if cur.1 > best.1 { cur } else { best }
      });

    if !score.is_finite() || score < params.confidence {
      continue;
    }

    let (cx, cy, w, h) = (
      at(anchor, 0),
      at(anchor, 1),
      at(anchor, 2),
      at(anchor, 3),
    );
    if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) || w <= 0.0 || h <= 0.0 {
      continue;
    }

    let item = DetectItem::new(class_id as u32, score, letterbox.restore(cx, cy, w, h));
    if item.width() <= 0.0 || item.height() <= 0.0 {
      continue;
    }
    candidates.push(item);
  }

  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
  if candidates.len() > YOLO_MAX_NMS_INPUTS {
    warn!("候选框过多，截断到 {}", YOLO_MAX_NMS_INPUTS);
    candidates.truncate(YOLO_MAX_NMS_INPUTS);
  }

  Ok(non_maximum_suppression(candidates, params.iou, params.max_det).into())
}

/// 按类别做 NMS，输入需已按置信度降序排列
fn non_maximum_suppression(candidates: Vec<DetectItem>, iou: f32, max_det: usize) -> Vec<DetectItem> {
  let mut kept: Vec<DetectItem> = Vec::new();
  for item in candidates {
    if kept.len() >= max_det {
      break;
    }
    let suppressed = kept
      .iter()
      .any(|k| k.class_id == item.class_id && k.iou(&item) > iou);
    if !suppressed {
      kept.push(item);
    }
  }
  kept
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn frame(width: u32, height: u32) -> RgbNhwcFrame {
    RgbNhwcFrame::from(RgbImage::from_pixel(width, height, Rgb([255, 0, 0])))
  }

  #[test]
  fn builder_reads_query_parameters() {
    let url = Url::parse("yolo:///models/best.onnx?conf=0.4&iou=0.5&max_det=10&imgsz=320").unwrap();
    let builder = YoloBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), Path::new("/models/best.onnx"));
    assert_eq!(builder.params.confidence, 0.4);
    assert_eq!(builder.params.iou, 0.5);
    assert_eq!(builder.params.max_det, 10);
    assert_eq!(builder.params.input_size, Some(320));
  }

  #[test]
  fn builder_accepts_relative_path() {
    let url = Url::parse("yolo:best.onnx").unwrap();
    let builder = YoloBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), Path::new("best.onnx"));
    assert_eq!(builder.params, YoloParams::default());
  }

  #[test]
  fn builder_decodes_escaped_paths() {
    let url = Url::parse("yolo:///models/brain model/最佳.onnx?conf=0.3").unwrap();
    let builder = YoloBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), Path::new("/models/brain model/最佳.onnx"));
    assert_eq!(builder.params.confidence, 0.3);
  }

  #[test]
  fn builder_rejects_bad_urls() {
    let wrong_scheme = Url::parse("file:///models/best.onnx").unwrap();
    assert!(matches!(
      YoloBuilder::from_url(&wrong_scheme),
      Err(YoloError::ModelPathError(_))
    ));
    let bad_conf = Url::parse("yolo:best.onnx?conf=1.5").unwrap();
    assert!(matches!(
      YoloBuilder::from_url(&bad_conf),
      Err(YoloError::InvalidParam(_))
    ));
    let not_a_number = Url::parse("yolo:best.onnx?iou=high").unwrap();
    assert!(YoloBuilder::from_url(&not_a_number).is_err());
  }

  #[test]
  fn missing_model_file_fails_before_session() {
    let result = YoloBuilder::new("/nonexistent/tumorlens/best.onnx").build();
    assert!(matches!(result, Err(YoloError::ModelNotFound(_))));
  }

  #[test]
  fn parses_imgsz_metadata() {
    assert_eq!(parse_imgsz("[640, 640]"), Some((640, 640)));
    assert_eq!(parse_imgsz("[480, 640]"), Some((480, 640)));
    assert_eq!(parse_imgsz("512"), Some((512, 512)));
    assert_eq!(parse_imgsz("[]"), None);
  }

  #[test]
  fn letterbox_pads_short_side() {
    let (tensor, letterbox) = Letterbox::apply(&frame(100, 50), (64, 64));
    assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
    assert_eq!(letterbox.scale, 0.64);
    assert_eq!(letterbox.left, 0.0);
    assert_eq!(letterbox.top, 16.0);
    // 填充区域保持灰色，图像区域为红色
    assert_eq!(tensor[[0, 0, 0, 0]], YOLO_PAD_VALUE);
    assert_eq!(tensor[[0, 0, 32, 32]], 1.0);
    assert_eq!(tensor[[0, 1, 32, 32]], 0.0);
  }

  #[test]
  fn restore_inverts_letterbox() {
    let letterbox = Letterbox {
      scale: 0.5,
      left: 0.0,
      top: 10.0,
      width: 200,
      height: 100,
    };
    // 输入坐标 (50, 35) 处 20x10 的框，对应原图 (80, 40) - (120, 60)
    assert_eq!(letterbox.restore(50.0, 35.0, 20.0, 10.0), [80.0, 40.0, 120.0, 60.0]);
    // 超出原图的部分被裁剪
    assert_eq!(letterbox.restore(95.0, 35.0, 20.0, 10.0), [170.0, 40.0, 200.0, 60.0]);
  }

  fn identity_letterbox() -> Letterbox {
    Letterbox {
      scale: 1.0,
      left: 0.0,
      top: 0.0,
      width: 100,
      height: 100,
    }
  }

  #[test]
  fn decodes_channels_first_output() {
    // 6 个特征 (4 框 + 2 类)，8 个锚点，只有锚点 2 与 5 超过阈值
    let (features, anchors) = (6, 8);
    let mut data = vec![0.0f32; features * anchors];
    let mut set = |anchor: usize, values: [f32; 6]| {
      for (f, v) in values.iter().enumerate() {
        data[f * anchors + anchor] = *v;
      }
    };
    set(2, [20.0, 20.0, 10.0, 10.0, 0.1, 0.43]);
    set(5, [60.0, 60.0, 20.0, 20.0, 0.91, 0.2]);

    let params = YoloParams::default();
    let result = decode_output(&data, &[1, features, anchors], &identity_letterbox(), &params).unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(result.items[0].class_id, 0);
    assert_eq!(result.items[0].score, 0.91);
    assert_eq!(result.items[0].bbox, [50.0, 50.0, 70.0, 70.0]);
    assert_eq!(result.items[1].class_id, 1);
    assert_eq!(result.items[1].bbox, [15.0, 15.0, 25.0, 25.0]);
  }

  #[test]
  fn decodes_anchor_major_output() {
    // 7 个锚点，每行 6 个特征
    let mut data = vec![0.0f32; 7 * 6];
    data[..6].copy_from_slice(&[10.0, 10.0, 4.0, 4.0, 0.9, 0.0]);
    data[6..12].copy_from_slice(&[50.0, 50.0, 4.0, 4.0, 0.0, 0.05]);
    let params = YoloParams::default();
    let result = decode_output(&data, &[1, 7, 6], &identity_letterbox(), &params).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].bbox, [8.0, 8.0, 12.0, 12.0]);
  }

  #[test]
  fn rejects_unexpected_shapes() {
    let params = YoloParams::default();
    let letterbox = identity_letterbox();
    assert!(decode_output(&[0.0; 4], &[1, 4], &letterbox, &params).is_err());
    assert!(decode_output(&[0.0; 8], &[1, 4, 2], &letterbox, &params).is_err());
    assert!(decode_output(&[0.0; 5], &[1, 6, 8], &letterbox, &params).is_err());
  }

  #[test]
  fn nms_is_per_class() {
    let a = DetectItem::new(0, 0.9, [0.0, 0.0, 10.0, 10.0]);
    let b = DetectItem::new(0, 0.8, [1.0, 1.0, 11.0, 11.0]);
    let c = DetectItem::new(1, 0.7, [1.0, 1.0, 11.0, 11.0]);
    let kept = non_maximum_suppression(vec![a, b, c], 0.5, 300);
    assert_eq!(kept, vec![a, c]);

    let kept = non_maximum_suppression(vec![a, c], 0.5, 1);
    assert_eq!(kept, vec![a]);
  }
}
