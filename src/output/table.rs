// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// src/output/table.rs - 检测结果表格
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

use serde::{Deserialize, Serialize};

use crate::model::{ClassNames, DetectItem, DetectResult};

/// 表格列名，顺序即展示顺序
pub const TABLE_COLUMNS: [&str; 6] = ["Class", "Confidence", "Xmin", "Ymin", "Xmax", "Ymax"];

/// 检测表中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRow {
  #[serde(rename = "Class")]
  pub class: String,
  #[serde(rename = "Confidence")]
  pub confidence: f64,
  #[serde(rename = "Xmin")]
  pub xmin: i64,
  #[serde(rename = "Ymin")]
  pub ymin: i64,
  #[serde(rename = "Xmax")]
  pub xmax: i64,
  #[serde(rename = "Ymax")]
  pub ymax: i64,
}

impl DetectionRow {
  pub fn new(item: &DetectItem, names: &ClassNames) -> Self {
    let [xmin, ymin, xmax, ymax] = item.bbox.map(|v| v.trunc() as i64);
    Self {
      class: names.label(item.class_id).into_owned(),
      confidence: round_to(item.score as f64, 3),
      xmin,
      ymin,
      xmax,
      ymax,
    }
  }
}

/// 按十进制保留位数舍入，按二进制值的精确展开取最近，恰好一半时取偶数
fn round_to(value: f64, digits: usize) -> f64 {
  format!("{:.*}", digits, value).parse().unwrap_or(value)
}

/// 每个检测一行，保持检测器给出的顺序；空结果得到空表
pub fn build_table(result: &DetectResult, names: &ClassNames) -> Vec<DetectionRow> {
  result.iter().map(|item| DetectionRow::new(item, names)).collect()
}
