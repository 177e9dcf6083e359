// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// src/output.rs - 输出定义
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

use std::convert::Infallible;

/// 处理结果的去向
pub trait Render<Report> {
  type Error;
  fn render_result(&self, report: &Report) -> Result<(), Self::Error>;
}

/// 不做任何输出，调用方自行使用返回的结果
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl<Report> Render<Report> for Discard {
  type Error = Infallible;

  fn render_result(&self, _report: &Report) -> Result<(), Self::Error> {
    Ok(())
  }
}

pub mod draw;
pub mod encode;
pub mod table;

mod directory_record;
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};
pub use self::draw::{Draw, DrawError};
pub use self::encode::{EncodeError, download_name, encode_png};
pub use self::table::{DetectionRow, build_table};
