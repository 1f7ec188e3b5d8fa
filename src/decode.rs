// 该文件是 Qianmian （千面） 项目的一部分。
// src/decode.rs - 位置偏移解码
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

use thiserror::Error;
use tracing::error;

use crate::{frame::Tensor, prior::Prior};

const BOX_COLS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
  #[error("{name} 张量行数 {actual} 与先验框数量 {expected} 不一致")]
  RowCountMismatch {
    name: &'static str,
    expected: usize,
    actual: usize,
  },
  #[error("位置张量每行至少需要 4 列, 实际为 {0} 列")]
  TooFewColumns(usize),
  #[error("关键点偏移必须成对出现, 实际有 {0} 列")]
  OddLandmarkColumns(usize),
  #[error("{name} 张量列数 {actual} 不满足要求: {expected}")]
  ColumnMismatch {
    name: &'static str,
    expected: &'static str,
    actual: usize,
  },
}

/// 训练模型的后处理方差常数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Variance {
  pub center: f32,
  pub size: f32,
}

impl Default for Variance {
  fn default() -> Self {
    Self {
      center: 0.1,
      size: 0.2,
    }
  }
}

/// 角点形式的边界框 `(left, top, right, bottom)`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DecodedBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl DecodedBox {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  /// 取行首四列，调用方保证行长度不少于 4
  fn from_row(row: &[f32]) -> Self {
    Self::new(row[0], row[1], row[2], row[3])
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn area(&self) -> f32 {
    self.width().max(0.0) * self.height().max(0.0)
  }

  pub fn iou(&self, other: &Self) -> f32 {
    let x1 = self.left.max(other.left);
    let y1 = self.top.max(other.top);
    let x2 = self.right.min(other.right);
    let y2 = self.bottom.min(other.bottom);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }

  pub fn to_array(&self) -> [f32; 4] {
    [self.left, self.top, self.right, self.bottom]
  }
}

/// 一行解码结果：角点框和关键点
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRow<'a> {
  pub bbox: DecodedBox,
  pub landmarks: &'a [f32],
}

/// 已解码的位置张量视图
pub fn rows(decoded: &Tensor) -> impl Iterator<Item = DecodedRow<'_>> {
  decoded.iter_rows().map(|row| DecodedRow {
    bbox: DecodedBox::from_row(row),
    landmarks: &row[BOX_COLS..],
  })
}

pub(crate) fn check_rows(
  name: &'static str,
  tensor: &Tensor,
  expected: usize,
) -> Result<(), DecodeError> {
  if tensor.rows() != expected {
    error!(
      "{} 张量行数不匹配: 期望 {}, 实际 {}",
      name,
      expected,
      tensor.rows()
    );
    return Err(DecodeError::RowCountMismatch {
      name,
      expected,
      actual: tensor.rows(),
    });
  }
  Ok(())
}

fn check_location_shape(loc: &Tensor, priors: &[Prior]) -> Result<(), DecodeError> {
  check_rows("loc", loc, priors.len())?;
  if loc.is_empty() {
    return Ok(());
  }
  if loc.cols() < BOX_COLS {
    return Err(DecodeError::TooFewColumns(loc.cols()));
  }
  if (loc.cols() - BOX_COLS) % 2 != 0 {
    return Err(DecodeError::OddLandmarkColumns(loc.cols() - BOX_COLS));
  }
  Ok(())
}

#[inline]
fn decode_center(offset: f32, variance: f32, prior_size: f32, prior_center: f32) -> f32 {
  offset * variance * prior_size + prior_center
}

/// `(cx, cy, w, h)` 转为 `(left, top, right, bottom)`
///
/// 右下角按 `min + size` 计算而非 `center + half`，保持与训练时后处理的数值一致。
pub fn center_to_corner(row: &mut [f32]) {
  let (w, h) = (row[2], row[3]);
  let half_w = w / 2.0;
  let half_h = h / 2.0;
  row[0] -= half_w;
  row[1] -= half_h;
  row[2] = row[0] + w;
  row[3] = row[1] + h;
}

/// 原地解码位置张量
///
/// 每行前四列为框偏移，其后每两列为一个关键点偏移。解码后前四列为归一化的角点框，
/// 关键点为归一化坐标。
pub fn decode_in_place(
  loc: &mut Tensor,
  priors: &[Prior],
  variance: Variance,
) -> Result<(), DecodeError> {
  check_location_shape(loc, priors)?;

  for (row, prior) in loc.iter_rows_mut().zip(priors) {
    row[0] = decode_center(row[0], variance.center, prior.w, prior.cx);
    row[1] = decode_center(row[1], variance.center, prior.h, prior.cy);
    row[2] = prior.w * (row[2] * variance.size).exp();
    row[3] = prior.h * (row[3] * variance.size).exp();

    for point in row[BOX_COLS..].chunks_exact_mut(2) {
      point[0] = decode_center(point[0], variance.center, prior.w, prior.cx);
      point[1] = decode_center(point[1], variance.center, prior.h, prior.cy);
    }
  }

  for row in loc.iter_rows_mut() {
    center_to_corner(row);
  }

  Ok(())
}

pub fn decode(loc: &Tensor, priors: &[Prior], variance: Variance) -> Result<Tensor, DecodeError> {
  let mut decoded = loc.clone();
  decode_in_place(&mut decoded, priors, variance)?;
  Ok(decoded)
}

/// 解码的逆变换：由角点框与关键点得到相对先验框的偏移
pub fn encode(
  bbox: &DecodedBox,
  landmarks: &[f32],
  prior: &Prior,
  variance: Variance,
) -> Vec<f32> {
  let w = bbox.width();
  let h = bbox.height();
  let cx = bbox.left + w / 2.0;
  let cy = bbox.top + h / 2.0;

  let mut offsets = Vec::with_capacity(BOX_COLS + landmarks.len());
  offsets.push((cx - prior.cx) / (variance.center * prior.w));
  offsets.push((cy - prior.cy) / (variance.center * prior.h));
  offsets.push((w / prior.w).ln() / variance.size);
  offsets.push((h / prior.h).ln() / variance.size);
  for point in landmarks.chunks_exact(2) {
    offsets.push((point[0] - prior.cx) / (variance.center * prior.w));
    offsets.push((point[1] - prior.cy) / (variance.center * prior.h));
  }
  offsets
}
