// 该文件是 Qianmian （千面） 项目的一部分。
// src/frame.rs - 原始张量帧定义
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

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("第 {row} 行长度为 {actual}, 与首行长度 {expected} 不一致")]
  RaggedRow {
    row: usize,
    expected: usize,
    actual: usize,
  },
  #[error("非空张量的列数不能为 0")]
  ZeroColumns,
}

/// 行主序的二维 f32 张量，每行对应一个先验框
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  data: Box<[f32]>,
  rows: usize,
  cols: usize,
}

impl Tensor {
  pub fn from_shape_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, TensorError> {
    if cols == 0 && rows > 0 {
      return Err(TensorError::ZeroColumns);
    }
    if data.len() != rows * cols {
      return Err(TensorError::LengthMismatch {
        expected: rows * cols,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
      rows,
      cols,
    })
  }

  /// 由逐行数据构建，所有行必须等长
  pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self, TensorError> {
    let cols = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
    let mut data = Vec::with_capacity(rows.len() * cols);
    for (idx, row) in rows.iter().enumerate() {
      let row = row.as_ref();
      if row.len() != cols {
        return Err(TensorError::RaggedRow {
          row: idx,
          expected: cols,
          actual: row.len(),
        });
      }
      data.extend_from_slice(row);
    }
    Self::from_shape_vec(rows.len(), cols, data)
  }

  /// 全零张量，与 `from_shape_vec` 同样拒绝有行无列的形状
  pub fn zeros(rows: usize, cols: usize) -> Result<Self, TensorError> {
    Self::from_shape_vec(rows, cols, vec![0.0; rows * cols])
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  pub fn is_empty(&self) -> bool {
    self.rows == 0
  }

  pub fn row(&self, idx: usize) -> Option<&[f32]> {
    if idx >= self.rows {
      return None;
    }
    let start = idx * self.cols;
    self.data.get(start..start + self.cols)
  }

  pub fn row_mut(&mut self, idx: usize) -> Option<&mut [f32]> {
    if idx >= self.rows {
      return None;
    }
    let start = idx * self.cols;
    self.data.get_mut(start..start + self.cols)
  }

  pub fn iter_rows(&self) -> std::slice::ChunksExact<'_, f32> {
    self.data.chunks_exact(self.cols.max(1))
  }

  pub fn iter_rows_mut(&mut self) -> std::slice::ChunksExactMut<'_, f32> {
    self.data.chunks_exact_mut(self.cols.max(1))
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

/// 外部推理阶段交付的一帧原始输出
///
/// `width`/`height` 是目标画面的像素尺寸，而非网络输入尺寸。
#[derive(Debug, Clone)]
pub struct TensorFrame {
  pub index: usize,
  pub width: u32,
  pub height: u32,
  /// 位置偏移 `[num_priors, 4 + 2 * num_landmarks]`
  pub loc: Tensor,
  /// 置信度 `[num_priors, 1 + num_classes]`，第 0 列为背景
  pub conf: Tensor,
  /// 可选的 IoU 质量分支 `[num_priors, 1]`
  pub iou: Option<Tensor>,
  /// 可选的背景图像路径，叠加层绘制在其上
  pub background: Option<PathBuf>,
}

impl TensorFrame {
  pub fn new(width: u32, height: u32, loc: Tensor, conf: Tensor) -> Self {
    Self {
      index: 0,
      width,
      height,
      loc,
      conf,
      iou: None,
      background: None,
    }
  }

  pub fn with_iou(mut self, iou: Tensor) -> Self {
    self.iou = Some(iou);
    self
  }

  pub fn with_index(mut self, index: usize) -> Self {
    self.index = index;
    self
  }

  pub fn with_background(mut self, background: PathBuf) -> Self {
    self.background = Some(background);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ragged_rows_are_rejected() {
    let err = Tensor::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
    assert_eq!(
      err,
      TensorError::RaggedRow {
        row: 1,
        expected: 2,
        actual: 1
      }
    );
  }

  #[test]
  fn rows_are_bounds_checked() {
    let t = Tensor::from_shape_vec(2, 3, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
    assert_eq!(t.row(1), Some(&[3.0, 4.0, 5.0][..]));
    assert_eq!(t.row(2), None);
    assert_eq!(t.iter_rows().count(), 2);
  }

  #[test]
  fn empty_tensor_has_no_rows() {
    let t = Tensor::from_rows::<Vec<f32>>(&[]).unwrap();
    assert!(t.is_empty());
    assert_eq!(t.iter_rows().count(), 0);
  }

  #[test]
  fn length_must_match_shape() {
    assert!(matches!(
      Tensor::from_shape_vec(2, 2, vec![0.0; 3]),
      Err(TensorError::LengthMismatch {
        expected: 4,
        actual: 3
      })
    ));
    assert_eq!(
      Tensor::from_shape_vec(1, 0, vec![]),
      Err(TensorError::ZeroColumns)
    );
  }

  #[test]
  fn zeros_rejects_rows_without_columns() {
    assert_eq!(Tensor::zeros(3, 0), Err(TensorError::ZeroColumns));

    let empty = Tensor::zeros(0, 0).unwrap();
    assert!(empty.is_empty());
    assert_eq!(empty.iter_rows().count(), 0);

    let t = Tensor::zeros(3, 2).unwrap();
    assert_eq!(t.rows(), 3);
    assert_eq!(t.iter_rows().count(), 3);
    assert!(t.as_slice().iter().all(|v| *v == 0.0));
  }
}
