// 该文件是 Qianmian （千面） 项目的一部分。
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

/// 检测后处理模型：将推理阶段的原始输出转为检测结果
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn detect(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，归一化
  pub landmarks: Box<[[f32; 2]]>, // 归一化
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> DetectResult<T> {
  pub fn empty() -> Self {
    Self {
      items: Box::new([]),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem<T>> {
    self.items.iter()
  }
}

/// 还原到目标帧像素坐标的检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct PixelItem<'a, T> {
  pub kind: &'a T,
  pub score: f32,
  pub bbox: [f32; 4], // [left, top, right, bottom]，像素
  pub landmarks: Box<[[f32; 2]]>,
}

impl<T> DetectItem<T> {
  /// x 乘以宽度，y 乘以高度；每个结果只应缩放一次
  pub fn to_pixels(&self, width: u32, height: u32) -> PixelItem<'_, T> {
    let (w, h) = (width as f32, height as f32);
    let [left, top, right, bottom] = self.bbox;
    PixelItem {
      kind: &self.kind,
      score: self.score,
      bbox: [left * w, top * h, right * w, bottom * h],
      landmarks: self.landmarks.iter().map(|[x, y]| [x * w, y * h]).collect(),
    }
  }
}

impl<T> DetectResult<T> {
  pub fn to_pixels(&self, width: u32, height: u32) -> Vec<PixelItem<'_, T>> {
    self.items.iter().map(|item| item.to_pixels(width, height)).collect()
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;
}

/// 单类别人脸检测器的标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceLabel {
  Face,
}

impl WithLabel for FaceLabel {
  fn to_label_str(&self) -> String {
    "face".to_string()
  }

  fn to_label_id(&self) -> u32 {
    0
  }

  fn from_label_id(_id: u32) -> Self {
    FaceLabel::Face
  }
}

/// 多类别检测器的通用数字标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLabel(pub u32);

impl WithLabel for ClassLabel {
  fn to_label_str(&self) -> String {
    format!("class{}", self.0)
  }

  fn to_label_id(&self) -> u32 {
    self.0
  }

  fn from_label_id(id: u32) -> Self {
    ClassLabel(id)
  }
}

#[cfg(feature = "model_libface")]
mod libface;
#[cfg(feature = "model_libface")]
pub use self::libface::{FaceDetection, FaceDetectionBuilder, FaceDetectionError};
