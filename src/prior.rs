// 该文件是 Qianmian （千面） 项目的一部分。
// src/prior.rs - 先验框生成
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
use tracing::debug;

const LIBFACE_STRIDES: [u32; 4] = [8, 16, 32, 64];
const LIBFACE_MIN_SIZES: [&[f32]; 4] = [
  &[10.0, 16.0, 24.0],
  &[32.0, 48.0],
  &[64.0, 96.0],
  &[128.0, 192.0, 256.0],
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnchorLayoutError {
  #[error("第 {0} 层的步长为 0")]
  ZeroStride(usize),
  #[error("第 {0} 层没有最小框尺寸")]
  EmptyMinSizes(usize),
  #[error("第 {level} 层的最小框尺寸无效: {size}")]
  InvalidMinSize { level: usize, size: f32 },
}

/// 先验框，中心-尺寸形式，均归一化到 [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prior {
  pub cx: f32,
  pub cy: f32,
  pub w: f32,
  pub h: f32,
}

impl Prior {
  /// 先验框自身的角点形式 `[left, top, right, bottom]`
  pub fn corners(&self) -> [f32; 4] {
    let left = self.cx - self.w / 2.0;
    let top = self.cy - self.h / 2.0;
    [left, top, left + self.w, top + self.h]
  }

  fn map(self, f: impl Fn(f32) -> f32) -> Self {
    Self {
      cx: f(self.cx),
      cy: f(self.cy),
      w: f(self.w),
      h: f(self.h),
    }
  }
}

pub(crate) fn truncate_below(v: f32) -> f32 {
  if v < 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate_above(v: f32) -> f32 {
  if v > 1.0 { 1.0 } else { v }
}

/// 单个检测尺度：特征图步长及该尺度上的最小框尺寸
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorLevel {
  pub stride: u32,
  pub min_sizes: Box<[f32]>,
}

impl AnchorLevel {
  /// 特征图尺寸 `(列数, 行数)`
  pub fn feature_map(&self, width: u32, height: u32) -> (u32, u32) {
    (width / self.stride, height / self.stride)
  }
}

/// 训练模型的锚框布局
///
/// 推理阶段输出的行顺序与此布局的迭代顺序一致：
/// 先按尺度，再按网格行主序，最后按最小框尺寸。
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorLayout {
  levels: Box<[AnchorLevel]>,
}

impl Default for AnchorLayout {
  fn default() -> Self {
    Self::libface()
  }
}

impl AnchorLayout {
  pub fn new(levels: Vec<AnchorLevel>) -> Result<Self, AnchorLayoutError> {
    for (idx, level) in levels.iter().enumerate() {
      if level.stride == 0 {
        return Err(AnchorLayoutError::ZeroStride(idx));
      }
      if level.min_sizes.is_empty() {
        return Err(AnchorLayoutError::EmptyMinSizes(idx));
      }
      if let Some(&size) = level
        .min_sizes
        .iter()
        .find(|s| !s.is_finite() || **s <= 0.0)
      {
        return Err(AnchorLayoutError::InvalidMinSize { level: idx, size });
      }
    }

    Ok(Self {
      levels: levels.into_boxed_slice(),
    })
  }

  /// libfacedetection / YuNet 系列人脸检测器的锚框布局
  pub fn libface() -> Self {
    let levels = LIBFACE_STRIDES
      .iter()
      .zip(LIBFACE_MIN_SIZES)
      .map(|(&stride, min_sizes)| AnchorLevel {
        stride,
        min_sizes: min_sizes.into(),
      })
      .collect();
    Self { levels }
  }

  pub fn levels(&self) -> &[AnchorLevel] {
    &self.levels
  }

  /// 给定输入分辨率下推理阶段必须输出的行数
  pub fn expected_len(&self, width: u32, height: u32) -> usize {
    self
      .levels
      .iter()
      .map(|level| {
        let (map_w, map_h) = level.feature_map(width, height);
        map_w as usize * map_h as usize * level.min_sizes.len()
      })
      .sum()
  }

  pub fn generate(&self, width: u32, height: u32) -> Vec<Prior> {
    let mut priors = Vec::with_capacity(self.expected_len(width, height));
    let (in_w, in_h) = (width as f32, height as f32);

    for level in self.levels.iter() {
      let (map_w, map_h) = level.feature_map(width, height);
      let grid_w = in_w / level.stride as f32;
      let grid_h = in_h / level.stride as f32;

      for j in 0..map_h {
        for i in 0..map_w {
          let cx = (i as f32 + 0.5) / grid_w;
          let cy = (j as f32 + 0.5) / grid_h;
          for &m in level.min_sizes.iter() {
            priors.push(Prior {
              cx,
              cy,
              w: m / in_w,
              h: m / in_h,
            });
          }
        }
      }
    }

    for prior in priors.iter_mut() {
      *prior = prior.map(truncate_below);
    }
    for prior in priors.iter_mut() {
      *prior = prior.map(truncate_above);
    }

    priors
  }
}

/// 按输入分辨率缓存的先验框序列
#[derive(Debug, Clone)]
pub struct PriorBox {
  layout: AnchorLayout,
  width: u32,
  height: u32,
  priors: Box<[Prior]>,
}

impl PriorBox {
  pub fn new(layout: AnchorLayout, width: u32, height: u32) -> Self {
    let priors = layout.generate(width, height).into_boxed_slice();
    debug!("生成先验框: {}x{} 共 {} 个", width, height, priors.len());
    Self {
      layout,
      width,
      height,
      priors,
    }
  }

  /// 分辨率变化时重新生成，返回是否发生了重新生成
  pub fn resize(&mut self, width: u32, height: u32) -> bool {
    if (width, height) == (self.width, self.height) {
      return false;
    }
    *self = Self::new(self.layout.clone(), width, height);
    true
  }

  pub fn priors(&self) -> &[Prior] {
    &self.priors
  }

  pub fn len(&self) -> usize {
    self.priors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.priors.is_empty()
  }

  pub fn input_size(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  pub fn layout(&self) -> &AnchorLayout {
    &self.layout
  }
}
