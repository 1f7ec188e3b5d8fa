// 该文件是 Qianmian （千面） 项目的一部分。
// src/config.rs - 检测器配置
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

use crate::{
  decode::Variance,
  filter::{FilterParams, NmsScope, ScoreFusion},
};

const DEFAULT_INPUT_W: u32 = 320;
const DEFAULT_INPUT_H: u32 = 240;
const DEFAULT_CONF_THRESHOLD: f32 = 0.6;
const DEFAULT_NMS_THRESHOLD: f32 = 0.3;
const DEFAULT_TOP_K: usize = 0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("输入尺寸无效: {0}x{1}")]
  InvalidInputSize(u32, u32),
  #[error("置信度阈值必须在 [0, 1] 内: {0}")]
  InvalidConfThreshold(f32),
  #[error("NMS 阈值必须在 [0, 1] 内: {0}")]
  InvalidNmsThreshold(f32),
  #[error("方差必须为正数: center={0}, size={1}")]
  InvalidVariance(f32, f32),
}

/// 检测器配置，进入逐帧处理前校验
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  /// 网络输入宽度，需与推理阶段一致
  pub input_width: u32,
  /// 网络输入高度，需与推理阶段一致
  pub input_height: u32,
  pub conf_threshold: f32,
  pub nms_threshold: f32,
  /// 进入 NMS 的候选数量上限，0 表示不限
  pub top_k: usize,
  pub variance: Variance,
  pub fusion: ScoreFusion,
  pub scope: NmsScope,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      input_width: DEFAULT_INPUT_W,
      input_height: DEFAULT_INPUT_H,
      conf_threshold: DEFAULT_CONF_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
      top_k: DEFAULT_TOP_K,
      variance: Variance::default(),
      fusion: ScoreFusion::default(),
      scope: NmsScope::default(),
    }
  }
}

fn in_unit_range(v: f32) -> bool {
  (0.0..=1.0).contains(&v)
}

impl DetectorConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.input_width == 0 || self.input_height == 0 {
      return Err(ConfigError::InvalidInputSize(
        self.input_width,
        self.input_height,
      ));
    }
    if !in_unit_range(self.conf_threshold) {
      return Err(ConfigError::InvalidConfThreshold(self.conf_threshold));
    }
    if !in_unit_range(self.nms_threshold) {
      return Err(ConfigError::InvalidNmsThreshold(self.nms_threshold));
    }
    let Variance { center, size } = self.variance;
    if !(center.is_finite() && center > 0.0 && size.is_finite() && size > 0.0) {
      return Err(ConfigError::InvalidVariance(center, size));
    }
    Ok(())
  }

  pub fn filter_params(&self) -> FilterParams {
    FilterParams {
      conf_threshold: self.conf_threshold,
      nms_threshold: self.nms_threshold,
      top_k: self.top_k,
      fusion: self.fusion,
      scope: self.scope,
    }
  }
}
