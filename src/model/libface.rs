// 该文件是 Qianmian （千面） 项目的一部分。
// src/model/libface.rs - libfacedetection 人脸检测后处理
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

//! # libfacedetection 后处理
//!
//! 推理阶段（不在本库范围内）为每个先验框输出一行：
//! - `loc`: `[num_priors, 14]`，框偏移 4 列 + 5 个关键点偏移
//! - `conf`: `[num_priors, 2]`，背景与人脸得分
//! - `iou`: `[num_priors, 1]`，可选的 IoU 质量分支
//!
//! 本模块依次完成先验框解码、置信度过滤与 NMS，输出归一化坐标的检测结果。
//!
//! ## URL 配置
//!
//! ```text
//! libface:///?width=320&height=240&conf=0.6&nms=0.3&fusion=iou&scope=global
//! ```
//!
//! 默认不限制进入 NMS 的候选数量，需要时加上 `top_k`：
//!
//! ```text
//! libface:///?conf=0.6&nms=0.3&top_k=750
//! ```
//!
//! 未给出的参数使用默认值。

use std::{marker::PhantomData, str::FromStr};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::{ConfigError, DetectorConfig},
  decode::{self, DecodeError, Variance},
  filter::{self, NmsScope, ScoreFusion},
  frame::TensorFrame,
  model::{DetectItem, DetectResult, Model, WithLabel},
  prior::{AnchorLayout, PriorBox},
};

#[derive(Error, Debug)]
pub enum FaceDetectionError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("解码错误: {0}")]
  Decode(#[from] DecodeError),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("参数 {0} 的值无效: {1}")]
  InvalidParameter(String, String),
}

fn parse_param<V: FromStr>(key: &str, value: &str) -> Result<V, FaceDetectionError> {
  value
    .parse()
    .map_err(|_| FaceDetectionError::InvalidParameter(key.to_string(), value.to_string()))
}

pub struct FaceDetectionBuilder {
  config: DetectorConfig,
  layout: AnchorLayout,
}

impl Default for FaceDetectionBuilder {
  fn default() -> Self {
    Self {
      config: DetectorConfig::default(),
      layout: AnchorLayout::libface(),
    }
  }
}

impl FromUrlWithScheme for FaceDetectionBuilder {
  const SCHEME: &'static str = "libface";
}

impl FromUrl for FaceDetectionBuilder {
  type Error = FaceDetectionError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(FaceDetectionError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut config = DetectorConfig::default();
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "width" => config.input_width = parse_param(&key, &value)?,
        "height" => config.input_height = parse_param(&key, &value)?,
        "conf" => config.conf_threshold = parse_param(&key, &value)?,
        "nms" => config.nms_threshold = parse_param(&key, &value)?,
        "top_k" => config.top_k = parse_param(&key, &value)?,
        "center_variance" => config.variance.center = parse_param(&key, &value)?,
        "size_variance" => config.variance.size = parse_param(&key, &value)?,
        "fusion" => {
          config.fusion = match value.as_ref() {
            "class" => ScoreFusion::ClassOnly,
            "iou" => ScoreFusion::IouAware,
            _ => return Err(FaceDetectionError::InvalidParameter(key.into(), value.into())),
          }
        }
        "scope" => {
          config.scope = match value.as_ref() {
            "global" => NmsScope::Global,
            "class" => NmsScope::PerClass,
            _ => return Err(FaceDetectionError::InvalidParameter(key.into(), value.into())),
          }
        }
        _ => warn!("忽略未知的模型参数: {}={}", key, value),
      }
    }

    Ok(FaceDetectionBuilder {
      config,
      layout: AnchorLayout::libface(),
    })
  }
}

impl FaceDetectionBuilder {
  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.config.input_width = width;
    self.config.input_height = height;
    self
  }

  pub fn conf_threshold(mut self, threshold: f32) -> Self {
    self.config.conf_threshold = threshold;
    self
  }

  pub fn nms_threshold(mut self, threshold: f32) -> Self {
    self.config.nms_threshold = threshold;
    self
  }

  pub fn top_k(mut self, top_k: usize) -> Self {
    self.config.top_k = top_k;
    self
  }

  pub fn variance(mut self, variance: Variance) -> Self {
    self.config.variance = variance;
    self
  }

  pub fn fusion(mut self, fusion: ScoreFusion) -> Self {
    self.config.fusion = fusion;
    self
  }

  pub fn scope(mut self, scope: NmsScope) -> Self {
    self.config.scope = scope;
    self
  }

  pub fn layout(mut self, layout: AnchorLayout) -> Self {
    self.layout = layout;
    self
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn build<T>(self) -> Result<FaceDetection<T>, FaceDetectionError> {
    self.config.validate()?;

    info!(
      "创建人脸检测后处理: 输入 {}x{}, 置信度阈值 {}, NMS 阈值 {}",
      self.config.input_width,
      self.config.input_height,
      self.config.conf_threshold,
      self.config.nms_threshold
    );
    let prior_box = PriorBox::new(
      self.layout,
      self.config.input_width,
      self.config.input_height,
    );
    debug!("先验框数量: {}", prior_box.len());

    Ok(FaceDetection {
      config: self.config,
      prior_box,
      _phantom: PhantomData,
    })
  }
}

pub struct FaceDetection<T> {
  config: DetectorConfig,
  prior_box: PriorBox,
  _phantom: PhantomData<T>,
}

impl<T> FaceDetection<T> {
  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn prior_box(&self) -> &PriorBox {
    &self.prior_box
  }

  /// 推理阶段的输入分辨率变化时调用，仅在尺寸确实变化时重新生成先验框
  pub fn set_input_size(&mut self, width: u32, height: u32) -> Result<bool, FaceDetectionError> {
    let config = DetectorConfig {
      input_width: width,
      input_height: height,
      ..self.config.clone()
    };
    config.validate()?;
    self.config = config;

    let regenerated = self.prior_box.resize(width, height);
    if regenerated {
      info!("输入尺寸变为 {}x{}, 先验框数量 {}", width, height, self.prior_box.len());
    }
    Ok(regenerated)
  }
}

impl<T: WithLabel> Model for FaceDetection<T> {
  type Input = TensorFrame;
  type Output = DetectResult<T>;
  type Error = FaceDetectionError;

  fn detect(&self, frame: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("解码第 {} 帧", frame.index);
    let mut loc = frame.loc.clone();
    decode::decode_in_place(&mut loc, self.prior_box.priors(), self.config.variance)?;

    let kept = filter::filter(
      &loc,
      &frame.conf,
      frame.iou.as_ref(),
      &self.config.filter_params(),
    )?;

    let items: Vec<DetectItem<T>> = kept
      .into_iter()
      .map(|c| DetectItem {
        kind: T::from_label_id(c.class_id),
        score: c.score,
        bbox: c.bbox.to_array(),
        landmarks: c
          .landmarks
          .chunks_exact(2)
          .map(|p| [p[0], p[1]])
          .collect(),
      })
      .collect();

    debug!("第 {} 帧检测到 {} 个目标", frame.index, items.len());
    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}
