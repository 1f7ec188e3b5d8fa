// 该文件是 Qianmian （千面） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage, imageops::FilterType};
use imageproc::{
  drawing::{
    draw_filled_rect_mut, draw_hollow_circle_mut, draw_hollow_rect_mut, draw_text_mut, text_size,
  },
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{
  frame::TensorFrame,
  model::{DetectResult, PixelItem, WithLabel},
};

const LABEL_FONT_SIZE: f32 = 16.0;
const BOX_THICKNESS: i32 = 2;
const LANDMARK_RADIUS: i32 = 2;
/// 画面外保留的余量，超出的坐标截断到此范围，离屏的边仍不可见
const CANVAS_MARGIN: f32 = 64.0;
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const LANDMARK_PALETTE: [Rgb<u8>; 6] = [
  Rgb([0, 0, 255]),
  Rgb([255, 0, 0]),
  Rgb([255, 255, 0]),
  Rgb([0, 255, 255]),
  Rgb([0, 255, 0]),
  Rgb([255, 255, 255]),
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 关键点颜色按序号循环取色
pub fn landmark_color(index: usize) -> Rgb<u8> {
  LANDMARK_PALETTE[index % LANDMARK_PALETTE.len()]
}

/// 像素坐标取整并截断到画面加余量的范围内；非有限值返回 `None`
fn canvas_coord(v: f32, extent: u32) -> Option<i32> {
  if !v.is_finite() {
    return None;
  }
  Some(v.round().clamp(-CANVAS_MARGIN, extent as f32 + CANVAS_MARGIN) as i32)
}

/// 标签放在框上方；框太靠上时下移，保证标签不超出画面顶部
fn label_top(box_top: i32, label_height: i32) -> i32 {
  box_top.max(label_height) - label_height
}

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  box_color: Rgb<u8>,
  label_text_color: Rgb<u8>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      box_color: BOX_COLOR,
      label_text_color: LABEL_TEXT_COLOR,
    }
  }
}

impl Draw {
  pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data)?;
    debug!("加载字体: {}", path.as_ref().display());
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  /// 从输出 URL 的 `font` 与 `font_size` 参数构造
  pub fn from_url_query(url: &Url) -> Result<Self, DrawError> {
    let mut draw = Draw::default();
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "font" => {
          draw = Draw {
            font_size: draw.font_size,
            ..Draw::with_font_file(&*value)?
          };
        }
        "font_size" => match value.parse() {
          Ok(size) => draw.font_size = size,
          Err(_) => warn!("忽略无效的字体大小: {}", value),
        },
        _ => {}
      }
    }
    Ok(draw)
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 帧的背景图像；没有背景时使用目标尺寸的黑色画布
  pub fn canvas(&self, frame: &TensorFrame) -> Result<RgbImage, DrawError> {
    let Some(path) = &frame.background else {
      return Ok(RgbImage::new(frame.width, frame.height));
    };

    let image = image::open(path)?.to_rgb8();
    if image.dimensions() == (frame.width, frame.height) {
      Ok(image)
    } else {
      debug!(
        "背景 {}x{} 缩放到 {}x{}",
        image.width(),
        image.height(),
        frame.width,
        frame.height
      );
      Ok(image::imageops::resize(
        &image,
        frame.width,
        frame.height,
        FilterType::Triangle,
      ))
    }
  }

  /// 缩放到帧尺寸并绘制，先画最后一个结果，使排在前面的结果位于最上层
  pub fn render<T: WithLabel>(
    &self,
    frame: &TensorFrame,
    result: &DetectResult<T>,
  ) -> Result<RgbImage, DrawError> {
    let mut image = self.canvas(frame)?;
    let items = result.to_pixels(frame.width, frame.height);
    self.draw_items(&mut image, &items);
    Ok(image)
  }

  pub fn draw_items<T: WithLabel>(&self, image: &mut RgbImage, items: &[PixelItem<'_, T>]) {
    if self.font.is_none() && !items.is_empty() {
      debug!("未配置字体, 跳过置信度标签");
    }
    let (width, height) = image.dimensions();
    for item in items.iter().rev() {
      let [left, top, right, bottom] = item.bbox;
      match (
        canvas_coord(left, width),
        canvas_coord(top, height),
        canvas_coord(right, width),
        canvas_coord(bottom, height),
      ) {
        (Some(left), Some(top), Some(right), Some(bottom)) => {
          self.draw_box(image, left, top, right, bottom);
          self.draw_label(image, left, top, item.score);
        }
        _ => debug!("跳过非有限坐标的检测框: {:?}", item.bbox),
      }
      for (i, [x, y]) in item.landmarks.iter().enumerate() {
        let (Some(x), Some(y)) = (canvas_coord(*x, width), canvas_coord(*y, height)) else {
          continue;
        };
        let center = (x, y);
        let color = landmark_color(i);
        for r in LANDMARK_RADIUS..LANDMARK_RADIUS + 2 {
          draw_hollow_circle_mut(image, center, r, color);
        }
      }
    }
  }

  fn draw_box(&self, image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32) {
    for t in 0..BOX_THICKNESS {
      let width = right - left + 1 - 2 * t;
      let height = bottom - top + 1 - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(left + t, top + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, self.box_color);
    }
  }

  fn draw_label(&self, image: &mut RgbImage, left: i32, top: i32, score: f32) {
    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{:.4}", score);
    let scale = PxScale::from(self.font_size);
    let (width, height) = text_size(scale, font, &label);
    if width == 0 || height == 0 {
      return;
    }

    let y = label_top(top, height as i32);
    draw_filled_rect_mut(image, Rect::at(left, y).of_size(width, height), self.box_color);
    draw_text_mut(image, self.label_text_color, left, y, scale, font, &label);
  }
}
