// 该文件是 Qianmian （千面） 项目的一部分。
// src/output/directory_record.rs - 按日期归档的目录记录输出
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

use std::{
  path::PathBuf,
  sync::atomic::{AtomicU32, Ordering},
};

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::TensorFrame,
  model::{DetectResult, WithLabel},
  output::{
    Render,
    draw::{Draw, DrawError},
    report::{ReportFormat, ReportOutputError},
    save_image_file::{SaveImageFileError, save_image},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径编码无效: {0}")]
  PathEncoding(#[from] std::string::FromUtf8Error),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("保存图像错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("报告错误: {0}")]
  ReportError(#[from] ReportOutputError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// `folder:///records?format=json&always`
///
/// 每帧写入 `YYYY/MM/DD/HH-MM-SS-NNNN.png` 与同名报告；
/// 默认只记录有检测结果的帧，带 `always` 时全部记录。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  format: ReportFormat,
  frame_counter: AtomicU32,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let mut format = ReportFormat::default();
    for (k, v) in uri.query_pairs() {
      if k == "format" {
        format = ReportFormat::parse(&v)?;
      }
    }
    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let directory = urlencoding::decode(uri.path())?;

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(directory.into_owned()),
      draw: Draw::from_url_query(uri)?,
      format,
      frame_counter: AtomicU32::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl<T: WithLabel> Render<TensorFrame, DetectResult<T>> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &TensorFrame, result: &DetectResult<T>) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      debug!("第 {} 帧无检测结果, 不记录", frame.index);
      return Ok(());
    }

    let path = self.frame_path()?;
    let image = self.draw.render(frame, result)?;
    save_image(&image, &path)?;

    let items = result.to_pixels(frame.width, frame.height);
    let report = self.format.render(frame, &items);
    std::fs::write(path.with_extension(self.format.extension()), report)?;
    debug!("记录第 {} 帧到 {}", frame.index, path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::Tensor,
    model::{DetectItem, FaceLabel},
  };

  fn files_under(dir: &std::path::Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
      for entry in std::fs::read_dir(&dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else {
          found.push(path);
        }
      }
    }
    found.sort();
    found
  }

  #[test]
  fn records_image_and_report_per_frame() {
    let dir = std::env::temp_dir().join(format!("qianmian-record-{}", std::process::id()));
    let url = url::Url::parse(&format!("folder://{}?format=json", dir.display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    let frame = TensorFrame::new(
      16,
      16,
      Tensor::zeros(0, 4).unwrap(),
      Tensor::zeros(0, 2).unwrap(),
    );
    let empty = DetectResult::<FaceLabel>::empty();
    output.render_result(&frame, &empty).unwrap();
    assert!(!dir.exists());

    let result = DetectResult {
      items: vec![DetectItem {
        kind: FaceLabel::Face,
        score: 0.8,
        bbox: [0.1, 0.1, 0.9, 0.9],
        landmarks: Box::new([]),
      }]
      .into_boxed_slice(),
    };
    output.render_result(&frame, &result).unwrap();

    let files = files_under(&dir);
    assert_eq!(files.len(), 2);
    assert!(files.iter().any(|p| p.extension().is_some_and(|e| e == "png")));
    assert!(files.iter().any(|p| p.extension().is_some_and(|e| e == "json")));
    std::fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn always_records_empty_frames() {
    let dir = std::env::temp_dir().join(format!("qianmian-record-always-{}", std::process::id()));
    let url = url::Url::parse(&format!("folder://{}?always", dir.display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    let frame = TensorFrame::new(
      8,
      8,
      Tensor::zeros(0, 4).unwrap(),
      Tensor::zeros(0, 2).unwrap(),
    );
    output
      .render_result(&frame, &DetectResult::<FaceLabel>::empty())
      .unwrap();

    let files = files_under(&dir);
    assert_eq!(files.len(), 2);
    assert!(files.iter().any(|p| p.extension().is_some_and(|e| e == "txt")));
    std::fs::remove_dir_all(&dir).unwrap();
  }
}
