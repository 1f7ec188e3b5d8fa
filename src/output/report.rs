// 该文件是 Qianmian （千面） 项目的一部分。
// src/output/report.rs - 文本与 JSON 检测报告
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
  fmt::Write as _,
  fs::File,
  io::{self, Write},
  path::PathBuf,
  sync::Mutex,
};

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::TensorFrame,
  model::{DetectResult, PixelItem, WithLabel},
  output::Render,
};

#[derive(Error, Debug)]
pub enum ReportOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("路径编码无效: {0}")]
  PathEncoding(#[from] std::string::FromUtf8Error),
  #[error("未知的报告格式: {0}")]
  UnknownFormat(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("报告输出锁已损坏")]
  Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
  #[default]
  Text,
  Json,
}

impl ReportFormat {
  pub fn parse(value: &str) -> Result<Self, ReportOutputError> {
    match value {
      "text" | "txt" => Ok(ReportFormat::Text),
      "json" => Ok(ReportFormat::Json),
      other => Err(ReportOutputError::UnknownFormat(other.to_string())),
    }
  }

  pub fn extension(&self) -> &'static str {
    match self {
      ReportFormat::Text => "txt",
      ReportFormat::Json => "json",
    }
  }

  pub fn render<T: WithLabel>(&self, frame: &TensorFrame, items: &[PixelItem<'_, T>]) -> String {
    match self {
      ReportFormat::Text => text_report(items),
      ReportFormat::Json => json_report(frame, items).to_string(),
    }
  }
}

/// 逐个检测结果输出序号（从 1 开始）、4 位小数的置信度、取整后的框与关键点
pub fn text_report<T: WithLabel>(items: &[PixelItem<'_, T>]) -> String {
  let mut report = String::new();
  for (i, item) in items.iter().enumerate() {
    let [left, top, right, bottom] = item.bbox;
    let landmarks = item
      .landmarks
      .iter()
      .map(|[x, y]| format!("{} {}", x.round(), y.round()))
      .collect::<Vec<_>>()
      .join(" ");

    // 写入 String 不会失败
    let _ = writeln!(report, "-----------{} {}-----------", item.kind.to_label_str(), i + 1);
    let _ = writeln!(report, "score: {:.4}", item.score);
    let _ = writeln!(
      report,
      "box: {} {} {} {}",
      left.round(),
      top.round(),
      right.round(),
      bottom.round()
    );
    let _ = writeln!(report, "landmarks: {}", landmarks);
  }
  report
}

pub fn json_report<T: WithLabel>(frame: &TensorFrame, items: &[PixelItem<'_, T>]) -> Value {
  let detections = items
    .iter()
    .map(|item| {
      json!({
        "label": item.kind.to_label_str(),
        "class_id": item.kind.to_label_id(),
        "score": item.score,
        "box": item.bbox.map(f32::round),
        "landmarks": item
          .landmarks
          .iter()
          .map(|[x, y]| [x.round(), y.round()])
          .collect::<Vec<_>>(),
      })
    })
    .collect::<Vec<_>>();

  json!({
    "frame": frame.index,
    "width": frame.width,
    "height": frame.height,
    "detections": detections,
  })
}

/// `report:///path/to/file.txt?format=json`，路径为空时写到标准输出
pub struct ReportOutput {
  target: Option<PathBuf>,
  format: ReportFormat,
  writer: Mutex<Box<dyn Write + Send>>,
}

impl FromUrlWithScheme for ReportOutput {
  const SCHEME: &'static str = "report";
}

impl FromUrl for ReportOutput {
  type Error = ReportOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReportOutputError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut format = ReportFormat::default();
    for (key, value) in url.query_pairs() {
      if key == "format" {
        format = ReportFormat::parse(&value)?;
      }
    }

    let path = urlencoding::decode(url.path())?;
    let target = match path.as_ref() {
      "" | "/" | "/-" => None,
      path => Some(PathBuf::from(path)),
    };

    let writer: Box<dyn Write + Send> = match &target {
      Some(path) => {
        if let Some(parent) = path.parent()
          && !parent.as_os_str().is_empty()
        {
          std::fs::create_dir_all(parent)?;
        }
        info!("检测报告写入文件: {}", path.display());
        Box::new(File::create(path)?)
      }
      None => Box::new(io::stdout()),
    };

    Ok(ReportOutput {
      target,
      format,
      writer: Mutex::new(writer),
    })
  }
}

impl ReportOutput {
  pub fn format(&self) -> ReportFormat {
    self.format
  }

  pub fn target(&self) -> Option<&PathBuf> {
    self.target.as_ref()
  }
}

impl<T: WithLabel> Render<TensorFrame, DetectResult<T>> for ReportOutput {
  type Error = ReportOutputError;

  fn render_result(&self, frame: &TensorFrame, result: &DetectResult<T>) -> Result<(), Self::Error> {
    let items = result.to_pixels(frame.width, frame.height);
    let report = self.format.render(frame, &items);
    debug!("第 {} 帧报告 {} 个目标", frame.index, items.len());

    let mut writer = self.writer.lock().map_err(|_| ReportOutputError::Poisoned)?;
    match self.format {
      ReportFormat::Text => writer.write_all(report.as_bytes())?,
      ReportFormat::Json => writeln!(writer, "{}", report)?,
    }
    writer.flush()?;
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

  fn sample() -> (TensorFrame, DetectResult<FaceLabel>) {
    let frame = TensorFrame::new(
      640,
      480,
      Tensor::zeros(0, 14).unwrap(),
      Tensor::zeros(0, 2).unwrap(),
    );
    let result = DetectResult {
      items: vec![DetectItem {
        kind: FaceLabel::Face,
        score: 0.87654,
        bbox: [0.1, 0.2, 0.3, 0.4],
        landmarks: vec![[0.5, 0.5], [0.1, 0.9]].into_boxed_slice(),
      }]
      .into_boxed_slice(),
    };
    (frame, result)
  }

  #[test]
  fn text_report_layout() {
    let (frame, result) = sample();
    let items = result.to_pixels(frame.width, frame.height);
    let report = text_report(&items);
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(
      lines,
      vec![
        "-----------face 1-----------",
        "score: 0.8765",
        "box: 64 96 192 192",
        "landmarks: 320 240 64 432",
      ]
    );
  }

  #[test]
  fn empty_result_gives_empty_report() {
    let items: Vec<PixelItem<'_, FaceLabel>> = Vec::new();
    assert!(text_report(&items).is_empty());
  }

  #[test]
  fn json_report_contents() {
    let (frame, result) = sample();
    let items = result.to_pixels(frame.width, frame.height);
    let value = json_report(&frame, &items);
    assert_eq!(value["width"], 640);
    assert_eq!(value["detections"][0]["label"], "face");
    assert_eq!(value["detections"][0]["box"][2], 192.0);
    assert_eq!(value["detections"][0]["landmarks"][1][1], 432.0);
  }

  #[test]
  fn report_writes_to_file() {
    let path = std::env::temp_dir().join(format!("qianmian-report-{}.json", std::process::id()));
    let url = Url::parse(&format!("report://{}?format=json", path.display())).unwrap();
    let output = ReportOutput::from_url(&url).unwrap();
    assert_eq!(output.format(), ReportFormat::Json);

    let (frame, result) = sample();
    output.render_result(&frame, &result).unwrap();
    output.render_result(&frame, &result).unwrap();

    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(written.lines().count(), 2);
    let first: Value = serde_json::from_str(written.lines().next().unwrap()).unwrap();
    assert_eq!(first["detections"][0]["score"].as_f64().map(|s| s > 0.87), Some(true));
    std::fs::remove_file(&path).unwrap();
  }

  #[test]
  fn bad_format_is_rejected() {
    let url = Url::parse("report:///?format=xml").unwrap();
    assert!(matches!(
      ReportOutput::from_url(&url),
      Err(ReportOutputError::UnknownFormat(_))
    ));
  }
}
