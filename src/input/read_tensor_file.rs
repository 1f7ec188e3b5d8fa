// 该文件是 Qianmian （千面） 项目的一部分。
// src/input/read_tensor_file.rs - 张量文件输入
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
  collections::VecDeque,
  path::{Path, PathBuf},
};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Tensor, TensorError, TensorFrame},
};

#[derive(Error, Debug)]
pub enum TensorFileInputError {
  #[error("URI scheme mismatch: expected '{0}', found '{1}'")]
  SchemaMismatch(&'static str, String),
  #[error("Invalid path encoding: {0}")]
  PathEncoding(#[from] std::string::FromUtf8Error),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON error: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("Missing or invalid field '{0}'")]
  InvalidField(&'static str),
  #[error("Tensor '{0}' error: {1}")]
  TensorError(&'static str, TensorError),
}

fn url_path(url: &Url) -> Result<PathBuf, TensorFileInputError> {
  let path = urlencoding::decode(url.path())?;
  Ok(PathBuf::from(path.into_owned()))
}

/// 目标画面尺寸，必须为正
fn dimension(value: &Value, name: &'static str) -> Result<u32, TensorFileInputError> {
  value
    .get(name)
    .and_then(Value::as_u64)
    .and_then(|v| u32::try_from(v).ok())
    .filter(|v| *v > 0)
    .ok_or(TensorFileInputError::InvalidField(name))
}

fn tensor(value: &Value, name: &'static str) -> Result<Tensor, TensorFileInputError> {
  let rows = value
    .get(name)
    .and_then(Value::as_array)
    .ok_or(TensorFileInputError::InvalidField(name))?;

  let rows = rows
    .iter()
    .map(|row| {
      row
        .as_array()
        .ok_or(TensorFileInputError::InvalidField(name))?
        .iter()
        .map(|v| {
          v.as_f64()
            .map(|v| v as f32)
            .ok_or(TensorFileInputError::InvalidField(name))
        })
        .collect::<Result<Vec<f32>, _>>()
    })
    .collect::<Result<Vec<_>, _>>()?;

  Tensor::from_rows(&rows).map_err(|e| TensorFileInputError::TensorError(name, e))
}

/// 解析一帧张量 JSON
///
/// `image` 为相对路径时相对于 JSON 文件所在目录。
pub fn parse_frame(
  value: &Value,
  index: usize,
  base: Option<&Path>,
) -> Result<TensorFrame, TensorFileInputError> {
  let width = dimension(value, "width")?;
  let height = dimension(value, "height")?;
  let loc = tensor(value, "loc")?;
  let conf = tensor(value, "conf")?;

  let mut frame = TensorFrame::new(width, height, loc, conf).with_index(index);
  if value.get("iou").is_some_and(|v| !v.is_null()) {
    frame = frame.with_iou(tensor(value, "iou")?);
  }
  if let Some(image) = value.get("image").and_then(Value::as_str) {
    let path = PathBuf::from(image);
    let path = match base {
      Some(base) if path.is_relative() => base.join(path),
      _ => path,
    };
    frame = frame.with_background(path);
  }

  Ok(frame)
}

pub fn read_frame(path: &Path, index: usize) -> Result<TensorFrame, TensorFileInputError> {
  let data = std::fs::read(path)?;
  let value: Value = serde_json::from_slice(&data)?;
  parse_frame(&value, index, path.parent())
}

/// 单个 JSON 文件中的一帧
pub struct TensorFileInput {
  frame: Option<TensorFrame>,
}

impl FromUrlWithScheme for TensorFileInput {
  const SCHEME: &'static str = "tensor";
}

impl FromUrl for TensorFileInput {
  type Error = TensorFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(TensorFileInputError::SchemaMismatch(
        Self::SCHEME,
        url.scheme().to_string(),
      ));
    }

    let path = url_path(url)?;
    info!("读取张量文件: {}", path.display());
    let frame = read_frame(&path, 0)?;

    Ok(TensorFileInput { frame: Some(frame) })
  }
}

impl Iterator for TensorFileInput {
  type Item = TensorFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}

/// 目录中按文件名排序的多帧 JSON
///
/// 单帧读取失败时记录错误并跳过，不中断后续帧。
pub struct TensorFolderInput {
  files: VecDeque<PathBuf>,
  index: usize,
}

impl FromUrlWithScheme for TensorFolderInput {
  const SCHEME: &'static str = "tensors";
}

impl FromUrl for TensorFolderInput {
  type Error = TensorFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TensorFileInputError::SchemaMismatch(
        Self::SCHEME,
        url.scheme().to_string(),
      ));
    }

    let directory = url_path(url)?;
    let mut files = std::fs::read_dir(&directory)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
      .collect::<Vec<_>>();
    files.sort();
    info!("目录 {} 中共有 {} 帧", directory.display(), files.len());

    Ok(TensorFolderInput {
      files: files.into(),
      index: 0,
    })
  }
}

impl Iterator for TensorFolderInput {
  type Item = TensorFrame;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.files.pop_front() {
      let index = self.index;
      self.index += 1;
      match read_frame(&path, index) {
        Ok(frame) => {
          debug!("读取第 {} 帧: {}", index, path.display());
          return Some(frame);
        }
        Err(e) => error!("读取帧 {} 失败, 跳过: {}", path.display(), e),
      }
    }
    None
  }
}
