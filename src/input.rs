// 该文件是 Qianmian （千面） 项目的一部分。
// src/input.rs - 张量帧输入
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

use crate::{FromUrl, frame::TensorFrame};

#[cfg(feature = "read_tensor_file")]
mod read_tensor_file;
#[cfg(feature = "read_tensor_file")]
pub use self::read_tensor_file::{
  TensorFileInput, TensorFileInputError, TensorFolderInput, parse_frame, read_frame,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_tensor_file")]
  #[error("Tensor file input error: {0}")]
  TensorFileInputError(#[from] TensorFileInputError),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

pub enum InputWrapper {
  #[cfg(feature = "read_tensor_file")]
  TensorFile(TensorFileInput),
  #[cfg(feature = "read_tensor_file")]
  TensorFolder(TensorFolderInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_tensor_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == TensorFileInput::SCHEME {
        let input = TensorFileInput::from_url(url)?;
        return Ok(InputWrapper::TensorFile(input));
      }
      if url.scheme() == TensorFolderInput::SCHEME {
        let input = TensorFolderInput::from_url(url)?;
        return Ok(InputWrapper::TensorFolder(input));
      }
    }
    let _ = url;
    Err(InputError::SchemeMismatch)
  }
}

impl Iterator for InputWrapper {
  type Item = TensorFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "read_tensor_file")]
      InputWrapper::TensorFile(input) => input.next(),
      #[cfg(feature = "read_tensor_file")]
      InputWrapper::TensorFolder(input) => input.next(),
      #[allow(unreachable_patterns)]
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = url::Url::parse("v4l2:///dev/video0").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch)
    ));
  }
}
