// 该文件是 Qianmian （千面） 项目的一部分。
// src/bin/simple_oneshot.rs - 单帧后处理
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use qianmian::{
  FromUrl,
  model::{FaceDetection, FaceDetectionBuilder, FaceLabel},
  task::{OneShotTask, Task},
};
use tracing::info;

/// Qianmian 单帧处理参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 后处理配置，如 libface:///?width=320&height=240
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 张量帧来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型配置: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = qianmian::input::InputWrapper::from_url(&args.input)?;
  let model: FaceDetection<FaceLabel> = FaceDetectionBuilder::from_url(&args.model)?.build()?;
  let output = qianmian::output::OutputWrapper::from_url(&args.output)?;

  OneShotTask.run_task(input, model, output)?;

  Ok(())
}
