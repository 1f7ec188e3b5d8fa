// 该文件是 Qianmian （千面） 项目的一部分。
// tests/pipeline.rs - 端到端流程测试
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

#![cfg(all(
  feature = "read_tensor_file",
  feature = "model_libface",
  feature = "report_output"
))]

use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use serde_json::{Value, json};
use url::Url;

use qianmian::{
  FromUrl,
  decode::{self, DecodedBox, Variance},
  frame::{Tensor, TensorFrame},
  input::InputWrapper,
  model::{DetectItem, FaceDetection, FaceDetectionBuilder, FaceLabel, Model},
  output::OutputWrapper,
  task::{ContinuousTask, OneShotTask, Task},
};

// 16x16 输入共 14 个先验框：
// 0..12 为步长 8 的 2x2 网格，每格 3 个尺寸；12、13 为步长 16，宽高截断到 1 后完全相同
const NUM_PRIORS: usize = 14;

fn model() -> FaceDetection<FaceLabel> {
  FaceDetectionBuilder::default()
    .input_size(16, 16)
    .conf_threshold(0.5)
    .nms_threshold(0.4)
    .build()
    .unwrap()
}

fn scratch(name: &str) -> PathBuf {
  let dir = std::env::temp_dir().join(format!("qianmian-{}-{}", name, std::process::id()));
  std::fs::create_dir_all(&dir).unwrap();
  dir
}

fn conf_rows(scores: &[(usize, f32)]) -> Vec<[f32; 2]> {
  let mut rows = vec![[1.0f32, 0.0]; NUM_PRIORS];
  for &(row, score) in scores {
    rows[row] = [1.0 - score, score];
  }
  rows
}

fn frame_json(scores: &[(usize, f32)], rows: usize) -> Value {
  json!({
    "width": 160,
    "height": 160,
    "loc": vec![vec![0.0f32; 14]; rows],
    "conf": conf_rows(scores)[..rows.min(NUM_PRIORS)].to_vec(),
  })
}

fn write_json(path: &Path, value: &Value) {
  std::fs::write(path, value.to_string()).unwrap();
}

fn scheme_url(scheme: &str, path: &Path) -> Url {
  Url::parse(&format!("{}://{}", scheme, path.display())).unwrap()
}

#[test]
fn zero_offsets_produce_prior_boxes_after_nms() {
  let model = model();
  assert_eq!(model.prior_box().len(), NUM_PRIORS);

  let conf = Tensor::from_rows(&conf_rows(&[(12, 0.9), (13, 0.8), (0, 0.7)])).unwrap();
  let frame = TensorFrame::new(160, 160, Tensor::zeros(NUM_PRIORS, 14).unwrap(), conf);
  let result = model.detect(&frame).unwrap();

  // 13 与 12 重合被抑制；0 与 12 的 IoU 约为 0.29，保留
  assert_eq!(result.len(), 2);
  let scores: Vec<f32> = result.iter().map(|item| item.score).collect();
  assert_eq!(scores, vec![0.9, 0.7]);

  let pixels = result.to_pixels(frame.width, frame.height);
  assert_eq!(pixels[0].bbox, [0.0, 0.0, 160.0, 160.0]);
  assert_eq!(pixels[1].bbox, [-10.0, -10.0, 90.0, 90.0]);
  assert!(pixels[0].landmarks.iter().all(|p| *p == [80.0, 80.0]));
  assert!(pixels[1].landmarks.iter().all(|p| *p == [40.0, 40.0]));
}

#[test]
fn encoded_targets_decode_back_through_the_model() {
  let model = model();
  let prior = model.prior_box().priors()[4];
  let target = DecodedBox::new(0.3, 0.2, 0.6, 0.7);
  let landmarks = [0.4f32, 0.35, 0.5, 0.35, 0.45, 0.45, 0.4, 0.55, 0.5, 0.55];

  let mut loc = Tensor::zeros(NUM_PRIORS, 14).unwrap();
  loc
    .row_mut(4)
    .unwrap()
    .copy_from_slice(&decode::encode(&target, &landmarks, &prior, Variance::default()));
  let conf = Tensor::from_rows(&conf_rows(&[(4, 0.95)])).unwrap();

  let result = model
    .detect(&TensorFrame::new(100, 100, loc, conf))
    .unwrap();
  assert_eq!(result.len(), 1);
  let item = &result.items[0];
  for (got, want) in item.bbox.iter().zip(target.to_array()) {
    assert_relative_eq!(*got, want, epsilon = 1e-5);
  }
  for (got, want) in item.landmarks.iter().flatten().zip(landmarks) {
    assert_relative_eq!(*got, want, epsilon = 1e-5);
  }
}

#[test]
fn normalized_box_rescales_to_destination_frame() {
  let item = DetectItem {
    kind: FaceLabel::Face,
    score: 0.99,
    bbox: [0.1, 0.2, 0.3, 0.4],
    landmarks: Box::new([]),
  };
  let pixel = item.to_pixels(640, 480);
  let rounded = pixel.bbox.map(f32::round);
  assert_eq!(rounded, [64.0, 96.0, 192.0, 192.0]);
}

#[test]
fn one_shot_writes_text_report() {
  let dir = scratch("oneshot");
  let input = dir.join("frame.json");
  write_json(&input, &frame_json(&[(12, 0.9), (13, 0.8), (0, 0.7)], NUM_PRIORS));
  let report = dir.join("report.txt");

  let input = InputWrapper::from_url(&scheme_url("tensor", &input)).unwrap();
  let output = OutputWrapper::from_url(&scheme_url("report", &report)).unwrap();
  OneShotTask.run_task(input, model(), output).unwrap();

  let text = std::fs::read_to_string(&report).unwrap();
  let expected = "\
-----------face 1-----------
score: 0.9000
box: 0 0 160 160
landmarks: 80 80 80 80 80 80 80 80 80 80
-----------face 2-----------
score: 0.7000
box: -10 -10 90 90
landmarks: 40 40 40 40 40 40 40 40 40 40
";
  assert_eq!(text, expected);
  std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn continuous_run_skips_malformed_frames() {
  let dir = scratch("continuous");
  let frames = dir.join("frames");
  std::fs::create_dir_all(&frames).unwrap();
  write_json(&frames.join("000.json"), &frame_json(&[(12, 0.9)], NUM_PRIORS));
  // 行数与先验框数量不一致
  write_json(&frames.join("001.json"), &frame_json(&[(12, 0.9)], 13));
  write_json(&frames.join("002.json"), &frame_json(&[], NUM_PRIORS));
  write_json(&frames.join("003.json"), &frame_json(&[(0, 0.7)], NUM_PRIORS));
  let report = dir.join("report.jsonl");

  let input = InputWrapper::from_url(&scheme_url("tensors", &frames)).unwrap();
  let output = OutputWrapper::from_url(
    &Url::parse(&format!("report://{}?format=json", report.display())).unwrap(),
  )
  .unwrap();
  ContinuousTask::default()
    .run_task(input, model(), output)
    .unwrap();

  let lines: Vec<Value> = std::fs::read_to_string(&report)
    .unwrap()
    .lines()
    .map(|line| serde_json::from_str(line).unwrap())
    .collect();
  let frames: Vec<u64> = lines.iter().map(|v| v["frame"].as_u64().unwrap()).collect();
  assert_eq!(frames, vec![0, 2, 3]);

  let counts: Vec<usize> = lines
    .iter()
    .map(|v| v["detections"].as_array().unwrap().len())
    .collect();
  assert_eq!(counts, vec![1, 0, 1]);
  assert_eq!(lines[2]["detections"][0]["box"], json!([-10.0, -10.0, 90.0, 90.0]));
  std::fs::remove_dir_all(&dir).unwrap();
}
