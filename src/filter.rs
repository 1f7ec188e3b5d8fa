// 该文件是 Qianmian （千面） 项目的一部分。
// src/filter.rs - 置信度过滤与非极大值抑制
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

use tracing::debug;

use crate::{
  decode::{self, DecodeError, DecodedBox},
  frame::Tensor,
  prior::{truncate_above, truncate_below},
};

/// 最终得分的计算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreFusion {
  /// 仅使用前景分类得分
  #[default]
  ClassOnly,
  /// `sqrt(cls * clamp01(iou))`，需要 IoU 质量分支
  IouAware,
}

/// NMS 的分组范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmsScope {
  /// 不区分类别
  #[default]
  Global,
  /// 仅在同一类别内相互抑制
  PerClass,
}

impl NmsScope {
  fn same_group(&self, a: &Candidate, b: &Candidate) -> bool {
    match self {
      NmsScope::Global => true,
      NmsScope::PerClass => a.class_id == b.class_id,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
  pub conf_threshold: f32,
  pub nms_threshold: f32,
  pub top_k: usize,
  pub fusion: ScoreFusion,
  pub scope: NmsScope,
}

/// 通过置信度阈值的候选检测，坐标仍为归一化值
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  /// 在先验框序列中的行号
  pub row: usize,
  /// 类别编号，从 0 开始，不含背景
  pub class_id: u32,
  pub score: f32,
  pub bbox: DecodedBox,
  pub landmarks: Box<[f32]>,
}

fn clamp_unit(v: f32) -> f32 {
  truncate_above(truncate_below(v))
}

fn check_scores(decoded: &Tensor, conf: &Tensor, iou: Option<&Tensor>) -> Result<(), DecodeError> {
  if !decoded.is_empty() && decoded.cols() < 4 {
    return Err(DecodeError::TooFewColumns(decoded.cols()));
  }
  decode::check_rows("conf", conf, decoded.rows())?;
  if !conf.is_empty() && conf.cols() < 2 {
    return Err(DecodeError::ColumnMismatch {
      name: "conf",
      expected: ">= 2 (背景, 前景...)",
      actual: conf.cols(),
    });
  }
  if let Some(iou) = iou {
    decode::check_rows("iou", iou, decoded.rows())?;
    if !iou.is_empty() && iou.cols() != 1 {
      return Err(DecodeError::ColumnMismatch {
        name: "iou",
        expected: "== 1",
        actual: iou.cols(),
      });
    }
  }
  Ok(())
}

/// 按置信度阈值挑选候选
///
/// `conf` 第 0 列为背景，其余每列对应一个类别；每个超过阈值的 (行, 类别) 产生一个候选。
pub fn candidates(
  decoded: &Tensor,
  conf: &Tensor,
  iou: Option<&Tensor>,
  params: &FilterParams,
) -> Result<Vec<Candidate>, DecodeError> {
  check_scores(decoded, conf, iou)?;
  let iou = match (params.fusion, iou) {
    (ScoreFusion::IouAware, None) => {
      return Err(DecodeError::ColumnMismatch {
        name: "iou",
        expected: "IoU 融合需要 iou 张量",
        actual: 0,
      });
    }
    (ScoreFusion::IouAware, Some(iou)) => Some(iou),
    (ScoreFusion::ClassOnly, _) => None,
  };

  let mut items = Vec::new();
  for (idx, (row, scores)) in decode::rows(decoded).zip(conf.iter_rows()).enumerate() {
    let quality = iou
      .and_then(|t| t.row(idx))
      .map(|r| clamp_unit(r[0]));

    for (class_id, &fg) in scores.iter().enumerate().skip(1) {
      let score = match quality {
        Some(q) => (fg * q).sqrt(),
        None => fg,
      };
      if score > params.conf_threshold {
        items.push(Candidate {
          row: idx,
          class_id: (class_id - 1) as u32,
          score,
          bbox: row.bbox,
          landmarks: row.landmarks.into(),
        });
      }
    }
  }

  debug!("置信度过滤后剩余 {} 个候选", items.len());
  Ok(items)
}

/// 贪心非极大值抑制
///
/// 按得分降序排列，`top_k > 0` 时只保留前 `top_k` 个参与抑制。
pub fn nms(
  mut candidates: Vec<Candidate>,
  nms_threshold: f32,
  scope: NmsScope,
  top_k: usize,
) -> Vec<Candidate> {
  // 按置信度降序排序
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
  if top_k > 0 {
    candidates.truncate(top_k);
  }

  let mut result = Vec::with_capacity(candidates.len());
  let mut remaining = candidates.into_iter();
  while let Some(best) = remaining.next() {
    let rest: Vec<Candidate> = remaining
      .filter(|c| !(scope.same_group(&best, c) && best.bbox.iou(&c.bbox) > nms_threshold))
      .collect();
    result.push(best);
    remaining = rest.into_iter();
  }

  result
}

pub fn filter(
  decoded: &Tensor,
  conf: &Tensor,
  iou: Option<&Tensor>,
  params: &FilterParams,
) -> Result<Vec<Candidate>, DecodeError> {
  let items = candidates(decoded, conf, iou, params)?;
  let kept = nms(items, params.nms_threshold, params.scope, params.top_k);
  debug!("NMS 后保留 {} 个检测", kept.len());
  Ok(kept)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params(conf_threshold: f32, nms_threshold: f32) -> FilterParams {
    FilterParams {
      conf_threshold,
      nms_threshold,
      top_k: 0,
      fusion: ScoreFusion::ClassOnly,
      scope: NmsScope::Global,
    }
  }

  fn boxes(rows: &[[f32; 4]]) -> Tensor {
    Tensor::from_rows(rows).unwrap()
  }

  fn scores(fg: &[f32]) -> Tensor {
    let rows: Vec<[f32; 2]> = fg.iter().map(|&s| [1.0 - s, s]).collect();
    Tensor::from_rows(&rows).unwrap()
  }

  fn candidate(score: f32, bbox: [f32; 4], class_id: u32) -> Candidate {
    Candidate {
      row: 0,
      class_id,
      score,
      bbox: DecodedBox::new(bbox[0], bbox[1], bbox[2], bbox[3]),
      landmarks: Box::new([]),
    }
  }

  #[test]
  fn overlapping_lower_score_is_suppressed() {
    let decoded = boxes(&[[0.0, 0.0, 10.0, 10.0], [1.0, 1.0, 11.0, 11.0]]);
    let kept = filter(&decoded, &scores(&[0.9, 0.8]), None, &params(0.5, 0.5)).unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].row, 0);
    assert_eq!(kept[0].score, 0.9);
  }

  #[test]
  fn threshold_one_keeps_every_candidate() {
    let decoded = boxes(&[
      [0.0, 0.0, 10.0, 10.0],
      [0.0, 0.0, 10.0, 10.0],
      [1.0, 1.0, 11.0, 11.0],
      [50.0, 50.0, 60.0, 60.0],
    ]);
    let kept = filter(
      &decoded,
      &scores(&[0.7, 0.95, 0.4, 0.8]),
      None,
      &params(0.5, 1.0),
    )
    .unwrap();
    let rows: Vec<usize> = kept.iter().map(|c| c.row).collect();
    assert_eq!(rows, vec![1, 3, 0]);
  }

  #[test]
  fn tiny_threshold_keeps_only_top_of_identical_boxes() {
    let decoded = boxes(&[[0.0, 0.0, 10.0, 10.0], [0.0, 0.0, 10.0, 10.0]]);
    let kept = filter(&decoded, &scores(&[0.6, 0.9]), None, &params(0.5, 0.01)).unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].row, 1);
  }

  #[test]
  fn zero_threshold_keeps_single_top_of_overlapping_cluster() {
    let decoded = boxes(&[
      [0.0, 0.0, 10.0, 10.0],
      [5.0, 5.0, 15.0, 15.0],
      [9.0, 9.0, 19.0, 19.0],
    ]);
    let kept = filter(&decoded, &scores(&[0.7, 0.9, 0.8]), None, &params(0.5, 0.0)).unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].row, 1);
  }

  #[test]
  fn nothing_above_threshold_is_empty() {
    let decoded = boxes(&[[0.0, 0.0, 1.0, 1.0]]);
    let kept = filter(&decoded, &scores(&[0.3]), None, &params(0.5, 0.3)).unwrap();
    assert!(kept.is_empty());
    // 等于阈值不算超过
    let kept = filter(&decoded, &scores(&[0.5]), None, &params(0.5, 0.3)).unwrap();
    assert!(kept.is_empty());
  }

  #[test]
  fn nms_is_idempotent() {
    let items = vec![
      candidate(0.9, [0.0, 0.0, 10.0, 10.0], 0),
      candidate(0.85, [2.0, 2.0, 12.0, 12.0], 0),
      candidate(0.8, [30.0, 30.0, 40.0, 40.0], 0),
      candidate(0.75, [31.0, 30.0, 41.0, 40.0], 0),
      candidate(0.7, [8.0, 8.0, 18.0, 18.0], 0),
    ];
    let once = nms(items, 0.4, NmsScope::Global, 0);
    let twice = nms(once.clone(), 0.4, NmsScope::Global, 0);
    assert_eq!(once, twice);
  }

  #[test]
  fn per_class_scope_keeps_other_classes() {
    let items = vec![
      candidate(0.9, [0.0, 0.0, 10.0, 10.0], 0),
      candidate(0.8, [0.0, 0.0, 10.0, 10.0], 1),
      candidate(0.7, [0.0, 0.0, 10.0, 10.0], 0),
    ];
    let global = nms(items.clone(), 0.5, NmsScope::Global, 0);
    assert_eq!(global.len(), 1);

    let per_class = nms(items, 0.5, NmsScope::PerClass, 0);
    let classes: Vec<u32> = per_class.iter().map(|c| c.class_id).collect();
    assert_eq!(classes, vec![0, 1]);
  }

  #[test]
  fn multi_class_scores_produce_one_candidate_per_class() {
    let decoded = boxes(&[[0.0, 0.0, 1.0, 1.0]]);
    let conf = Tensor::from_rows(&[[0.1f32, 0.7, 0.2, 0.9]]).unwrap();
    let found = candidates(&decoded, &conf, None, &params(0.5, 0.3)).unwrap();
    let classes: Vec<u32> = found.iter().map(|c| c.class_id).collect();
    assert_eq!(classes, vec![0, 2]);
  }

  #[test]
  fn top_k_limits_candidates_before_suppression() {
    let items = vec![
      candidate(0.6, [0.0, 0.0, 1.0, 1.0], 0),
      candidate(0.9, [2.0, 2.0, 3.0, 3.0], 0),
      candidate(0.8, [4.0, 4.0, 5.0, 5.0], 0),
    ];
    let kept = nms(items, 0.3, NmsScope::Global, 2);
    let scores: Vec<f32> = kept.iter().map(|c| c.score).collect();
    assert_eq!(scores, vec![0.9, 0.8]);
  }

  #[test]
  fn iou_aware_fusion_uses_clamped_quality() {
    let decoded = boxes(&[[0.0, 0.0, 1.0, 1.0], [2.0, 2.0, 3.0, 3.0], [4.0, 4.0, 5.0, 5.0]]);
    let conf = scores(&[0.81, 0.81, 0.81]);
    let iou = Tensor::from_rows(&[[1.0f32], [1.7], [-0.3]]).unwrap();
    let p = FilterParams {
      fusion: ScoreFusion::IouAware,
      ..params(0.5, 0.3)
    };
    let found = candidates(&decoded, &conf, Some(&iou), &p).unwrap();
    assert_eq!(found.len(), 2);
    approx::assert_relative_eq!(found[0].score, 0.9, epsilon = 1e-6);
    approx::assert_relative_eq!(found[1].score, 0.9, epsilon = 1e-6);

    assert!(candidates(&decoded, &conf, None, &p).is_err());
  }

  #[test]
  fn score_shape_mismatch_fails_fast() {
    let decoded = boxes(&[[0.0, 0.0, 1.0, 1.0]]);
    assert!(matches!(
      candidates(&decoded, &scores(&[0.9, 0.9]), None, &params(0.5, 0.3)),
      Err(DecodeError::RowCountMismatch { name: "conf", .. })
    ));
    let conf = Tensor::from_rows(&[[0.9f32]]).unwrap();
    assert!(matches!(
      candidates(&decoded, &conf, None, &params(0.5, 0.3)),
      Err(DecodeError::ColumnMismatch { name: "conf", .. })
    ));
  }
}
