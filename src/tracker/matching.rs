// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/tracker/matching.rs - 轨迹与检测的关联
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

use ndarray::Array2;
use tracing::warn;

use super::rect::Rect;

/// 以 1 - IoU 作为代价
pub fn iou_distance(track_boxes: &[Rect], det_boxes: &[Rect]) -> Array2<f32> {
  let mut dists = Array2::zeros((track_boxes.len(), det_boxes.len()));
  for (i, t) in track_boxes.iter().enumerate() {
    for (j, d) in det_boxes.iter().enumerate() {
      dists[[i, j]] = 1.0 - t.iou(d);
    }
  }
  dists
}

/// 把检测分数融合进 IoU 相似度
pub fn fuse_score(cost_matrix: &mut Array2<f32>, scores: &[f32]) {
  for ((_, j), cost) in cost_matrix.indexed_iter_mut() {
    *cost = 1.0 - (1.0 - *cost) * scores[j];
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentResult {
  pub matches: Vec<(usize, usize)>,
  pub unmatched_tracks: Vec<usize>,
  pub unmatched_detections: Vec<usize>,
}

/// 代价矩阵上的最优指派，代价高于 `thresh` 的配对视为未匹配
pub fn linear_assignment(cost_matrix: &Array2<f32>, thresh: f32) -> AssignmentResult {
  let (num_rows, num_cols) = cost_matrix.dim();

  if num_rows == 0 || num_cols == 0 {
    return AssignmentResult {
      matches: Vec::new(),
      unmatched_tracks: (0..num_rows).collect(),
      unmatched_detections: (0..num_cols).collect(),
    };
  }

  // lapjv 只接受方阵
  let size = num_rows.max(num_cols);
  let mut padded = Array2::<f64>::from_elem((size, size), 1e6);
  for ((i, j), &cost) in cost_matrix.indexed_iter() {
    padded[[i, j]] = cost as f64;
  }

  let mut result = AssignmentResult::default();
  let mut det_unmatched = vec![true; num_cols];

  match lapjv::lapjv(&padded) {
    Ok((row_to_col, _)) => {
      for (row, &col) in row_to_col.iter().enumerate().take(num_rows) {
        if col < num_cols && cost_matrix[[row, col]] <= thresh {
          result.matches.push((row, col));
          det_unmatched[col] = false;
        } else {
          result.unmatched_tracks.push(row);
        }
      }
    }
    Err(e) => {
      warn!("线性指派失败: {:?}", e);
      result.unmatched_tracks = (0..num_rows).collect();
    }
  }

  result.unmatched_detections = det_unmatched
    .iter()
    .enumerate()
    .filter_map(|(i, &u)| u.then_some(i))
    .collect();
  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  #[test]
  fn assignment_picks_lowest_cost() {
    let cost = array![[0.1f32, 0.9], [0.8, 0.2]];
    let result = linear_assignment(&cost, 0.5);
    assert_eq!(result.matches, vec![(0, 0), (1, 1)]);
    assert!(result.unmatched_tracks.is_empty());
    assert!(result.unmatched_detections.is_empty());
  }

  #[test]
  fn costly_pairs_stay_unmatched() {
    let cost = array![[0.9f32, 0.95, 0.1]];
    let result = linear_assignment(&cost, 0.5);
    assert_eq!(result.matches, vec![(0, 2)]);
    assert_eq!(result.unmatched_detections, vec![0, 1]);
  }

  #[test]
  fn empty_side_is_all_unmatched() {
    let cost = Array2::<f32>::zeros((0, 3));
    let result = linear_assignment(&cost, 0.8);
    assert_eq!(result.unmatched_detections, vec![0, 1, 2]);
  }

  #[test]
  fn fused_cost_grows_with_low_score() {
    let mut cost = array![[0.2f32]];
    fuse_score(&mut cost, &[0.5]);
    assert!((cost[[0, 0]] - 0.6).abs() < 1e-6);
  }
}
