// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/tracker.rs - 多目标跟踪
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

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::model::{BoundingBox, Detection, DetectionBatch};

mod byte_tracker;
mod kalman_filter;
mod matching;
mod rect;
mod strack;
mod track_state;

pub use self::byte_tracker::ByteTracker;
pub use self::rect::Rect;
pub use self::track_state::TrackState;

/// 跟踪器构造参数，运行期间不变
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
  pub frame_rate: f32,
  /// 轨迹丢失后保留的帧数（按 30 FPS 计）
  pub track_buffer: u32,
  /// 不低于该分数的检测参与第一次关联
  pub track_thresh: f32,
  /// 不低于该分数的未匹配检测才会新建轨迹
  pub high_thresh: f32,
  pub match_thresh: f32,
}

impl Default for TrackerConfig {
  fn default() -> Self {
    Self {
      frame_rate: 10.0,
      track_buffer: 100,
      track_thresh: 0.2,
      high_thresh: 0.3,
      match_thresh: 0.8,
    }
  }
}

/// 跟踪器的输入对象，中心点加宽高
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackObject {
  pub cx: f32,
  pub cy: f32,
  pub width: f32,
  pub height: f32,
  pub class_id: u32,
  pub score: f32,
}

impl From<&Detection> for TrackObject {
  /// 宽取水平跨度，高取垂直跨度
  fn from(det: &Detection) -> Self {
    let (cx, cy) = det.bbox.center();
    Self {
      cx,
      cy,
      width: det.bbox.width(),
      height: det.bbox.height(),
      class_id: det.class_id,
      score: det.score,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackOutput {
  pub track_id: u64,
  pub rect: Rect,
  pub score: f32,
  pub class_id: u32,
}

pub trait Tracker {
  /// 每帧调用一次，返回当前存活的轨迹
  fn update(&mut self, objects: &[TrackObject]) -> Vec<TrackOutput>;
}

impl<T: Tracker + ?Sized> Tracker for Box<T> {
  fn update(&mut self, objects: &[TrackObject]) -> Vec<TrackOutput> {
    (**self).update(objects)
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedObject {
  pub track_id: u64,
  pub bbox: BoundingBox,
  pub score: f32,
  pub class_id: u32,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TrackError {
  #[error("帧序号不连续: 期望 {expected}, 实际 {got}")]
  OutOfOrder { expected: u64, got: u64 },
}

/// 在检测结果与跟踪器之间转换，并保证按帧序号依次更新
pub struct TrackingAdapter<T = ByteTracker> {
  tracker: T,
  next_index: u64,
  last_elapsed: Duration,
}

impl TrackingAdapter<ByteTracker> {
  pub fn with_config(config: TrackerConfig) -> Self {
    Self::new(ByteTracker::new(config))
  }
}

impl<T: Tracker> TrackingAdapter<T> {
  pub fn new(tracker: T) -> Self {
    Self {
      tracker,
      next_index: 0,
      last_elapsed: Duration::ZERO,
    }
  }

  /// 用第 `frame_index` 帧的检测结果更新跟踪器
  ///
  /// 序号必须从 0 开始逐帧加 1，否则拒绝更新且不改变跟踪器状态。
  pub fn update(
    &mut self,
    batch: &DetectionBatch,
    frame_index: u64,
  ) -> Result<Vec<TrackedObject>, TrackError> {
    if frame_index != self.next_index {
      return Err(TrackError::OutOfOrder {
        expected: self.next_index,
        got: frame_index,
      });
    }

    let objects: Vec<TrackObject> = batch.iter().map(TrackObject::from).collect();
    let start = Instant::now();
    let outputs = self.tracker.update(&objects);
    self.last_elapsed = start.elapsed();
    self.next_index += 1;
    debug!("track: {}us", self.last_elapsed.as_micros());

    Ok(
      outputs
        .into_iter()
        .map(|t| {
          let [left, top, right, bottom] = t.rect.to_tlbr();
          TrackedObject {
            track_id: t.track_id,
            bbox: BoundingBox::new(left, top, right, bottom),
            score: t.score,
            class_id: t.class_id,
          }
        })
        .collect(),
    )
  }

  /// 已完成的更新次数
  pub fn updates(&self) -> u64 {
    self.next_index
  }

  pub fn last_elapsed(&self) -> Duration {
    self.last_elapsed
  }

  pub fn tracker(&self) -> &T {
    &self.tracker
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn out_of_order_update_is_rejected() {
    let mut adapter = TrackingAdapter::with_config(TrackerConfig::default());
    let batch = DetectionBatch::default();
    adapter.update(&batch, 0).unwrap();
    assert_eq!(
      adapter.update(&batch, 2),
      Err(TrackError::OutOfOrder {
        expected: 1,
        got: 2
      })
    );
    assert_eq!(adapter.updates(), 1);
    adapter.update(&batch, 1).unwrap();
  }
}
