// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/inference.rs - 推理适配层
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

use crate::{
  frame::RgbNhwcFrame,
  model::{DetectionBatch, Model},
};

#[derive(Error, Debug)]
pub enum InferError {
  #[error("推理引擎错误: {source}")]
  Engine {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
  #[error("推理引擎已释放")]
  Released,
}

/// 包装一个模型，统一置信度过滤、坐标整理与计时
pub struct InferenceAdapter<M, const W: u32, const H: u32> {
  model: M,
  confidence_threshold: f32,
  last_elapsed: Duration,
  total_elapsed: Duration,
  calls: u64,
}

impl<M, const W: u32, const H: u32> InferenceAdapter<M, W, H>
where
  M: Model<Input = RgbNhwcFrame<W, H>>,
{
  pub fn new(model: M, confidence_threshold: f32) -> Self {
    Self {
      model,
      confidence_threshold: confidence_threshold.clamp(0.0, 1.0),
      last_elapsed: Duration::ZERO,
      total_elapsed: Duration::ZERO,
      calls: 0,
    }
  }

  /// 对一帧执行推理
  ///
  /// 返回的检测结果满足：分数在 [0, 1] 且不低于阈值，边界框坐标有限、端点有序、
  /// 面积为正并落在帧内。
  pub fn infer(&mut self, frame: &RgbNhwcFrame<W, H>) -> Result<DetectionBatch, InferError> {
    let start = Instant::now();
    let result = self.model.infer(frame);
    self.last_elapsed = start.elapsed();
    self.total_elapsed += self.last_elapsed;
    self.calls += 1;
    debug!("infer: {}us", self.last_elapsed.as_micros());

    let mut batch = result.map_err(|e| InferError::Engine {
      source: Box::new(e),
    })?;

    let threshold = self.confidence_threshold;
    batch.retain(|d| {
      d.score.is_finite() && d.score.clamp(0.0, 1.0) >= threshold && d.bbox.is_finite()
    });
    for det in batch.iter_mut() {
      det.score = det.score.clamp(0.0, 1.0);
      det.bbox = det.bbox.normalized(W as f32, H as f32);
    }
    // 裁剪后完全落在帧外的框没有面积
    batch.retain(|d| d.bbox.width() > 0.0 && d.bbox.height() > 0.0);
    Ok(batch)
  }

  pub fn confidence_threshold(&self) -> f32 {
    self.confidence_threshold
  }

  pub fn last_elapsed(&self) -> Duration {
    self.last_elapsed
  }

  pub fn total_elapsed(&self) -> Duration {
    self.total_elapsed
  }

  pub fn calls(&self) -> u64 {
    self.calls
  }

  pub fn model(&self) -> &M {
    &self.model
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, Detection};

  struct FixedModel(Vec<Detection>);

  #[derive(Debug, Error)]
  #[error("boom")]
  struct Boom;

  impl Model for FixedModel {
    type Input = RgbNhwcFrame<64, 48>;
    type Error = Boom;

    fn infer(&self, _input: &Self::Input) -> Result<DetectionBatch, Self::Error> {
      if self.0.is_empty() {
        return Err(Boom);
      }
      let mut batch = DetectionBatch::default();
      for det in &self.0 {
        batch.push(*det).map_err(|_| Boom)?;
      }
      Ok(batch)
    }
  }

  fn det(score: f32, bbox: BoundingBox) -> Detection {
    Detection {
      class_id: 0,
      score,
      bbox,
    }
  }

  #[test]
  fn detections_below_threshold_are_dropped() {
    let model = FixedModel(vec![
      det(0.9, BoundingBox::new(1.0, 1.0, 5.0, 5.0)),
      det(0.1, BoundingBox::new(1.0, 1.0, 5.0, 5.0)),
      det(f32::NAN, BoundingBox::new(1.0, 1.0, 5.0, 5.0)),
    ]);
    let mut adapter = InferenceAdapter::new(model, 0.25);
    let batch = adapter.infer(&RgbNhwcFrame::default()).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(adapter.calls(), 1);
  }

  #[test]
  fn boxes_are_clipped_and_scores_clamped() {
    let model = FixedModel(vec![det(1.5, BoundingBox::new(60.0, -3.0, 10.0, 100.0))]);
    let mut adapter = InferenceAdapter::new(model, 0.5);
    let batch = adapter.infer(&RgbNhwcFrame::default()).unwrap();
    let d = batch.as_slice()[0];
    assert_eq!(d.score, 1.0);
    assert_eq!(d.bbox, BoundingBox::new(10.0, 0.0, 60.0, 48.0));
  }

  #[test]
  fn non_finite_and_off_frame_boxes_are_dropped() {
    let model = FixedModel(vec![
      det(0.9, BoundingBox::new(f32::NAN, 5.0, f32::NAN, 20.0)),
      det(0.9, BoundingBox::new(f32::INFINITY, 5.0, f32::INFINITY, 20.0)),
      det(0.9, BoundingBox::new(f32::NEG_INFINITY, 5.0, 10.0, 20.0)),
      det(0.9, BoundingBox::new(70.0, 5.0, 90.0, 20.0)),
      det(0.9, BoundingBox::new(5.0, -30.0, 20.0, -10.0)),
      det(0.9, BoundingBox::new(10.0, 10.0, 10.0, 20.0)),
      det(0.9, BoundingBox::new(2.0, 3.0, 12.0, 13.0)),
    ]);
    let mut adapter = InferenceAdapter::new(model, 0.25);
    let batch = adapter.infer(&RgbNhwcFrame::default()).unwrap();

    assert_eq!(batch.len(), 1);
    assert_eq!(batch.as_slice()[0].bbox, BoundingBox::new(2.0, 3.0, 12.0, 13.0));
    for d in batch.iter() {
      assert!(d.bbox.right > d.bbox.left && d.bbox.bottom > d.bbox.top);
      assert!((0.0..=1.0).contains(&d.score));
    }
  }

  #[test]
  fn engine_failure_is_reported_and_timed() {
    let mut adapter = InferenceAdapter::new(FixedModel(Vec::new()), 0.25);
    let err = adapter.infer(&RgbNhwcFrame::default()).unwrap_err();
    assert!(matches!(err, InferError::Engine { .. }));
    assert_eq!(adapter.calls(), 1);
  }
}
