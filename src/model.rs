// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/model.rs - 模型与检测结果
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

mod label;
pub use self::label::{COCO_LABELS, coco_label};

pub mod yolov8;
#[cfg(feature = "rknpu_model")]
pub use self::yolov8::{Yolov8, Yolov8Builder, Yolov8Error};

/// 单帧检测结果的最大数量
pub const MAX_DETECTIONS: usize = 128;

pub trait Model {
  type Input;
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, input: &Self::Input) -> Result<DetectionBatch, Self::Error>;
}

/// 像素坐标下的轴对齐边界框
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BoundingBox {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn area(&self) -> f32 {
    self.width().max(0.0) * self.height().max(0.0)
  }

  pub fn center(&self) -> (f32, f32) {
    ((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
  }

  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let inter = BoundingBox::new(
      self.left.max(other.left),
      self.top.max(other.top),
      self.right.min(other.right),
      self.bottom.min(other.bottom),
    )
    .area();
    let union = self.area() + other.area() - inter;
    if union > 0.0 { inter / union } else { 0.0 }
  }

  pub fn is_finite(&self) -> bool {
    self.left.is_finite() && self.top.is_finite() && self.right.is_finite() && self.bottom.is_finite()
  }

  /// 端点排序后裁剪到 [0, width] × [0, height]
  pub fn normalized(&self, width: f32, height: f32) -> Self {
    let (left, right) = (self.left.min(self.right), self.left.max(self.right));
    let (top, bottom) = (self.top.min(self.bottom), self.top.max(self.bottom));
    Self {
      left: left.clamp(0.0, width),
      top: top.clamp(0.0, height),
      right: right.clamp(0.0, width),
      bottom: bottom.clamp(0.0, height),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub class_id: u32,
  pub score: f32,
  pub bbox: BoundingBox,
}

impl Detection {
  pub fn label(&self) -> &'static str {
    coco_label(self.class_id)
  }
}

#[derive(Error, Debug, PartialEq)]
#[error("检测结果超过上限 {capacity}")]
pub struct BatchOverflow {
  pub capacity: usize,
}

/// 一帧的检测结果，按模型输出顺序排列，数量有上限
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionBatch {
  items: Vec<Detection>,
  capacity: usize,
}

impl Default for DetectionBatch {
  fn default() -> Self {
    Self::with_capacity(MAX_DETECTIONS)
  }
}

impl DetectionBatch {
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      items: Vec::with_capacity(capacity),
      capacity,
    }
  }

  pub fn push(&mut self, detection: Detection) -> Result<(), BatchOverflow> {
    if self.items.len() >= self.capacity {
      return Err(BatchOverflow {
        capacity: self.capacity,
      });
    }
    self.items.push(detection);
    Ok(())
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }

  pub fn as_slice(&self) -> &[Detection] {
    &self.items
  }

  pub fn retain<F: FnMut(&Detection) -> bool>(&mut self, f: F) {
    self.items.retain(f);
  }

  pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Detection> {
    self.items.iter_mut()
  }
}

impl<'a> IntoIterator for &'a DetectionBatch {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}
