// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/tracker/rect.rs - 跟踪器使用的矩形
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

/// 左上角加宽高（TLWH）表示的矩形
///
/// 另外两种常用格式：
/// - TLBR: 左上角与右下角
/// - XYAH: 中心点、宽高比（w/h）与高
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl Rect {
  #[inline]
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  #[inline]
  pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self::new(x1, y1, x2 - x1, y2 - y1)
  }

  #[inline]
  pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
    Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
  }

  #[inline]
  pub fn from_xyah(cx: f32, cy: f32, aspect_ratio: f32, height: f32) -> Self {
    Self::from_center(cx, cy, aspect_ratio * height, height)
  }

  #[inline]
  pub fn to_tlbr(&self) -> [f32; 4] {
    [self.x, self.y, self.x + self.width, self.y + self.height]
  }

  #[inline]
  pub fn to_xyah(&self) -> [f32; 4] {
    let (cx, cy) = self.center();
    let aspect_ratio = if self.height > 0.0 {
      self.width / self.height
    } else {
      0.0
    };
    [cx, cy, aspect_ratio, self.height]
  }

  #[inline]
  pub fn center(&self) -> (f32, f32) {
    (self.x + self.width / 2.0, self.y + self.height / 2.0)
  }

  #[inline]
  pub fn area(&self) -> f32 {
    self.width * self.height
  }

  pub fn iou(&self, other: &Rect) -> f32 {
    let x1 = self.x.max(other.x);
    let y1 = self.y.max(other.y);
    let x2 = (self.x + self.width).min(other.x + other.width);
    let y2 = (self.y + self.height).min(other.y + other.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = self.area() + other.area() - inter_area;

    if union_area > 0.0 {
      inter_area / union_area
    } else {
      0.0
    }
  }
}

/// 两组矩形两两之间的 IoU，形状为 (M, N)
pub fn iou_batch(boxes_a: &[Rect], boxes_b: &[Rect]) -> Array2<f32> {
  let mut ious = Array2::zeros((boxes_a.len(), boxes_b.len()));
  for (i, a) in boxes_a.iter().enumerate() {
    for (j, b) in boxes_b.iter().enumerate() {
      ious[[i, j]] = a.iou(b);
    }
  }
  ious
}
