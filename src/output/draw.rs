// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/output/draw.rs - 检测框与轨迹可视化
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::Rgb;
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::{
  frame::RgbNhwcFrame,
  model::{BoundingBox, DetectionBatch, coco_label},
  tracker::TrackedObject,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: u32 = 20;
const LABEL_CHAR_WIDTH: u32 = 9; // 无字体时按字符数估算标签宽度
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const DETECTION_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const TEXT_COLOR: [u8; 3] = [255, 255, 255];
const PALETTE_SIZE: u64 = 32;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件: {0}")]
  Io(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 一条待绘制的标注
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
  pub bbox: BoundingBox,
  pub label: String,
  pub color: [u8; 3],
}

pub struct Draw {
  font: Option<FontVec>,
  font_scale: PxScale,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new()
  }
}

impl Draw {
  /// 不带字体，只绘制边框和标签底板
  pub fn new() -> Self {
    Self {
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }

  pub fn with_font_file(path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data)?;
    info!("加载字体: {}", path.display());
    Ok(Self {
      font: Some(font),
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 在帧上原地绘制标注，越界部分被裁剪
  pub fn draw<const W: u32, const H: u32>(
    &self,
    frame: &mut RgbNhwcFrame<W, H>,
    annotations: &[Annotation],
  ) {
    if annotations.is_empty() {
      return;
    }
    let Some(mut image) = frame.as_image_mut() else {
      return;
    };

    for annotation in annotations {
      let bbox = annotation.bbox.normalized(W as f32, H as f32);
      let x_min = bbox.left.floor() as i32;
      let y_min = bbox.top.floor() as i32;
      let x_max = (bbox.right.ceil() as i32).min(W as i32);
      let y_max = (bbox.bottom.ceil() as i32).min(H as i32);
      let color = Rgb(annotation.color);

      // 边框加粗为 2 像素
      for t in 0..BOX_THICKNESS {
        let (w, h) = (x_max - x_min - 2 * t, y_max - y_min - 2 * t);
        if w <= 0 || h <= 0 {
          break;
        }
        let rect = Rect::at(x_min + t, y_min + t).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(&mut image, rect, color);
      }

      if annotation.label.is_empty() {
        continue;
      }

      let (text_width, text_height) = match &self.font {
        Some(font) => {
          let (w, h) = text_size(self.font_scale, font, &annotation.label);
          (w + 4, h.max(LABEL_TEXT_HEIGHT))
        }
        None => (
          annotation.label.chars().count() as u32 * LABEL_CHAR_WIDTH,
          LABEL_TEXT_HEIGHT,
        ),
      };

      // 标签放在边框上方，放不下时放在框内顶部
      let label_x = x_min.clamp(0, W as i32 - 1);
      let label_y = if y_min >= text_height as i32 {
        y_min - text_height as i32
      } else {
        y_min.clamp(0, H as i32 - 1)
      };
      let label_width = text_width.min((W as i32 - label_x) as u32);
      let label_height = text_height.min((H as i32 - label_y) as u32);
      if label_width == 0 || label_height == 0 {
        continue;
      }

      draw_filled_rect_mut(
        &mut image,
        Rect::at(label_x, label_y).of_size(label_width, label_height),
        color,
      );
      if let Some(font) = &self.font {
        draw_text_mut(
          &mut image,
          Rgb(TEXT_COLOR),
          label_x + 2,
          label_y + LABEL_TEXT_VERTICAL_PADDING,
          self.font_scale,
          font,
          &annotation.label,
        );
      }
    }
  }
}

/// 检测结果的标注，标签为 "<类别> <分数>%"
pub fn detection_annotations(batch: &DetectionBatch) -> Vec<Annotation> {
  batch
    .iter()
    .map(|det| Annotation {
      bbox: det.bbox,
      label: format!("{} {:.1}%", det.label(), det.score * 100.0),
      color: DETECTION_COLOR,
    })
    .collect()
}

/// 轨迹的标注，标签为 "#<编号> <类别>"，颜色按编号取自调色板
pub fn track_annotations(tracks: &[TrackedObject]) -> Vec<Annotation> {
  tracks
    .iter()
    .map(|track| Annotation {
      bbox: track.bbox,
      label: format!("#{} {}", track.track_id, coco_label(track.class_id)),
      color: palette(track.track_id),
    })
    .collect()
}

/// 固定调色板，相邻编号色相相差较大
pub fn palette(index: u64) -> [u8; 3] {
  // 步长 7 与 32 互素，可遍历所有色相
  let slot = index.wrapping_mul(7) % PALETTE_SIZE;
  let hue = slot as f32 / PALETTE_SIZE as f32 * 360.0;
  hsv_to_rgb(hue, 0.8, 0.9)
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  [
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ]
}
