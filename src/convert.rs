// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/convert.rs - 颜色空间转换与缩放
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

use crate::frame::{PixelLayout, RawFrame, RgbNhwcFrame};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConvertError {
  #[error("目标缓冲区容量 {actual} 字节, 需要 {expected} 字节")]
  DestinationCapacity { expected: usize, actual: usize },
}

/// 把任意排布、任意分辨率的原始帧转换为 W×H 的 RGB 帧
///
/// 只读取源帧，结果写入调用方持有的目标缓冲区，不分配内存。
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameConverter<const W: u32, const H: u32>;

impl<const W: u32, const H: u32> FrameConverter<W, H> {
  pub fn new() -> Self {
    Self
  }

  /// 运行前检查一次目标缓冲区
  pub fn validate(&self, dst: &RgbNhwcFrame<W, H>) -> Result<(), ConvertError> {
    if dst.capacity() != RgbNhwcFrame::<W, H>::BYTES {
      return Err(ConvertError::DestinationCapacity {
        expected: RgbNhwcFrame::<W, H>::BYTES,
        actual: dst.capacity(),
      });
    }
    Ok(())
  }

  pub fn convert(&self, src: &RawFrame<'_>, dst: &mut RgbNhwcFrame<W, H>) {
    if src.width() == W && src.height() == H && src.layout() == PixelLayout::Rgb24 {
      copy_rows(src, dst.as_mut());
      return;
    }

    let scale_x = src.width() as f32 / W as f32;
    let scale_y = src.height() as f32 / H as f32;
    let max_x = (src.width() - 1) as f32;
    let max_y = (src.height() - 1) as f32;
    let out = dst.as_mut();

    for dy in 0..H {
      let sy = ((dy as f32 + 0.5) * scale_y - 0.5).clamp(0.0, max_y);
      let y0 = sy.floor() as u32;
      let y1 = (y0 + 1).min(src.height() - 1);
      let fy = sy - y0 as f32;
      let (row0, row1) = (src.row(y0), src.row(y1));

      for dx in 0..W {
        let sx = ((dx as f32 + 0.5) * scale_x - 0.5).clamp(0.0, max_x);
        let x0 = sx.floor() as u32;
        let x1 = (x0 + 1).min(src.width() - 1);
        let fx = sx - x0 as f32;

        let p00 = rgb_at(src.layout(), row0, x0);
        let p01 = rgb_at(src.layout(), row0, x1);
        let p10 = rgb_at(src.layout(), row1, x0);
        let p11 = rgb_at(src.layout(), row1, x1);

        let idx = (dy as usize * W as usize + dx as usize) * 3;
        for c in 0..3 {
          let top = p00[c] + (p01[c] - p00[c]) * fx;
          let bottom = p10[c] + (p11[c] - p10[c]) * fx;
          out[idx + c] = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
        }
      }
    }
  }
}

fn copy_rows(src: &RawFrame<'_>, out: &mut [u8]) {
  let row_bytes = src.width() as usize * 3;
  for (y, chunk) in out.chunks_exact_mut(row_bytes).enumerate() {
    chunk.copy_from_slice(src.row(y as u32));
  }
}

/// 读取一行中第 x 个像素的 RGB 值
fn rgb_at(layout: PixelLayout, row: &[u8], x: u32) -> [f32; 3] {
  let x = x as usize;
  match layout {
    PixelLayout::Rgb24 => [row[x * 3] as f32, row[x * 3 + 1] as f32, row[x * 3 + 2] as f32],
    PixelLayout::Bgr24 => [row[x * 3 + 2] as f32, row[x * 3 + 1] as f32, row[x * 3] as f32],
    PixelLayout::Yuyv => {
      // 每 4 字节（Y0 U Y1 V）描述两个像素
      let pair = (x / 2) * 4;
      let y = row[pair + (x % 2) * 2] as f32;
      let u = row[pair + 1] as f32 - 128.0;
      let v = row[pair + 3] as f32 - 128.0;
      [
        (y + 1.402 * v).clamp(0.0, 255.0),
        (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0),
        (y + 1.772 * u).clamp(0.0, 255.0),
      ]
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn same_size_rgb_is_copied() {
    let data: Vec<u8> = (0..24).collect();
    let src = RawFrame::new(&data, 4, 2, PixelLayout::Rgb24).unwrap();
    let mut dst = RgbNhwcFrame::<4, 2>::default();
    FrameConverter::new().convert(&src, &mut dst);
    assert_eq!(dst.as_mut(), &data[..]);
  }

  #[test]
  fn bgr_channels_are_swapped() {
    let data = vec![10u8, 20, 30, 10, 20, 30];
    let src = RawFrame::new(&data, 2, 1, PixelLayout::Bgr24).unwrap();
    let mut dst = RgbNhwcFrame::<2, 1>::default();
    FrameConverter::new().convert(&src, &mut dst);
    assert_eq!(dst.pixel(0, 0), [30, 20, 10]);
    assert_eq!(dst.pixel(1, 0), [30, 20, 10]);
  }

  #[test]
  fn neutral_yuyv_is_grey() {
    // U = V = 128 时没有色度
    let data = vec![100u8, 128, 200, 128];
    let src = RawFrame::new(&data, 2, 1, PixelLayout::Yuyv).unwrap();
    let mut dst = RgbNhwcFrame::<2, 1>::default();
    FrameConverter::new().convert(&src, &mut dst);
    assert_eq!(dst.pixel(0, 0), [100, 100, 100]);
    assert_eq!(dst.pixel(1, 0), [200, 200, 200]);
  }

  #[test]
  fn uniform_frame_stays_uniform_after_resize() {
    let data = vec![42u8; 8 * 6 * 3];
    let src = RawFrame::new(&data, 8, 6, PixelLayout::Rgb24).unwrap();
    let mut dst = RgbNhwcFrame::<3, 5>::default();
    FrameConverter::new().convert(&src, &mut dst);
    assert!(dst.as_mut().iter().all(|&v| v == 42));
  }

  #[test]
  fn padded_rows_are_skipped() {
    let mut data = vec![0u8; 8 + 6];
    data[..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
    data[6..8].copy_from_slice(&[99, 99]);
    data[8..].copy_from_slice(&[7, 8, 9, 10, 11, 12]);
    let src = RawFrame::with_stride(&data, 2, 2, 8, PixelLayout::Rgb24).unwrap();
    let mut dst = RgbNhwcFrame::<2, 2>::default();
    FrameConverter::new().convert(&src, &mut dst);
    assert_eq!(dst.pixel(0, 1), [7, 8, 9]);
    assert_eq!(dst.pixel(1, 1), [10, 11, 12]);
  }

  #[test]
  fn conversion_leaves_source_untouched() {
    let data: Vec<u8> = (0..(6 * 4 * 2)).map(|v| v as u8).collect();
    let before = data.clone();
    let src = RawFrame::new(&data, 6, 4, PixelLayout::Yuyv).unwrap();
    let mut dst = RgbNhwcFrame::<4, 4>::default();
    FrameConverter::new().convert(&src, &mut dst);
    assert_eq!(data, before);
  }

  #[test]
  fn default_destination_is_valid() {
    let dst = RgbNhwcFrame::<16, 8>::default();
    assert!(FrameConverter::<16, 8>::new().validate(&dst).is_ok());
  }
}
