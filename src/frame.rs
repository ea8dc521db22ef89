// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/frame.rs - 原始帧与 NHWC 帧定义
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

use image::{ImageBuffer, Rgb};
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("帧尺寸无效: {width}x{height}")]
  InvalidShape { width: u32, height: u32 },
  #[error("行跨度 {stride} 小于一行像素所需的 {row_bytes} 字节")]
  StrideTooSmall { stride: usize, row_bytes: usize },
  #[error("数据长度不匹配: 期望至少 {expected} 字节, 实际 {actual} 字节")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 像素排布
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
  /// 打包 YUV 4:2:2（Y0 U Y1 V）
  Yuyv,
  /// 打包 RGB
  Rgb24,
  /// 打包 BGR
  Bgr24,
}

impl PixelLayout {
  pub fn bytes_per_pixel(&self) -> usize {
    match self {
      PixelLayout::Yuyv => 2,
      PixelLayout::Rgb24 | PixelLayout::Bgr24 => 3,
    }
  }
}

/// 输入源产生的原始帧视图
///
/// 内存归产生它的输入源所有，只在 acquire 与 release 之间有效。
/// 视图是只读的，后续阶段无法修改源缓冲区。
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
  data: &'a [u8],
  width: u32,
  height: u32,
  stride: usize,
  layout: PixelLayout,
}

impl<'a> RawFrame<'a> {
  /// 紧密排列（无行填充）的帧
  pub fn new(
    data: &'a [u8],
    width: u32,
    height: u32,
    layout: PixelLayout,
  ) -> Result<Self, FrameError> {
    let stride = width as usize * layout.bytes_per_pixel();
    Self::with_stride(data, width, height, stride, layout)
  }

  pub fn with_stride(
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: usize,
    layout: PixelLayout,
  ) -> Result<Self, FrameError> {
    // YUYV 以两个像素为一组
    if width == 0 || height == 0 || (layout == PixelLayout::Yuyv && width % 2 != 0) {
      return Err(FrameError::InvalidShape { width, height });
    }

    let row_bytes = width as usize * layout.bytes_per_pixel();
    if stride < row_bytes {
      return Err(FrameError::StrideTooSmall { stride, row_bytes });
    }

    let expected = stride * (height as usize - 1) + row_bytes;
    if data.len() < expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data,
      width,
      height,
      stride,
      layout,
    })
  }

  pub fn data(&self) -> &'a [u8] {
    self.data
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn stride(&self) -> usize {
    self.stride
  }

  pub fn layout(&self) -> PixelLayout {
    self.layout
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn row(&self, y: u32) -> &'a [u8] {
    let start = y as usize * self.stride;
    &self.data[start..start + self.width as usize * self.layout.bytes_per_pixel()]
  }
}

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

/// 推理所需的固定尺寸 RGB 帧（NHWC 排布）
#[derive(Debug, Clone, PartialEq)]
pub struct RgbNhwcFrame<const W: u32, const H: u32> {
  data: Box<[u8]>,
}

impl<const W: u32, const H: u32> RgbNhwcFrame<W, H> {
  pub const BYTES: usize = RGB_CHANNELS * W as usize * H as usize;

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn capacity(&self) -> usize {
    self.data.len()
  }

  pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
    let idx = (y as usize * W as usize + x as usize) * RGB_CHANNELS;
    [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
  }

  /// 以 `image` 视图借用底层缓冲区，用于原地绘制
  pub fn as_image_mut(&mut self) -> Option<ImageBuffer<Rgb<u8>, &mut [u8]>> {
    ImageBuffer::from_raw(W, H, &mut self.data[..])
  }
}

impl<const W: u32, const H: u32> TryFrom<Vec<u8>> for RgbNhwcFrame<W, H> {
  type Error = FrameError;

  fn try_from(data: Vec<u8>) -> Result<Self, Self::Error> {
    if W == 0 || H == 0 {
      return Err(FrameError::InvalidShape {
        width: W,
        height: H,
      });
    }
    if data.len() != Self::BYTES {
      return Err(FrameError::LengthMismatch {
        expected: Self::BYTES,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
    })
  }
}

impl<const W: u32, const H: u32> Default for RgbNhwcFrame<W, H> {
  fn default() -> Self {
    let data = vec![0u8; Self::BYTES].into_boxed_slice();
    Self { data }
  }
}

impl<const W: u32, const H: u32> AsMut<[u8]> for RgbNhwcFrame<W, H> {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl<const W: u32, const H: u32> AsNhwcFrame for RgbNhwcFrame<W, H> {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}
